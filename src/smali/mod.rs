//! Parsing and editing of disassembled smali compilation units.

pub mod line;
pub mod loader;
pub mod unit;

pub use line::{FieldDecl, FieldRef, Instruction, Line, LineKind, MethodDecl};
pub use loader::UnitLoader;
pub use unit::{CompilationUnit, Method};
