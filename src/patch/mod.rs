//! In-place rewrites of compilation units.

pub mod guard;
pub mod initializer;

pub use guard::{GuardConfig, GuardOutcome, MethodMatcher};
pub use initializer::InitializerOutcome;
