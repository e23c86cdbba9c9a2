//! Recovers string constants stripped out of "vault" classes in decompiled
//! smali trees, and patches the tree so the app runs with the recovered values.

pub mod analysis;
pub mod assets;
pub mod binary;
pub mod config;
pub mod error;
pub mod patch;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod smali;
pub mod symbols;
pub mod vault;

pub use config::{find_config_file, UnvaultConfig};
pub use error::{Error, Result};
pub use pipeline::Patcher;
pub use report::PatchReport;
