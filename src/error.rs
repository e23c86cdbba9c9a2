use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the analysis and patching core.
///
/// Only [`Error::SymbolMismatch`] is meant to abort a caller's workflow; every
/// other variant is reported per file and the batch carries on.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to parse binary: {0}")]
    Binary(#[from] object::read::Error),

    #[error("Not an ELF shared object")]
    NotElf,

    /// No exported function could be located; comparing such binaries proves nothing.
    #[error("Binary exports no functions")]
    NoExports,

    /// The replacement binary does not export the same functions as the original.
    #[error(
        "Exported symbol sets differ ({} missing, {} unexpected)",
        missing.len(),
        unexpected.len()
    )]
    SymbolMismatch {
        /// Exported by the original, absent from the replacement.
        missing: Vec<String>,
        /// Exported by the replacement only.
        unexpected: Vec<String>,
    },

    #[error("Invalid asset manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Asset manifest must be a JSON object of path lists: {0}")]
    ManifestShape(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
