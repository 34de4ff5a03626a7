use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stratum operations
pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum StratumError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Not a configuration file: {0}")]
    UnsupportedSource(PathBuf),
}
