use std::path::PathBuf;

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("failed to parse descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("descriptor {path} is missing required field `{field}`")]
    MissingField { path: PathBuf, field: &'static str },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

impl CacheError {
    /// True for malformed descriptors, as opposed to filesystem failures.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, CacheError::Parse { .. } | CacheError::MissingField { .. })
    }
}
