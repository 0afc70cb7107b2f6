use std::path::PathBuf;

use thiserror::Error;

pub type SubtitleResult<T> = Result<T, SubtitleError>;

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("subtitle service reported code {code}, server issue")]
    RemoteService { code: String },
    #[error("no subtitles found")]
    NoSubtitlesFound,
    #[error("subtitle session already released")]
    Released,
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("browser configuration error: {0}")]
    Configuration(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("failed to parse subtitle payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
