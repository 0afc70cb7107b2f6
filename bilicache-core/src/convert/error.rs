use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::remux::RemuxError;
use crate::segment::SegmentError;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Remux(#[from] RemuxError),
    #[error("no cached segments found in {dir}")]
    NoSegmentsFound { dir: PathBuf },
    #[error("{dir} is an item folder, not a group root")]
    NotGroupFolder { dir: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type ConvertResult<T> = Result<T, ConvertError>;
