//! Removal of the sentinel header the desktop client prepends to every cached
//! media segment.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

/// Length of the sentinel header.
pub const SEGMENT_HEADER_LEN: usize = 9;

pub type SegmentResult<T> = Result<T, SegmentError>;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("{path} does not start with the cache sentinel header")]
    NotCachePrefix { path: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A header is valid when every byte is ASCII `'0'` (what the client writes)
/// or every byte is NUL. Mixed headers are rejected.
pub fn is_sentinel_header(header: &[u8]) -> bool {
    header.len() == SEGMENT_HEADER_LEN
        && (header.iter().all(|byte| *byte == b'0') || header.iter().all(|byte| *byte == 0))
}

/// Copies `source` to `destination` without its sentinel header and returns
/// the number of bytes written.
///
/// The header is checked before the destination is touched, so a rejected
/// segment leaves no output behind. The copy is streamed.
pub async fn repair_segment(source: &Path, destination: &Path) -> SegmentResult<u64> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SegmentError::Io { path, source }
    };

    let file = fs::File::open(source).await.map_err(io_err(source))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; SEGMENT_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(SegmentError::NotCachePrefix {
                path: source.to_path_buf(),
            });
        }
        Err(err) => return Err(io_err(source)(err)),
    }
    if !is_sentinel_header(&header) {
        return Err(SegmentError::NotCachePrefix {
            path: source.to_path_buf(),
        });
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    let output = fs::File::create(destination)
        .await
        .map_err(io_err(destination))?;
    let mut writer = BufWriter::new(output);
    let written = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(io_err(destination))?;
    writer.flush().await.map_err(io_err(destination))?;

    debug!(
        source = %source.display(),
        destination = %destination.display(),
        bytes = written,
        "segment repaired"
    );
    Ok(written)
}
