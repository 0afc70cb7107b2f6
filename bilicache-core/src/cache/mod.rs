//! Reading the desktop client's on-disk cache: item descriptors and the
//! folder tree that groups them.

mod error;
mod metadata;
mod naming;
mod scanner;

pub use error::{CacheError, CacheResult};
pub use metadata::{parse_descriptor, ItemRecord, RawId, DESCRIPTOR_FILE};
pub use naming::{sanitize_filename, OutputLayout, OUTPUT_EXTENSION};
pub use scanner::{find_item_dirs, is_item_dir, scan_groups, VideoGroup};
