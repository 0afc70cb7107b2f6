pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod remux;
pub mod segment;
pub mod subtitle;

pub use cache::{
    find_item_dirs, parse_descriptor, scan_groups, CacheError, CacheResult, ItemRecord,
    OutputLayout, VideoGroup, DESCRIPTOR_FILE,
};
pub use config::{load_config, load_config_or_default, BilicacheConfig};
pub use convert::{
    ConversionOutcome, ConvertError, ConvertOptions, ConvertResult, Converter, GroupReport,
    ItemConversion, ItemStatus,
};
pub use error::{ConfigError, Result};
pub use remux::{FfmpegRemuxer, RemuxError, RemuxResult, Remuxer};
pub use segment::{repair_segment, SegmentError, SegmentResult, SEGMENT_HEADER_LEN};
pub use subtitle::{
    cache_path_for, write_subtitle_files, ChromiumPageFactory, SubtitleError, SubtitleInfo,
    SubtitleManager, SubtitleOptions, SubtitleResult,
};
