//! Subtitle acquisition through a third-party extraction page, with an
//! on-disk cache of the raw payload.

mod chromium;
mod error;
mod manager;
mod output;
mod page;
mod retry;
mod types;

pub use chromium::{ChromiumPageFactory, ChromiumSubtitlePage};
pub use error::{SubtitleError, SubtitleResult};
pub use manager::{SubtitleManager, SubtitleOptions};
pub use output::{cache_path_for, run_with_minimum_time, write_subtitle_files};
pub use page::{PageOutcome, SubtitlePage, SubtitlePageFactory};
pub use retry::RetryPolicy;
pub use types::{parse_payload, SubtitleInfo, SubtitleRecord};
