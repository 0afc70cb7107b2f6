use std::time::Duration;

use async_trait::async_trait;

use super::error::SubtitleResult;

/// What the subtitle page showed after a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Download links are present; the payload can be read.
    Results,
    /// The page signalled that there is nothing to download.
    Absent,
    TimedOut,
}

/// One browser tab on the subtitle extraction page.
#[async_trait(?Send)]
pub trait SubtitlePage {
    async fn open(&self) -> SubtitleResult<()>;
    async fn submit(&self, source_url: &str) -> SubtitleResult<()>;
    async fn wait_for_outcome(&self, timeout: Duration) -> SubtitleResult<PageOutcome>;
    /// Page-embedded JSON blob, `None` when the page holds no value yet.
    async fn read_payload(&self) -> SubtitleResult<Option<String>>;
    async fn close(&self) -> SubtitleResult<()>;
}

#[async_trait(?Send)]
pub trait SubtitlePageFactory {
    async fn create(&self) -> SubtitleResult<Box<dyn SubtitlePage>>;
}
