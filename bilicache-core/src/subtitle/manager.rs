use std::path::Path;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::SubtitleSection;

use super::error::{SubtitleError, SubtitleResult};
use super::page::{PageOutcome, SubtitlePage, SubtitlePageFactory};
use super::retry::RetryPolicy;
use super::types::{is_blank_payload, parse_payload, SubtitleInfo};

#[derive(Debug, Clone)]
pub struct SubtitleOptions {
    pub wait_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SubtitleOptions {
    fn default() -> Self {
        Self::from_config(&SubtitleSection::default())
    }
}

impl SubtitleOptions {
    pub fn from_config(config: &SubtitleSection) -> Self {
        Self {
            wait_timeout: config.wait_timeout(),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

/// Resolves subtitles for video pages, reusing one browser page for every
/// scrape until released.
pub struct SubtitleManager<F: SubtitlePageFactory> {
    factory: F,
    options: SubtitleOptions,
    page: Option<Box<dyn SubtitlePage>>,
    released: bool,
}

impl<F: SubtitlePageFactory> SubtitleManager<F> {
    pub fn new(factory: F, options: SubtitleOptions) -> Self {
        Self {
            factory,
            options,
            page: None,
            released: false,
        }
    }

    /// Runs `body` with a fresh manager and releases it afterwards, whether
    /// `body` succeeded or not.
    pub async fn scoped<T, B>(factory: F, options: SubtitleOptions, body: B) -> SubtitleResult<T>
    where
        B: for<'a> FnOnce(&'a mut SubtitleManager<F>) -> LocalBoxFuture<'a, SubtitleResult<T>>,
    {
        let mut manager = Self::new(factory, options);
        let result = body(&mut manager).await;
        let released = manager.release().await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(error = %release_err, "failed to release subtitle session");
                Err(err)
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Subtitles for `source_url`, from `cache_path` when it already holds
    /// at least one track, otherwise scraped and cached.
    ///
    /// The cache is written only after a successful scrape.
    pub async fn resolve(
        &mut self,
        cache_path: &Path,
        source_url: &str,
    ) -> SubtitleResult<SubtitleInfo> {
        if let Some(info) = read_cache(cache_path).await {
            if info.has_subtitles() {
                debug!(cache = %cache_path.display(), "subtitles served from cache");
                return Ok(info);
            }
            info!(cache = %cache_path.display(), "no subtitles in cache, searching online");
        }

        let raw = self.scrape(source_url).await?;
        let info = parse_payload(&raw)?;
        info!(title = %info.title, tracks = info.subtitles.len(), "subtitles scraped");

        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| SubtitleError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        fs::write(cache_path, raw.as_bytes())
            .await
            .map_err(|source| SubtitleError::Io {
                path: cache_path.to_path_buf(),
                source,
            })?;
        Ok(info)
    }

    /// Closes the browser page if one was opened. Later calls are no-ops.
    pub async fn release(&mut self) -> SubtitleResult<()> {
        self.released = true;
        match self.page.take() {
            Some(page) => page.close().await,
            None => Ok(()),
        }
    }

    async fn scrape(&mut self, source_url: &str) -> SubtitleResult<String> {
        if self.released {
            return Err(SubtitleError::Released);
        }
        if self.page.is_none() {
            self.page = Some(self.factory.create().await?);
        }
        let Some(page) = self.page.as_deref() else {
            return Err(SubtitleError::Released);
        };

        page.open().await?;
        page.submit(source_url).await?;
        let outcome = page.wait_for_outcome(self.options.wait_timeout).await?;
        debug!(url = source_url, ?outcome, "subtitle page settled");
        if outcome != PageOutcome::Results {
            return Err(SubtitleError::NoSubtitlesFound);
        }

        // A blank read is retried; when every read is blank the page never
        // produced subtitles.
        self.options
            .retry
            .run("read subtitle payload", |_| async move {
                page.read_payload()
                    .await
                    .and_then(|payload| match payload {
                        Some(raw) if !is_blank_payload(&raw) => Ok(raw),
                        _ => Err(SubtitleError::NoSubtitlesFound),
                    })
            })
            .await
    }
}

impl<F: SubtitlePageFactory> Drop for SubtitleManager<F> {
    fn drop(&mut self) {
        if self.page.is_some() {
            warn!("subtitle session dropped without release");
        }
    }
}

async fn read_cache(path: &Path) -> Option<SubtitleInfo> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(cache = %path.display(), error = %err, "unreadable subtitle cache ignored");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(cache = %path.display(), error = %err, "corrupt subtitle cache ignored");
            None
        }
    }
}
