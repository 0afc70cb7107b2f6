//! Turning cached items into playable files: naming, idempotency, segment
//! repair and the remux call.

mod error;
mod report;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::{
    find_item_dirs, is_item_dir, parse_descriptor, sanitize_filename, ItemRecord, OutputLayout,
    DESCRIPTOR_FILE,
};
use crate::config::BilicacheConfig;
use crate::remux::{FfmpegRemuxer, Remuxer};
use crate::segment::repair_segment;

pub use error::{ConvertError, ConvertResult};
pub use report::{ConversionOutcome, GroupReport, ItemConversion, ItemStatus};

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub output_dir: PathBuf,
    pub force: bool,
    pub layout: OutputLayout,
    pub segment_extension: String,
    /// Folder below `output_dir` that holds repaired segments until remux
    /// succeeds.
    pub staging_dir: String,
}

impl ConvertOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            force: false,
            layout: OutputLayout::GroupTitle,
            segment_extension: "m4s".to_string(),
            staging_dir: ".staging".to_string(),
        }
    }

    pub fn from_config(config: &BilicacheConfig) -> Self {
        Self {
            output_dir: config.output_dir(),
            force: config.convert.force,
            layout: OutputLayout::from_uploader_flag(config.convert.uploader_as_subdir),
            segment_extension: config.convert.segment_extension.clone(),
            staging_dir: config.convert.staging_dir.clone(),
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }
}

pub struct Converter {
    options: ConvertOptions,
    remuxer: Arc<dyn Remuxer>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("options", &self.options)
            .finish()
    }
}

impl Converter {
    pub fn new(options: ConvertOptions, remuxer: Arc<dyn Remuxer>) -> Self {
        Self { options, remuxer }
    }

    /// Converter backed by ffmpeg, configured from `config`.
    pub fn from_config(config: &BilicacheConfig) -> Self {
        let remuxer = FfmpegRemuxer::new(&config.remux.ffmpeg_binary);
        Self::new(ConvertOptions::from_config(config), Arc::new(remuxer))
    }

    /// Where `item` ends up once converted.
    pub fn output_path(&self, item: &ItemRecord) -> PathBuf {
        self.options
            .output_dir
            .join(item.output_file_name(self.options.layout))
    }

    pub fn staging_path(&self, item: &ItemRecord) -> PathBuf {
        self.options
            .output_dir
            .join(&self.options.staging_dir)
            .join(sanitize_filename(&item.item_id))
    }

    /// Converts the item stored in `item_dir`.
    pub async fn convert_item(&self, item_dir: &Path) -> ConvertResult<ConversionOutcome> {
        let item = parse_descriptor(item_dir.join(DESCRIPTOR_FILE))?;
        self.convert_record(&item).await
    }

    /// Converts an already parsed item whose segments live in its
    /// `source_dir`.
    pub async fn convert_record(&self, item: &ItemRecord) -> ConvertResult<ConversionOutcome> {
        let input = item.source_dir.as_path();
        let output = self.output_path(item);
        debug!(input = %input.display(), output = %output.display(), "resolved output");

        if !self.options.force && fs::metadata(&output).await.is_ok() {
            info!(item = %item.item_id, output = %output.display(), "already converted, skipping");
            return Ok(ConversionOutcome::Skipped { output });
        }

        let segments = self.list_segments(input).await?;
        if segments.is_empty() {
            return Err(ConvertError::NoSegmentsFound {
                dir: input.to_path_buf(),
            });
        }

        let staging = self.staging_path(item);
        let mut repaired = Vec::with_capacity(segments.len());
        for segment in &segments {
            let Some(name) = segment.file_name() else {
                continue;
            };
            let destination = staging.join(name);
            if let Err(err) = repair_segment(segment, &destination).await {
                self.discard_staging(&staging, &repaired).await;
                return Err(err.into());
            }
            repaired.push(destination);
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ConvertError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        if let Err(err) = self.remuxer.remux(&repaired, &output).await {
            warn!(
                item = %item.item_id,
                staging = %staging.display(),
                error = %err,
                "remux failed, repaired segments kept"
            );
            discard_partial_output(&output).await;
            return Err(err.into());
        }

        self.discard_staging(&staging, &repaired).await;
        info!(item = %item.item_id, output = %output.display(), "converted");
        Ok(ConversionOutcome::Converted {
            output,
            segments: repaired.len(),
        })
    }

    /// Converts every item below `root` whose group id equals `group_id`.
    ///
    /// Items are converted one at a time; a failing item is recorded in the
    /// report and the remaining items still run.
    pub async fn convert_by_group(&self, root: &Path, group_id: &str) -> ConvertResult<GroupReport> {
        if is_item_dir(root) {
            return Err(ConvertError::NotGroupFolder {
                dir: root.to_path_buf(),
            });
        }
        let group_id = group_id.trim();
        info!(root = %root.display(), group = group_id, "scanning group");

        let mut report = GroupReport::new(group_id, root);
        for dir in find_item_dirs(root)? {
            let item = parse_descriptor(dir.join(DESCRIPTOR_FILE))?;
            if item.group_id != group_id {
                continue;
            }
            info!(dir = %dir.display(), "converting");
            let status = match self.convert_record(&item).await {
                Ok(outcome) => ItemStatus::from(outcome),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "cannot convert item");
                    ItemStatus::Failed {
                        error: err.to_string(),
                    }
                }
            };
            report.entries.push(ItemConversion {
                item_id: item.item_id.clone(),
                title: item.title.clone(),
                item_dir: dir,
                status,
            });
        }

        let report = report.finish();
        info!(
            group = %report.group_id,
            converted = report.converted(),
            skipped = report.skipped(),
            failed = report.failed(),
            "group finished"
        );
        Ok(report)
    }

    /// Converts the single item stored in `root/<item_id>`.
    pub async fn convert_by_video(
        &self,
        root: &Path,
        item_id: &str,
    ) -> ConvertResult<ConversionOutcome> {
        let dir = root.join(item_id.trim());
        if !dir.is_dir() {
            return Err(crate::cache::CacheError::DirectoryNotFound(dir).into());
        }
        self.convert_item(&dir).await
    }

    async fn list_segments(&self, dir: &Path) -> ConvertResult<Vec<PathBuf>> {
        let io_err = |source| ConvertError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
        let mut segments = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(&self.options.segment_extension))
                .unwrap_or(false);
            if matches && entry.file_type().await.map_err(io_err)?.is_file() {
                segments.push(path);
            }
        }
        segments.sort();
        Ok(segments)
    }

    async fn discard_staging(&self, staging: &Path, repaired: &[PathBuf]) {
        for path in repaired {
            if let Err(err) = fs::remove_file(path).await {
                warn!(path = %path.display(), error = %err, "failed to remove repaired segment");
            }
        }
        if let Err(err) = fs::remove_dir(staging).await {
            debug!(path = %staging.display(), error = %err, "staging folder left in place");
        }
    }
}

/// A truncated output would be skipped on the next run without `force`.
async fn discard_partial_output(output: &Path) {
    match fs::remove_file(output).await {
        Ok(()) => info!(output = %output.display(), "partial output removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(output = %output.display(), error = %err, "failed to remove partial output"),
    }
}
