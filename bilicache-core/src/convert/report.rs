use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Terminal state of a conversion that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// Output already existed and overwriting was not requested.
    Skipped { output: PathBuf },
    Converted { output: PathBuf, segments: usize },
}

impl ConversionOutcome {
    pub fn output(&self) -> &Path {
        match self {
            ConversionOutcome::Skipped { output } | ConversionOutcome::Converted { output, .. } => {
                output
            }
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ConversionOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemStatus {
    Skipped { output: PathBuf },
    Converted { output: PathBuf, segments: usize },
    Failed { error: String },
}

impl From<ConversionOutcome> for ItemStatus {
    fn from(outcome: ConversionOutcome) -> Self {
        match outcome {
            ConversionOutcome::Skipped { output } => ItemStatus::Skipped { output },
            ConversionOutcome::Converted { output, segments } => {
                ItemStatus::Converted { output, segments }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemConversion {
    pub item_id: String,
    pub title: String,
    pub item_dir: PathBuf,
    pub status: ItemStatus,
}

/// Per-item results of a group conversion.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group_id: String,
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<ItemConversion>,
}

impl GroupReport {
    pub(crate) fn new(group_id: &str, root: &Path) -> Self {
        let now = Utc::now();
        Self {
            group_id: group_id.to_string(),
            root: root.to_path_buf(),
            started_at: now,
            finished_at: now,
            entries: Vec::new(),
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn converted(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Converted { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Failed { .. }))
    }

    /// No item failed. An empty report counts as success.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, predicate: impl Fn(&ItemStatus) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|entry| predicate(&entry.status))
            .count()
    }
}
