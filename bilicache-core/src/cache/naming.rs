use serde::{Deserialize, Serialize};

pub const OUTPUT_EXTENSION: &str = "mp4";

const UNSAFE_CHARS: [char; 12] = ['/', '\\', '?', '&', '=', '#', ':', '"', '<', '>', '*', '|'];

/// How converted files are laid out below the output root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `<group>/<title>.mp4`
    #[default]
    GroupTitle,
    /// `<uploader>/<group>/<title>.mp4`
    UploaderGroupTitle,
}

impl OutputLayout {
    pub fn from_uploader_flag(uploader_as_subdir: bool) -> Self {
        if uploader_as_subdir {
            OutputLayout::UploaderGroupTitle
        } else {
            OutputLayout::GroupTitle
        }
    }
}

/// Replaces characters that are unsafe in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Sanitized `value`, or sanitized `fallback` when `value` is blank.
pub(crate) fn component_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        sanitize_filename(fallback)
    } else {
        sanitize_filename(value)
    }
}
