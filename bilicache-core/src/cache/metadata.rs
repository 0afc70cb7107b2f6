use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{CacheError, CacheResult};
use super::naming::{component_or, OutputLayout, OUTPUT_EXTENSION};

/// Sidecar file the desktop client writes into every item folder.
pub const DESCRIPTOR_FILE: &str = "videoInfo.json";

const SOURCE_URL_BASE: &str = "https://www.bilibili.com/video";

/// Identifier exactly as found in a descriptor: the client writes some ids as
/// numbers and others as strings, sometimes both for the same field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(serde_json::Number),
    Text(String),
}

impl RawId {
    /// Canonical string form. Integral numbers never carry a fractional part,
    /// so `12`, `12.0` and `"12"` all become `"12"`. Strings are only trimmed:
    /// `"12.0"` stays `"12.0"`.
    pub fn canonical(&self) -> String {
        match self {
            RawId::Text(value) => value.trim().to_string(),
            RawId::Number(number) => {
                if let Some(value) = number.as_u64() {
                    value.to_string()
                } else if let Some(value) = number.as_i64() {
                    value.to_string()
                } else {
                    let value = number.as_f64().unwrap_or(f64::NAN);
                    if value.is_finite() && value.fract() == 0.0 {
                        format!("{value:.0}")
                    } else {
                        value.to_string()
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    group_id: Option<RawId>,
    item_id: Option<RawId>,
    uid: Option<RawId>,
    title: Option<String>,
    group_title: Option<String>,
    uname: Option<String>,
    p: Option<u32>,
    bvid: Option<String>,
    aid: Option<u64>,
    cid: Option<u64>,
    duration: Option<u64>,
    total_size: Option<u64>,
    cover_path: Option<String>,
    group_cover_path: Option<String>,
    tab_name: Option<String>,
    status: Option<String>,
    loaded: Option<bool>,
    qn: Option<u32>,
    #[serde(rename = "codecid")]
    codec_id: Option<u32>,
}

/// One cached media item, parsed from its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord {
    pub item_id: String,
    pub group_id: String,
    pub uid: Option<String>,
    pub title: String,
    pub group_title: String,
    pub uploader_name: String,
    pub part_index: u32,
    pub bvid: String,
    pub aid: u64,
    pub cid: u64,
    pub duration: u64,
    pub total_size: u64,
    pub cover_path: String,
    pub group_cover_path: String,
    pub tab_name: String,
    pub status: String,
    pub loaded: bool,
    pub quality: u32,
    pub codec_id: u32,
    /// Folder the descriptor was read from.
    pub source_dir: PathBuf,
}

impl ItemRecord {
    /// Parses descriptor JSON. `source_dir` is the item folder; it is
    /// recorded on the item and used in error messages.
    pub fn from_json_str(json: &str, source_dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let source_dir = source_dir.into();
        let descriptor_path = source_dir.join(DESCRIPTOR_FILE);
        let raw: RawDescriptor =
            serde_json::from_str(json).map_err(|source| CacheError::Parse {
                path: descriptor_path.clone(),
                source,
            })?;

        let group_id = required_id(raw.group_id, "groupId", &descriptor_path)?;
        let item_id = required_id(raw.item_id, "itemId", &descriptor_path)?;

        Ok(Self {
            item_id,
            group_id,
            uid: raw.uid.map(|uid| uid.canonical()),
            title: raw.title.unwrap_or_default(),
            group_title: raw.group_title.unwrap_or_default(),
            uploader_name: raw.uname.unwrap_or_default(),
            part_index: raw.p.unwrap_or_default(),
            bvid: raw.bvid.unwrap_or_default(),
            aid: raw.aid.unwrap_or_default(),
            cid: raw.cid.unwrap_or_default(),
            duration: raw.duration.unwrap_or_default(),
            total_size: raw.total_size.unwrap_or_default(),
            cover_path: raw.cover_path.unwrap_or_default(),
            group_cover_path: raw.group_cover_path.unwrap_or_default(),
            tab_name: raw.tab_name.unwrap_or_default(),
            status: raw.status.unwrap_or_default(),
            loaded: raw.loaded.unwrap_or_default(),
            quality: raw.qn.unwrap_or_default(),
            codec_id: raw.codec_id.unwrap_or_default(),
            source_dir,
        })
    }

    /// Title used for grouping: the group title, or the group id when the
    /// client left the title empty.
    pub fn group_key(&self) -> String {
        if self.group_title.is_empty() {
            self.group_id.clone()
        } else {
            self.group_title.clone()
        }
    }

    /// Relative output path without extension, e.g. `group/title`.
    pub fn output_base_name(&self, layout: OutputLayout) -> PathBuf {
        let group = component_or(&self.group_title, &self.group_id);
        let title = component_or(&self.title, &self.item_id);
        match layout {
            OutputLayout::GroupTitle => PathBuf::from(group).join(title),
            OutputLayout::UploaderGroupTitle => {
                let fallback = self.uid.as_deref().unwrap_or("unknown");
                let uploader = component_or(&self.uploader_name, fallback);
                PathBuf::from(uploader).join(group).join(title)
            }
        }
    }

    /// Relative output path of the converted file, e.g. `group/title.mp4`.
    pub fn output_file_name(&self, layout: OutputLayout) -> PathBuf {
        let mut name = self.output_base_name(layout).into_os_string();
        name.push(".");
        name.push(OUTPUT_EXTENSION);
        PathBuf::from(name)
    }

    /// Page of this part on the video site.
    pub fn source_url(&self) -> String {
        match url::Url::parse(&format!("{SOURCE_URL_BASE}/{}/", self.bvid)) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("p", &self.part_index.to_string());
                url.to_string()
            }
            Err(_) => format!("{SOURCE_URL_BASE}/{}/?p={}", self.bvid, self.part_index),
        }
    }
}

/// Reads and parses a descriptor file.
pub fn parse_descriptor<P: AsRef<Path>>(path: P) -> CacheResult<ItemRecord> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let source_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    ItemRecord::from_json_str(&content, source_dir)
}

fn required_id(raw: Option<RawId>, field: &'static str, path: &Path) -> CacheResult<String> {
    let value = raw
        .map(|id| id.canonical())
        .ok_or_else(|| CacheError::MissingField {
            path: path.to_path_buf(),
            field,
        })?;
    if value.is_empty() {
        return Err(CacheError::MissingField {
            path: path.to_path_buf(),
            field,
        });
    }
    Ok(value)
}
