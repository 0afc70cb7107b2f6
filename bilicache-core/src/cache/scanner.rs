use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use super::error::{CacheError, CacheResult};
use super::metadata::{parse_descriptor, ItemRecord, DESCRIPTOR_FILE};

/// Items sharing one collection id, in folder order.
#[derive(Debug, Clone, Serialize)]
pub struct VideoGroup {
    pub key: String,
    pub group_id: String,
    pub group_title: String,
    pub items: Vec<ItemRecord>,
}

impl VideoGroup {
    fn new(key: String, first: &ItemRecord) -> Self {
        Self {
            key,
            group_id: first.group_id.clone(),
            group_title: first.group_title.clone(),
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items ordered by part number; folder order breaks ties.
    pub fn sorted_by_part(&self) -> Vec<&ItemRecord> {
        let mut items: Vec<&ItemRecord> = self.items.iter().collect();
        items.sort_by_key(|item| item.part_index);
        items
    }
}

/// True when `dir` directly holds a descriptor file.
pub fn is_item_dir(dir: &Path) -> bool {
    dir.join(DESCRIPTOR_FILE).is_file()
}

/// Every folder below `root` (the root excluded) that directly holds a
/// descriptor, in lexicographic walk order.
pub fn find_item_dirs<P: AsRef<Path>>(root: P) -> CacheResult<Vec<PathBuf>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(CacheError::DirectoryNotFound(root.to_path_buf()));
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| CacheError::Walk {
            path: source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            source,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if is_item_dir(entry.path()) {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Parses every item below `root` and buckets it by display title.
///
/// A descriptor that fails to parse aborts the scan.
pub fn scan_groups<P: AsRef<Path>>(root: P) -> CacheResult<BTreeMap<String, VideoGroup>> {
    let root = root.as_ref();
    let mut groups: BTreeMap<String, VideoGroup> = BTreeMap::new();

    for dir in find_item_dirs(root)? {
        let item = parse_descriptor(dir.join(DESCRIPTOR_FILE))?;
        let key = bucket_key(&groups, &item);
        debug!(item = %item.item_id, group = %key, dir = %dir.display(), "cached item found");
        groups
            .entry(key.clone())
            .or_insert_with(|| VideoGroup::new(key, &item))
            .items
            .push(item);
    }

    Ok(groups)
}

/// Key of the bucket `item` belongs to. A key taken by another group id gets
/// ` (<group_id>)` appended until it is free or already holds this id.
fn bucket_key(groups: &BTreeMap<String, VideoGroup>, item: &ItemRecord) -> String {
    let mut key = item.group_key();
    while let Some(existing) = groups.get(&key) {
        if existing.group_id == item.group_id {
            break;
        }
        key = format!("{key} ({})", item.group_id);
    }
    key
}
