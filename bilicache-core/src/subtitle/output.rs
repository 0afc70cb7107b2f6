use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::cache::{sanitize_filename, ItemRecord, OutputLayout};

use super::error::{SubtitleError, SubtitleResult};
use super::types::SubtitleInfo;

const CACHE_FOLDER: &str = "cache";
const CACHE_SUFFIX: &str = "raw.json";
const SUBTITLE_EXTENSION: &str = "srt";

/// Where the raw subtitle payload of `item` is cached:
/// `<out>/<group>/cache/<title>.raw.json`.
pub fn cache_path_for(output_root: &Path, item: &ItemRecord) -> PathBuf {
    let base = item.output_base_name(OutputLayout::GroupTitle);
    let title = base.file_name().map(OsString::from).unwrap_or_default();
    let group = base.parent().map(Path::to_path_buf).unwrap_or_default();
    output_root
        .join(group)
        .join(CACHE_FOLDER)
        .join(with_suffix(title, &[CACHE_SUFFIX]))
}

/// Writes one `.srt` file per subtitle track next to the converted video,
/// as `<out>/<group>/<title>.<lang>.<index>.srt`.
pub async fn write_subtitle_files(
    output_root: &Path,
    item: &ItemRecord,
    info: &SubtitleInfo,
) -> SubtitleResult<Vec<PathBuf>> {
    let base = output_root.join(item.output_base_name(OutputLayout::GroupTitle));
    let mut written = Vec::with_capacity(info.subtitles.len());
    for (index, record) in info.subtitles.iter().enumerate() {
        let lang = if record.lang.trim().is_empty() {
            "und".to_string()
        } else {
            sanitize_filename(record.lang.trim())
        };
        let path = PathBuf::from(with_suffix(
            base.clone().into_os_string(),
            &[lang.as_str(), index.to_string().as_str(), SUBTITLE_EXTENSION],
        ));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| SubtitleError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        fs::write(&path, record.content.as_bytes())
            .await
            .map_err(|source| SubtitleError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), lang = %record.lang, "subtitle written");
        written.push(path);
    }
    Ok(written)
}

/// Awaits `task` and then sleeps until at least `min` has passed since the
/// call, so consecutive requests stay paced.
pub async fn run_with_minimum_time<F: Future>(min: Duration, task: F) -> F::Output {
    let started = Instant::now();
    let output = task.await;
    let elapsed = started.elapsed();
    if elapsed < min {
        sleep(min - elapsed).await;
    }
    output
}

fn with_suffix(mut name: OsString, parts: &[&str]) -> OsString {
    for part in parts {
        name.push(".");
        name.push(part);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::types::SubtitleRecord;
    use tempfile::TempDir;

    fn item() -> ItemRecord {
        ItemRecord::from_json_str(
            r#"{"groupId": 12, "itemId": 34, "title": "Part: 1", "groupTitle": "Show", "uname": "up"}"#,
            "/cache/34",
        )
        .unwrap()
    }

    #[test]
    fn cache_path_sits_under_group() {
        assert_eq!(
            cache_path_for(Path::new("/out"), &item()),
            PathBuf::from("/out/Show/cache/Part_ 1.raw.json")
        );
    }

    #[tokio::test]
    async fn writes_one_file_per_track() {
        let dir = TempDir::new().unwrap();
        let info = SubtitleInfo {
            subtitles: vec![
                SubtitleRecord {
                    lang: "zh-CN".into(),
                    lang_desc: "中文".into(),
                    content: "1\n00:00:01,000 --> 00:00:02,000\n你好\n".into(),
                },
                SubtitleRecord {
                    lang: String::new(),
                    lang_desc: String::new(),
                    content: "x".into(),
                },
            ],
            ..Default::default()
        };

        let written = write_subtitle_files(dir.path(), &item(), &info).await.unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("Show/Part_ 1.zh-CN.0.srt"),
                dir.path().join("Show/Part_ 1.und.1.srt"),
            ]
        );
        assert_eq!(
            std::fs::read_to_string(&written[0]).unwrap(),
            info.subtitles[0].content
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pads_fast_tasks_to_the_minimum() {
        let started = Instant::now();
        let value = run_with_minimum_time(Duration::from_secs(60), async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tasks_are_not_delayed_further() {
        let started = Instant::now();
        run_with_minimum_time(Duration::from_secs(1), sleep(Duration::from_secs(5))).await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
