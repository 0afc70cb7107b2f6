use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use bilicache_core::cache::{parse_descriptor, scan_groups, OutputLayout, DESCRIPTOR_FILE};
use bilicache_core::convert::{ConversionOutcome, ConvertError, ConvertOptions, Converter, ItemStatus};
use bilicache_core::remux::{RemuxError, RemuxOutput, RemuxResult, Remuxer};
use bilicache_core::SEGMENT_HEADER_LEN;

const ITEM_ID: &str = "26349405204";
const GROUP_TITLE: &str = "【星露谷物语】复古小卧室";

/// Records its inputs and writes their concatenation as the output.
#[derive(Default)]
struct ConcatRemuxer {
    calls: Mutex<Vec<Vec<PathBuf>>>,
    input_sizes: Mutex<Vec<u64>>,
}

#[async_trait]
impl Remuxer for ConcatRemuxer {
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> RemuxResult<RemuxOutput> {
        let io_err = |source| RemuxError::Io {
            program: "concat".into(),
            source,
        };
        let mut merged = Vec::new();
        for input in inputs {
            let bytes = std::fs::read(input).map_err(io_err)?;
            self.input_sizes.lock().unwrap().push(bytes.len() as u64);
            merged.extend(bytes);
        }
        std::fs::write(output, merged).map_err(io_err)?;
        self.calls.lock().unwrap().push(inputs.to_vec());
        Ok(RemuxOutput::default())
    }
}

fn fixture_descriptor() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("fixtures")
        .join(ITEM_ID)
        .join(DESCRIPTOR_FILE)
}

fn segment(body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![b'0'; SEGMENT_HEADER_LEN];
    bytes.extend_from_slice(body);
    bytes
}

/// Copies the fixture item into `root` with a video and an audio segment.
fn stage_fixture(root: &Path) -> PathBuf {
    let dir = root.join(ITEM_ID);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::copy(fixture_descriptor(), dir.join(DESCRIPTOR_FILE)).unwrap();
    std::fs::write(dir.join(format!("{ITEM_ID}-1-30080.m4s")), segment(b"video-track")).unwrap();
    std::fs::write(dir.join(format!("{ITEM_ID}-1-30280.m4s")), segment(b"audio")).unwrap();
    std::fs::write(dir.join("image.jpg"), b"cover").unwrap();
    dir
}

#[test]
fn fixture_descriptor_parses() {
    let item = parse_descriptor(fixture_descriptor()).unwrap();
    assert_eq!(item.item_id, ITEM_ID);
    assert_eq!(item.group_id, "12");
    assert_eq!(item.bvid, "BV1JcCUYSEEL");
    assert_eq!(item.uploader_name, "乐乐乐雨_");
    assert_eq!(item.group_title, GROUP_TITLE);
    assert_eq!(item.title, GROUP_TITLE);
    assert_eq!(
        item.output_file_name(OutputLayout::UploaderGroupTitle),
        PathBuf::from(format!("乐乐乐雨_/{GROUP_TITLE}/{GROUP_TITLE}.mp4"))
    );
}

#[tokio::test]
async fn fixture_item_converts_end_to_end() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let dir = stage_fixture(input.path());
    let remuxer = Arc::new(ConcatRemuxer::default());
    let converter = Converter::new(ConvertOptions::new(output.path()), remuxer.clone());

    let outcome = converter.convert_item(&dir).await.unwrap();
    let expected = output
        .path()
        .join(GROUP_TITLE)
        .join(format!("{GROUP_TITLE}.mp4"));
    assert_eq!(
        outcome,
        ConversionOutcome::Converted {
            output: expected.clone(),
            segments: 2
        }
    );
    assert_eq!(std::fs::read(&expected).unwrap(), b"video-trackaudio");

    let sizes = remuxer.input_sizes.lock().unwrap().clone();
    let originals = [
        std::fs::metadata(dir.join(format!("{ITEM_ID}-1-30080.m4s"))).unwrap().len(),
        std::fs::metadata(dir.join(format!("{ITEM_ID}-1-30280.m4s"))).unwrap().len(),
    ];
    for (original, repaired) in originals.iter().zip(sizes.iter()) {
        assert_eq!(original - repaired, SEGMENT_HEADER_LEN as u64);
    }
}

#[tokio::test]
async fn rerun_skips_unless_forced() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    stage_fixture(input.path());
    let remuxer = Arc::new(ConcatRemuxer::default());

    let converter = Converter::new(ConvertOptions::new(output.path()), remuxer.clone());
    let first = converter.convert_by_video(input.path(), ITEM_ID).await.unwrap();
    let second = converter.convert_by_video(input.path(), ITEM_ID).await.unwrap();
    assert!(!first.is_skipped());
    assert!(second.is_skipped());
    assert_eq!(remuxer.calls.lock().unwrap().len(), 1);

    let forced = Converter::new(
        ConvertOptions::new(output.path()).with_force(true),
        remuxer.clone(),
    );
    let third = forced.convert_by_video(input.path(), ITEM_ID).await.unwrap();
    assert!(!third.is_skipped());
    assert_eq!(remuxer.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn group_run_converts_mixed_id_encodings() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    stage_fixture(input.path());

    let sibling = input.path().join("26349405205");
    std::fs::create_dir_all(&sibling).unwrap();
    std::fs::write(
        sibling.join(DESCRIPTOR_FILE),
        format!(r#"{{"groupId": "12", "itemId": 26349405205, "title": "第二集", "groupTitle": "{GROUP_TITLE}", "p": 2}}"#),
    )
    .unwrap();
    std::fs::write(sibling.join("1.m4s"), segment(b"v2")).unwrap();

    let groups = scan_groups(input.path()).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[GROUP_TITLE].len(), 2);

    let remuxer = Arc::new(ConcatRemuxer::default());
    let converter = Converter::new(ConvertOptions::new(output.path()), remuxer.clone());
    let report = converter.convert_by_group(input.path(), "12").await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.converted(), 2);
    assert!(output.path().join(GROUP_TITLE).join("第二集.mp4").exists());
    assert!(report
        .entries
        .iter()
        .all(|entry| matches!(entry.status, ItemStatus::Converted { .. })));
}

#[tokio::test]
async fn group_run_rejects_item_folder() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let dir = stage_fixture(input.path());
    let converter = Converter::new(
        ConvertOptions::new(output.path()),
        Arc::new(ConcatRemuxer::default()),
    );
    let err = converter.convert_by_group(&dir, "12").await.unwrap_err();
    assert!(matches!(err, ConvertError::NotGroupFolder { .. }));
}
