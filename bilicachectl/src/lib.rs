use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bilicache_core::cache::{scan_groups, CacheError, ItemRecord, VideoGroup};
use bilicache_core::config::{
    load_config, load_config_or_default, BilicacheConfig, ENV_FFMPEG, ENV_INPUT_DIR,
    ENV_OUTPUT_DIR,
};
use bilicache_core::convert::{ConversionOutcome, ConvertError, Converter, GroupReport, ItemStatus};
use bilicache_core::subtitle::{
    cache_path_for, run_with_minimum_time, write_subtitle_files, ChromiumPageFactory,
    SubtitleError, SubtitleManager, SubtitleOptions,
};
use bilicache_core::{ConfigError, OutputLayout};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "configs/bilicache.toml";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),
    #[error("subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("group {0} not found in the cache folder")]
    GroupNotFound(String),
    #[error("item {item} not found in group {group}")]
    ItemNotFound { group: String, item: String },
    #[error("{failed} of {total} items failed")]
    PartialFailure { failed: usize, total: usize },
    #[error("{0} already exists, refusing to overwrite")]
    AlreadyExists(PathBuf),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Converts cached bilibili videos into playable files", long_about = None)]
pub struct Cli {
    /// Path to bilicache.toml; defaults apply when the default file is missing
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Root of the desktop client's download cache
    #[arg(short, long)]
    pub input_dir: Option<PathBuf>,
    /// Folder that receives converted files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// ffmpeg binary used for remuxing
    #[arg(long)]
    pub ffmpeg_bin: Option<String>,
    /// Convert even when the output file already exists
    #[arg(long, default_value_t = false)]
    pub force: bool,
    /// Place output under a folder named after the uploader
    #[arg(long, default_value_t = false)]
    pub uploader_as_subdir: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lists cached groups and, optionally, their items
    Scan(ScanArgs),
    /// Converts cached items
    #[command(subcommand)]
    Convert(ConvertCommands),
    /// Downloads subtitles for the items of a group
    Subtitles(SubtitleArgs),
    /// Writes a sample .env file
    Init(InitArgs),
    /// Prints the resolved configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScanBy {
    Group,
    Video,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Listing depth
    #[arg(long, value_enum, default_value_t = ScanBy::Group)]
    pub by: ScanBy,
}

#[derive(Subcommand, Debug)]
pub enum ConvertCommands {
    /// Converts every item of a group
    Group { group_id: String },
    /// Converts one item by its folder name
    Video { item_id: String },
}

#[derive(Args, Debug)]
pub struct SubtitleArgs {
    pub group_id: String,
    /// Only this item of the group
    #[arg(long)]
    pub item: Option<String>,
    /// Show the browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[arg(long, default_value = ".env")]
    pub path: PathBuf,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Init(args) = &cli.command {
        let result = init_env(&args.path)?;
        return render(&result, cli.format);
    }

    let context = AppContext::new(&cli, |key| std::env::var(key).ok())?;
    match &cli.command {
        Commands::Scan(args) => {
            let report = context.scan(args.by)?;
            render(&report, cli.format)?;
        }
        Commands::Convert(ConvertCommands::Group { group_id }) => {
            let report = block_on(context.convert_group(group_id))??;
            render(&report, cli.format)?;
            if !report.is_success() {
                return Err(AppError::PartialFailure {
                    failed: report.failed(),
                    total: report.entries.len(),
                });
            }
        }
        Commands::Convert(ConvertCommands::Video { item_id }) => {
            let result = block_on(context.convert_video(item_id))??;
            render(&result, cli.format)?;
        }
        Commands::Subtitles(args) => {
            let report = block_on(context.subtitles(args))??;
            render(&report, cli.format)?;
            if report.failed() > 0 {
                return Err(AppError::PartialFailure {
                    failed: report.failed(),
                    total: report.entries.len(),
                });
            }
        }
        Commands::Config => {
            render(&ConfigView(context.config.clone()), cli.format)?;
        }
        Commands::Init(_) => {}
    }
    Ok(())
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: BilicacheConfig,
}

impl AppContext {
    /// Config file, then environment, then command line flags.
    fn new<F>(cli: &Cli, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &cli.config {
            Some(path) => load_config(path)?,
            None => load_config_or_default(DEFAULT_CONFIG_PATH)?,
        };
        config.apply_overrides_from(env)?;

        if let Some(dir) = &cli.input_dir {
            config.paths.input_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(dir) = &cli.output_dir {
            config.paths.output_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(binary) = &cli.ffmpeg_bin {
            config.remux.ffmpeg_binary = binary.clone();
        }
        config.convert.force |= cli.force;
        config.convert.uploader_as_subdir |= cli.uploader_as_subdir;

        Ok(Self { config })
    }

    fn scan(&self, by: ScanBy) -> Result<ScanReport> {
        let input_dir = self.config.input_dir();
        let groups = scan_groups(&input_dir)?;
        let groups = groups
            .values()
            .map(|group| GroupListing::from_group(group, by == ScanBy::Video))
            .collect();
        Ok(ScanReport { input_dir, groups })
    }

    async fn convert_group(&self, group_id: &str) -> Result<GroupReport> {
        let converter = Converter::from_config(&self.config);
        let report = converter
            .convert_by_group(&self.config.input_dir(), group_id)
            .await?;
        Ok(report)
    }

    async fn convert_video(&self, item_id: &str) -> Result<VideoResult> {
        let converter = Converter::from_config(&self.config);
        let outcome = converter
            .convert_by_video(&self.config.input_dir(), item_id)
            .await?;
        Ok(VideoResult {
            item_id: item_id.trim().to_string(),
            outcome,
        })
    }

    fn group_items(&self, group_id: &str, item: Option<&str>) -> Result<Vec<ItemRecord>> {
        let group_id = group_id.trim();
        let groups = scan_groups(self.config.input_dir())?;
        let group = groups
            .values()
            .find(|group| group.group_id == group_id)
            .ok_or_else(|| AppError::GroupNotFound(group_id.to_string()))?;
        let mut items: Vec<ItemRecord> = group.sorted_by_part().into_iter().cloned().collect();
        if let Some(item_id) = item.map(str::trim) {
            items.retain(|candidate| candidate.item_id == item_id);
            if items.is_empty() {
                return Err(AppError::ItemNotFound {
                    group: group_id.to_string(),
                    item: item_id.to_string(),
                });
            }
        }
        Ok(items)
    }

    async fn subtitles(&self, args: &SubtitleArgs) -> Result<SubtitleReport> {
        let items = self.group_items(&args.group_id, args.item.as_deref())?;
        let output_root = self.config.output_dir();
        let min_interval = self.config.subtitle.min_interval();

        let mut browser = self.config.browser.clone();
        if args.headed {
            browser.headless = false;
        }
        let factory = ChromiumPageFactory::new(browser, self.config.subtitle.clone());
        let options = SubtitleOptions::from_config(&self.config.subtitle);
        let group_id = args.group_id.trim().to_string();

        let entries = SubtitleManager::scoped(factory, options, move |manager| {
            async move {
                let total = items.len();
                let mut entries = Vec::with_capacity(total);
                for (index, item) in items.into_iter().enumerate() {
                    let pace = if index + 1 < total {
                        min_interval
                    } else {
                        Duration::ZERO
                    };
                    info!(item = %item.item_id, url = %item.source_url(), "downloading subtitles");
                    let cache_path = cache_path_for(&output_root, &item);
                    let result = run_with_minimum_time(pace, async {
                        let info = manager.resolve(&cache_path, &item.source_url()).await?;
                        write_subtitle_files(&output_root, &item, &info).await
                    })
                    .await;
                    entries.push(match result {
                        Ok(written) => SubtitleEntry::written(&item, written),
                        Err(err) => {
                            warn!(item = %item.item_id, error = %err, "subtitle download failed");
                            SubtitleEntry::failed(&item, err.to_string())
                        }
                    });
                }
                Ok::<_, SubtitleError>(entries)
            }
            .boxed_local()
        })
        .await?;

        Ok(SubtitleReport { group_id, entries })
    }
}

const SAMPLE_ENV: &str = "BILICACHE_INPUT_DIR=~/Movies/bilibili/\nBILICACHE_OUTPUT_DIR=/tmp/bilibili\nBILICACHE_FFMPEG=ffmpeg\n";

fn init_env(path: &Path) -> Result<InitResult> {
    if path.exists() {
        return Err(AppError::AlreadyExists(path.to_path_buf()));
    }
    std::fs::write(path, SAMPLE_ENV)?;
    Ok(InitResult {
        path: path.to_path_buf(),
        variables: vec![
            ENV_INPUT_DIR.to_string(),
            ENV_OUTPUT_DIR.to_string(),
            ENV_FFMPEG.to_string(),
        ],
    })
}

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub path: PathBuf,
    pub variables: Vec<String>,
}

impl DisplayFallback for InitResult {
    fn display(&self) -> String {
        format!(
            "{} created ({})",
            self.path.display(),
            self.variables.join(", ")
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub input_dir: PathBuf,
    pub groups: Vec<GroupListing>,
}

#[derive(Debug, Serialize)]
pub struct GroupListing {
    pub title: String,
    pub group_id: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemListing>,
}

impl GroupListing {
    fn from_group(group: &VideoGroup, with_items: bool) -> Self {
        let items = if with_items {
            group
                .sorted_by_part()
                .into_iter()
                .map(|item| ItemListing {
                    part: item.part_index,
                    item_id: item.item_id.clone(),
                    title: item.title.clone(),
                    folder: item.source_dir.clone(),
                    url: item.source_url(),
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            title: group.key.clone(),
            group_id: group.group_id.clone(),
            count: group.len(),
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemListing {
    pub part: u32,
    pub item_id: String,
    pub title: String,
    pub folder: PathBuf,
    pub url: String,
}

impl DisplayFallback for ScanReport {
    fn display(&self) -> String {
        if self.groups.is_empty() {
            return format!("No cached videos under {}", self.input_dir.display());
        }
        let mut out = format!("Cached videos under {}\n", self.input_dir.display());
        for group in &self.groups {
            let _ = writeln!(out, "{} ({}: {})", group.title, group.group_id, group.count);
            for item in &group.items {
                let title = item.title.replace('\n', " | ");
                let _ = writeln!(out, "  [{}] {}", item.part, title);
                let _ = writeln!(out, "      {}", item.folder.display());
                let _ = writeln!(out, "      {}", item.url);
            }
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct VideoResult {
    pub item_id: String,
    #[serde(flatten)]
    pub outcome: ConversionOutcome,
}

impl DisplayFallback for VideoResult {
    fn display(&self) -> String {
        match &self.outcome {
            ConversionOutcome::Skipped { output } => format!(
                "{}: already converted at {} (use --force to overwrite)",
                self.item_id,
                output.display()
            ),
            ConversionOutcome::Converted { output, segments } => format!(
                "{}: {} segments -> {}",
                self.item_id,
                segments,
                output.display()
            ),
        }
    }
}

impl DisplayFallback for GroupReport {
    fn display(&self) -> String {
        let mut out = format!(
            "Group {}: {} converted, {} skipped, {} failed",
            self.group_id,
            self.converted(),
            self.skipped(),
            self.failed()
        );
        for entry in &self.entries {
            let line = match &entry.status {
                ItemStatus::Converted { output, .. } => {
                    format!("  [converted] {} -> {}", entry.title, output.display())
                }
                ItemStatus::Skipped { output } => {
                    format!("  [skipped]   {} -> {}", entry.title, output.display())
                }
                ItemStatus::Failed { error } => {
                    format!("  [failed]    {} ({}): {}", entry.title, entry.item_id, error)
                }
            };
            out.push('\n');
            out.push_str(&line);
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct SubtitleReport {
    pub group_id: String,
    pub entries: Vec<SubtitleEntry>,
}

impl SubtitleReport {
    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.error.is_some())
            .count()
    }
}

#[derive(Debug, Serialize)]
pub struct SubtitleEntry {
    pub item_id: String,
    pub title: String,
    pub files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubtitleEntry {
    fn written(item: &ItemRecord, files: Vec<PathBuf>) -> Self {
        Self {
            item_id: item.item_id.clone(),
            title: item.title.clone(),
            files,
            error: None,
        }
    }

    fn failed(item: &ItemRecord, error: String) -> Self {
        Self {
            item_id: item.item_id.clone(),
            title: item.title.clone(),
            files: Vec::new(),
            error: Some(error),
        }
    }
}

impl DisplayFallback for SubtitleReport {
    fn display(&self) -> String {
        let mut out = format!("Subtitles for group {}", self.group_id);
        for entry in &self.entries {
            let line = match &entry.error {
                Some(error) => format!("  [failed] {}: {}", entry.title, error),
                None if entry.files.is_empty() => format!("  [none]   {}", entry.title),
                None => format!("  [ok]     {}: {} files", entry.title, entry.files.len()),
            };
            out.push('\n');
            out.push_str(&line);
        }
        out
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct ConfigView(BilicacheConfig);

impl DisplayFallback for ConfigView {
    fn display(&self) -> String {
        let config = &self.0;
        let layout = OutputLayout::from_uploader_flag(config.convert.uploader_as_subdir);
        let mut out = String::new();
        let _ = writeln!(out, "input dir:        {}", config.input_dir().display());
        let _ = writeln!(out, "output dir:       {}", config.output_dir().display());
        let _ = writeln!(out, "ffmpeg:           {}", config.remux.ffmpeg_binary);
        let _ = writeln!(out, "force:            {}", config.convert.force);
        let _ = writeln!(out, "layout:           {:?}", layout);
        let _ = writeln!(out, "subtitle page:    {}", config.subtitle.page_url);
        let _ = writeln!(out, "subtitle timeout: {}s", config.subtitle.wait_timeout_seconds);
        let _ = writeln!(out, "headless:         {}", config.browser.headless);
        if let Some(dir) = &config.browser.extension_dir {
            let _ = writeln!(out, "extension dir:    {}", dir);
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bilicachectl").chain(args.iter().copied())).unwrap()
    }

    fn write_item(root: &Path, folder: &str, group_id: &str, part: u32) {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("videoInfo.json"),
            format!(
                r#"{{"groupId": {group_id}, "itemId": "{folder}", "title": "Part {part}", "groupTitle": "Show", "p": {part}, "bvid": "BV1xx"}}"#
            ),
        )
        .unwrap();
    }

    fn context_for(input: &Path, output: &Path) -> AppContext {
        let cli = parse(&[
            "--config",
            "../configs/bilicache.toml",
            "--input-dir",
            input.to_str().unwrap(),
            "--output-dir",
            output.to_str().unwrap(),
            "scan",
        ]);
        AppContext::new(&cli, |_| None).unwrap()
    }

    #[test]
    fn parses_convert_group() {
        let cli = parse(&["--force", "--format", "json", "convert", "group", "12"]);
        assert!(cli.force);
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Convert(ConvertCommands::Group { group_id }) => assert_eq!(group_id, "12"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_subtitles_with_item() {
        let cli = parse(&["subtitles", "12", "--item", "34", "--headed"]);
        match cli.command {
            Commands::Subtitles(args) => {
                assert_eq!(args.group_id, "12");
                assert_eq!(args.item.as_deref(), Some("34"));
                assert!(args.headed);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flags_override_env_and_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BILICACHE_INPUT_DIR", "/env/in"),
            ("BILICACHE_OUTPUT_DIR", "/env/out"),
            ("BILICACHE_FFMPEG", "/env/ffmpeg"),
        ]);
        let cli = parse(&[
            "--config",
            "../configs/bilicache.toml",
            "--output-dir",
            "/flag/out",
            "--uploader-as-subdir",
            "config",
        ]);
        let context =
            AppContext::new(&cli, |key| env.get(key).map(|value| value.to_string())).unwrap();
        assert_eq!(context.config.input_dir(), PathBuf::from("/env/in"));
        assert_eq!(context.config.output_dir(), PathBuf::from("/flag/out"));
        assert_eq!(context.config.remux.ffmpeg_binary, "/env/ffmpeg");
        assert!(context.config.convert.uploader_as_subdir);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let cli = parse(&["--config", "/definitely/missing.toml", "config"]);
        let err = AppContext::new(&cli, |_| None).unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::Io { .. })));
    }

    #[test]
    fn scan_lists_groups_and_items() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_item(input.path(), "b", "7", 2);
        write_item(input.path(), "a", "\"7\"", 1);
        let context = context_for(input.path(), output.path());

        let grouped = context.scan(ScanBy::Group).unwrap();
        assert_eq!(grouped.groups.len(), 1);
        assert_eq!(grouped.groups[0].count, 2);
        assert!(grouped.groups[0].items.is_empty());

        let detailed = context.scan(ScanBy::Video).unwrap();
        let parts: Vec<u32> = detailed.groups[0].items.iter().map(|item| item.part).collect();
        assert_eq!(parts, vec![1, 2]);
        assert_eq!(
            detailed.groups[0].items[0].url,
            "https://www.bilibili.com/video/BV1xx/?p=1"
        );
        assert!(detailed.display().contains("Show (7: 2)"));
    }

    #[test]
    fn group_items_filters_and_reports_missing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_item(input.path(), "a", "7", 1);
        write_item(input.path(), "b", "7", 2);
        let context = context_for(input.path(), output.path());

        assert_eq!(context.group_items("7", None).unwrap().len(), 2);
        assert_eq!(context.group_items("7", Some("b")).unwrap()[0].item_id, "b");
        assert!(matches!(
            context.group_items("8", None).unwrap_err(),
            AppError::GroupNotFound(_)
        ));
        assert!(matches!(
            context.group_items("7", Some("z")).unwrap_err(),
            AppError::ItemNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn converting_unknown_group_yields_empty_report() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_item(input.path(), "a", "7", 1);
        let context = context_for(input.path(), output.path());

        let report = context.convert_group("99").await.unwrap();
        assert!(report.entries.is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let result = init_env(&path).unwrap();
        assert_eq!(result.variables.len(), 3);
        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("BILICACHE_INPUT_DIR="));

        let err = init_env(&path).unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
    }
}
