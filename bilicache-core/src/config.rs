use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const ENV_INPUT_DIR: &str = "BILICACHE_INPUT_DIR";
pub const ENV_OUTPUT_DIR: &str = "BILICACHE_OUTPUT_DIR";
pub const ENV_FFMPEG: &str = "BILICACHE_FFMPEG";
pub const ENV_HEADLESS: &str = "BILICACHE_HEADLESS";
pub const ENV_TIMEOUT: &str = "BILICACHE_TIMEOUT";
pub const ENV_EXTENSION_DIR: &str = "BILICACHE_EXTENSION_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BilicacheConfig {
    pub paths: PathsSection,
    pub convert: ConvertSection,
    pub remux: RemuxSection,
    pub subtitle: SubtitleSection,
    pub browser: BrowserSection,
}

impl BilicacheConfig {
    pub fn input_dir(&self) -> PathBuf {
        expand_home(&self.paths.input_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.paths.output_dir)
    }

    /// Applies `BILICACHE_*` variables resolved through `lookup`; blank values
    /// are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup(ENV_INPUT_DIR) {
            self.paths.input_dir = value;
        }
        if let Some(value) = lookup(ENV_OUTPUT_DIR) {
            self.paths.output_dir = value;
        }
        if let Some(value) = lookup(ENV_FFMPEG) {
            self.remux.ffmpeg_binary = value;
        }
        if let Some(value) = lookup(ENV_HEADLESS) {
            self.browser.headless =
                parse_bool(&value).ok_or_else(|| ConfigError::InvalidOverride {
                    key: ENV_HEADLESS.to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT) {
            self.subtitle.wait_timeout_seconds =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidOverride {
                        key: ENV_TIMEOUT.to_string(),
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup(ENV_EXTENSION_DIR) {
            self.browser.extension_dir = Some(value);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub input_dir: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertSection {
    pub force: bool,
    pub uploader_as_subdir: bool,
    pub segment_extension: String,
    pub staging_dir: String,
}

impl Default for ConvertSection {
    fn default() -> Self {
        Self {
            force: false,
            uploader_as_subdir: false,
            segment_extension: "m4s".to_string(),
            staging_dir: ".staging".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxSection {
    pub ffmpeg_binary: String,
}

impl Default for RemuxSection {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleSection {
    pub page_url: String,
    pub input_selector: String,
    pub submit_selector: String,
    pub results_selector: String,
    /// Text the results element must contain, if any.
    pub results_text: Option<String>,
    pub absence_selector: String,
    pub payload_script: String,
    pub wait_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub min_interval_seconds: u64,
    pub retry: RetrySection,
}

impl SubtitleSection {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_seconds)
    }
}

impl Default for SubtitleSection {
    fn default() -> Self {
        Self {
            page_url: "https://www.kedou.life/caption/subtitle/bilibili".to_string(),
            input_selector: "input.el-input__inner".to_string(),
            submit_selector: "button.el-button".to_string(),
            results_selector: "a".to_string(),
            results_text: Some("下载".to_string()),
            absence_selector: "div.shouldnotexisted".to_string(),
            payload_script: "JSON.stringify(window.__NUXT__.pinia['captionStore']['subtitleExtractInfo'])"
                .to_string(),
            wait_timeout_seconds: 20,
            poll_interval_ms: 250,
            min_interval_seconds: 60,
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_images: bool,
    pub extension_dir: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: true,
            disable_images: true,
            extension_dir: None,
            window_width: 1920,
            window_height: 1080,
            request_timeout_seconds: None,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BilicacheConfig> {
    load_toml(path)
}

/// Loads the config file when it exists, falling back to defaults otherwise.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<BilicacheConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        Ok(BilicacheConfig::default())
    }
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let rest = raw.trim_start_matches('~').trim_start_matches('/');
            let home = PathBuf::from(home);
            return if rest.is_empty() { home } else { home.join(rest) };
        }
    }
    PathBuf::from(raw)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
