use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_CAPTION_MAX_LEN, DEFAULT_CONCURRENT_DOWNLOADS, DEFAULT_CONNECTION_ATTEMPTS,
    DEFAULT_EXTRACTOR_TIMEOUT, DEFAULT_MAX_FILE_SIZE_MB, MB, TG_MAX_CAPTION_LEN,
};

pub trait Param<T> {
    fn param(&self) -> T;
}

impl<T: Clone> Param<T> for T {
    fn param(&self) -> T {
        self.clone()
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub bot: BotConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub tiktok: TikTokConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub captions: CaptionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    /// Load and validate the config. Adjustments made along the way are
    /// returned as warnings, to be logged once logging is set up.
    pub fn load_from<P: AsRef<Path>>(path: P) -> anyhow::Result<(Self, Vec<String>)> {
        let path = path.as_ref();
        let config_context = fs_err::read_to_string(path)?;
        let mut config: Self = toml::from_str(&config_context)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        let warnings = config.validate()?;
        fs_err::create_dir_all(&config.downloads.output_dir)?;
        fs_err::create_dir_all(&config.downloads.temp_dir)?;
        Ok((config, warnings))
    }

    fn validate(&mut self) -> anyhow::Result<Vec<String>> {
        let mut warnings = vec![];
        if self.bot.token.trim().is_empty() {
            anyhow::bail!("missing required config field: bot.token");
        }
        if self.downloads.concurrent_downloads == 0 {
            anyhow::bail!("downloads.concurrent_downloads must be at least 1");
        }
        if self.downloads.max_file_size_mb == 0 {
            anyhow::bail!("downloads.max_file_size_mb must be at least 1");
        }
        if self.captions.max_length > TG_MAX_CAPTION_LEN {
            warnings.push(format!(
                "captions.max_length {} is above the telegram limit, clamping to {TG_MAX_CAPTION_LEN}",
                self.captions.max_length
            ));
            self.captions.max_length = TG_MAX_CAPTION_LEN;
        }
        Ok(warnings)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct BotConfig {
    pub token: String,
    pub admin_user_id: Option<i64>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub max_file_size_mb: u64,
    pub concurrent_downloads: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            temp_dir: PathBuf::from("downloads/tmp"),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
        }
    }
}

impl DownloadConfig {
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(MB)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ExtractorConfig {
    pub ytdlp_path: PathBuf,
    pub timeout_secs: u64,
    pub cookies_file: Option<PathBuf>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            timeout_secs: DEFAULT_EXTRACTOR_TIMEOUT.as_secs(),
            cookies_file: None,
        }
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TikTokConfig {
    pub quality: String,
    pub format: String,
    pub extract_audio: bool,
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            quality: "best".to_string(),
            format: "mp4".to_string(),
            extract_audio: false,
        }
    }
}

impl TikTokConfig {
    /// yt-dlp format selector, falls back to any container of the same quality.
    pub fn format_selector(&self) -> String {
        format!("{q}[ext={f}]/{q}", q = self.quality, f = self.format)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct InstagramConfig {
    pub max_connection_attempts: u32,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            max_connection_attempts: DEFAULT_CONNECTION_ATTEMPTS,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CaptionConfig {
    pub include_platform: bool,
    pub include_username: bool,
    pub include_date: bool,
    pub include_title: bool,
    pub max_length: usize,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            include_platform: true,
            include_username: true,
            include_date: true,
            include_title: true,
            max_length: DEFAULT_CAPTION_MAX_LEN,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    // no file output when unset
    pub dir: Option<PathBuf>,
    pub file_name: String,
    pub rotation: LogRotation,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_name: "bot.log".to_string(),
            rotation: LogRotation::Daily,
            max_files: 5,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Param<BotConfig> for Config {
    fn param(&self) -> BotConfig {
        self.bot.clone()
    }
}

impl Param<DownloadConfig> for Config {
    fn param(&self) -> DownloadConfig {
        self.downloads.clone()
    }
}

impl Param<ExtractorConfig> for Config {
    fn param(&self) -> ExtractorConfig {
        self.extractor.clone()
    }
}

impl Param<TikTokConfig> for Config {
    fn param(&self) -> TikTokConfig {
        self.tiktok.clone()
    }
}

impl Param<InstagramConfig> for Config {
    fn param(&self) -> InstagramConfig {
        self.instagram.clone()
    }
}

impl Param<CaptionConfig> for Config {
    fn param(&self) -> CaptionConfig {
        self.captions.clone()
    }
}
