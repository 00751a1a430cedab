//! Application Configuration
//!
//! Recognizer settings stored in TOML format. Every section falls back to its
//! defaults, so a partial file only needs the keys the user changed.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::autoblock::BlockVariant;
use crate::ocr::remote::RemoteService;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine selection
    pub recognizer: RecognizerConfig,
    /// Local Tesseract settings
    pub tesseract: TesseractConfig,
    /// Long-lived manga-ocr process settings
    pub manga_ocr: MangaOcrConfig,
    /// Remote OCR service settings
    pub remote: RemoteConfig,
    /// Automatic block detection settings
    pub auto_block: AutoBlockConfig,
    /// Text cleanup applied to every candidate
    pub postprocess: PostprocessConfig,
    /// Diagnostics
    pub debug: DebugConfig,
}

/// Which OCR engine handles recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Tesseract,
    MangaOcr,
    Remote,
}

/// Engine selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// OCR engine used for every request
    pub engine: EngineKind,
}

/// Local Tesseract settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Executable name or path
    pub executable: PathBuf,
    /// Primary language model
    pub language: String,
    /// Second model run as its own variant, skipped when not installed
    pub alternate_language: Option<String>,
    /// Page segmentation mode for the primary model
    pub psm: u32,
    /// Page segmentation mode for the alternate model
    pub alternate_psm: u32,
    /// Hard limit per invocation
    pub timeout_secs: u64,
    /// Maximum concurrent invocations
    pub max_parallel: usize,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tesseract"),
            language: "jpn".to_string(),
            alternate_language: Some("jpn_vert".to_string()),
            psm: 6,
            alternate_psm: 5,
            timeout_secs: 8,
            max_parallel: 8,
        }
    }
}

impl TesseractConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Long-lived manga-ocr process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MangaOcrConfig {
    /// Program and arguments that start the recognition server
    pub command: Vec<String>,
    /// Limit for the startup handshake (covers the first model download)
    pub startup_timeout_secs: u64,
    /// Limit for a single recognition
    pub request_timeout_secs: u64,
}

impl Default for MangaOcrConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "-u".to_string(),
                "-m".to_string(),
                "manga_ocr_server".to_string(),
            ],
            startup_timeout_secs: 600,
            request_timeout_secs: 10,
        }
    }
}

/// Remote OCR service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub service: RemoteService,
    /// API key; the engine is unavailable while empty
    pub api_key: String,
    /// Override the service's endpoint URL
    pub endpoint: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Waits before each retry of a transient failure
    pub retry_delays_secs: Vec<u64>,
    /// Language hint sent to the service
    pub language: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            service: RemoteService::default(),
            api_key: String::new(),
            endpoint: None,
            timeout_secs: 15,
            retry_delays_secs: vec![3, 3],
            language: "jpn".to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs.iter().map(|s| Duration::from_secs(*s)).collect()
    }
}

/// Automatic block detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBlockConfig {
    /// Heuristic tuning
    pub variant: BlockVariant,
    /// Size of the area captured around the selected point
    pub capture_width: u32,
    pub capture_height: u32,
}

impl Default for AutoBlockConfig {
    fn default() -> Self {
        Self {
            variant: BlockVariant::Manga,
            capture_width: 800,
            capture_height: 800,
        }
    }
}

/// One regex replacement applied to recognized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceRuleConfig {
    pub pattern: String,
    pub replacement: String,
}

/// Text cleanup applied to every candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    /// Remove spaces between Japanese characters
    pub correct_spacing: bool,
    /// Applied in order after correction
    pub replace_rules: Vec<ReplaceRuleConfig>,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            correct_spacing: true,
            replace_rules: Vec::new(),
        }
    }
}

/// Diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Publish auto-block overlays as events
    pub submit_images: bool,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
