//! Application configuration management.
//!
//! Persistent settings (tool commands, retry and arbitration tuning, cookies)
//! live in a JSON file under the user's config directory. Per-run choices made
//! on the command line are carried separately in [`RunOptions`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::arbitration::{AVC_BITRATE_MULTIPLIER, ArbitrationMode, ArbitrationPolicy};
use crate::catalog::ListingFormat;
use crate::error::{Error, FileSystemError, Result};
use crate::fs::FileSystem;
use crate::orchestrator::RetryPolicy;
use crate::tools::ToolCommand;

/// Default number of download attempts per stream.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Default pause between download attempts, in seconds.
pub const DEFAULT_BACKOFF_SECS: u64 = 5;

/// Name of the cookies file looked up in the downloads directory.
pub const COOKIES_FILE_NAME: &str = "cookies.txt";

/// External tool commands, each an argv prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsConfig {
    /// Download tool.
    #[serde(default = "default_downloader")]
    pub downloader: Vec<String>,
    /// Mux and transcode tool.
    #[serde(default = "default_muxer")]
    pub muxer: Vec<String>,
    /// Media info probe.
    #[serde(default = "default_mediainfo")]
    pub mediainfo: Vec<String>,
}

fn default_downloader() -> Vec<String> {
    vec!["yt-dlp".to_string()]
}

fn default_muxer() -> Vec<String> {
    vec!["ffmpeg".to_string()]
}

fn default_mediainfo() -> Vec<String> {
    vec!["mediainfo".to_string()]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            downloader: default_downloader(),
            muxer: default_muxer(),
            mediainfo: default_mediainfo(),
        }
    }
}

/// Download retry tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts per stream before the run is aborted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts, in seconds.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_backoff_secs() -> u64 {
    DEFAULT_BACKOFF_SECS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_secs: DEFAULT_BACKOFF_SECS,
        }
    }
}

/// Codec arbitration tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ArbitrationConfig {
    /// Bitrate equivalence factor between AVC and VP9.
    #[serde(default = "default_multiplier")]
    pub avc_bitrate_multiplier: f64,
    /// Whether auto mode also requires the bitrate margin.
    #[serde(default)]
    pub require_bitrate_margin: bool,
}

const fn default_multiplier() -> f64 {
    AVC_BITRATE_MULTIPLIER
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            avc_bitrate_multiplier: AVC_BITRATE_MULTIPLIER,
            require_bitrate_margin: false,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// External tool commands.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Download retry tuning.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Codec arbitration tuning.
    #[serde(default)]
    pub arbitration: ArbitrationConfig,
    /// Listing format requested from the download tool.
    #[serde(default)]
    pub listing: ListingFormat,
    /// Cookies file passed to the download tool. Falls back to
    /// `cookies.txt` in the downloads directory.
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default location, or create defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, writing defaults there if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: format!("Failed to create config directory: {e}"),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<()> {
        let tools = [
            ("downloader", &self.tools.downloader),
            ("muxer", &self.tools.muxer),
            ("mediainfo", &self.tools.mediainfo),
        ];
        for (name, argv) in tools {
            if argv.is_empty() || argv[0].trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "tools.{name} must name a program"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let multiplier = self.arbitration.avc_bitrate_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(Error::Configuration(format!(
                "arbitration.avc_bitrate_multiplier must be positive, got {multiplier}"
            )));
        }
        Ok(())
    }

    /// Download tool command.
    pub fn downloader(&self) -> Result<ToolCommand> {
        ToolCommand::from_argv(&self.tools.downloader)
    }

    /// Mux tool command.
    pub fn muxer(&self) -> Result<ToolCommand> {
        ToolCommand::from_argv(&self.tools.muxer)
    }

    /// Media info probe command.
    pub fn mediainfo(&self) -> Result<ToolCommand> {
        ToolCommand::from_argv(&self.tools.mediainfo)
    }

    /// Retry policy for downloads.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Duration::from_secs(self.retry.backoff_secs),
        }
    }

    /// Arbitration policy for `mode`.
    #[must_use]
    pub const fn arbitration_policy(&self, mode: ArbitrationMode) -> ArbitrationPolicy {
        ArbitrationPolicy {
            mode,
            bitrate_multiplier: self.arbitration.avc_bitrate_multiplier,
            require_bitrate_margin: self.arbitration.require_bitrate_margin,
        }
    }

    /// Cookies file to hand to the download tool, if one exists.
    pub fn locate_cookies<F: FileSystem>(&self, fs: &F) -> Option<PathBuf> {
        let candidate = self
            .cookies_path
            .clone()
            .or_else(|| dirs::download_dir().map(|d| d.join(COOKIES_FILE_NAME)))?;

        if fs.is_file(&candidate) {
            debug!(path = %candidate.display(), "Using cookies file");
            Some(candidate)
        } else {
            if self.cookies_path.is_some() {
                warn!(path = %candidate.display(), "Configured cookies file not found");
            }
            None
        }
    }
}

/// Default config file path.
#[must_use]
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytmux")
        .join("config.json")
}

/// Per-run choices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// How video streams are chosen.
    pub mode: ArbitrationMode,
    /// Keep the audio premux after a verified mux.
    pub keep_audio: bool,
    /// Also make an MP3 copy of the audio.
    pub mp3_copy: bool,
    /// Mux VP9 with uncompressed PCM audio for editing.
    pub lossless_audio: bool,
    /// Requested output file or directory.
    pub output: Option<PathBuf>,
    /// Listing format requested from the download tool.
    pub listing: ListingFormat,
}
