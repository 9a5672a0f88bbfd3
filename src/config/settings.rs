//! Configuration settings for Lydbot.

use crate::error::{LydError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the Telegram bot token.
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub telegram: TelegramSettings,
    pub extraction: ExtractionSettings,
    pub delivery: DeliverySettings,
    pub progress: ProgressSettings,
    pub audit: AuditSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Root directory for per-request working directories.
    pub work_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.lydbot".to_string(),
            work_dir: "/tmp/lydbot".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    /// Bot token. `TELEGRAM_BOT_TOKEN` takes precedence when set.
    pub token: Option<String>,
    /// Bot API base URL.
    pub api_base: String,
    /// Long-polling timeout for getUpdates, in seconds.
    pub poll_timeout_secs: u64,
    /// Public URL registered with setWebhook when running `serve`.
    pub webhook_url: Option<String>,
    /// Secret expected in the X-Telegram-Bot-Api-Secret-Token header.
    pub webhook_secret: Option<String>,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

/// Settings for the yt-dlp extraction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// yt-dlp executable name or path.
    pub ytdlp_path: String,
    /// Target audio container.
    pub audio_format: String,
    /// Target bitrate in kbit/s.
    pub audio_quality: String,
    /// Netscape-format cookies file passed to yt-dlp.
    pub cookies_file: Option<String>,
    /// Wall-clock limit for a single extraction.
    pub timeout_secs: u64,
    /// Maximum number of extractions running at once.
    pub max_concurrent: usize,
    /// Extra attempts after a network failure.
    pub network_retries: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            audio_format: "mp3".to_string(),
            audio_quality: "320".to_string(),
            cookies_file: None,
            timeout_secs: 600,
            max_concurrent: 2,
            network_retries: 1,
        }
    }
}

impl ExtractionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Expanded cookies file path, if configured.
    pub fn cookies_path(&self) -> Option<PathBuf> {
        self.cookies_file
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Settings::expand_path)
    }
}

/// Audio delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Attempts before the send is reported as failed, between 1 and 3.
    pub max_attempts: u32,
    /// Pause before the failure reply after the last attempt.
    pub final_failure_delay_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            final_failure_delay_ms: 1000,
        }
    }
}

/// Progress reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    /// A progress reply is sent each time the percentage crosses a multiple of this step.
    pub step_percent: f64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self { step_percent: 10.0 }
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// CSV file receiving one row per completed request.
    pub log_path: String,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_path: "~/.lydbot/downloads_log.csv".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LydError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lydbot")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded per-request working root.
    pub fn work_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.work_dir)
    }

    /// Get the expanded audit log path.
    pub fn audit_log_path(&self) -> PathBuf {
        Self::expand_path(&self.audit.log_path)
    }

    /// Resolve the bot token from the environment, falling back to the config file.
    pub fn telegram_token(&self) -> Result<String> {
        let from_env = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
        let from_file = self.telegram.token.clone().filter(|t| !t.trim().is_empty());

        from_env.or(from_file).ok_or_else(|| {
            LydError::Config(format!(
                "{TOKEN_ENV} not set. Export it or add it to a .env file."
            ))
        })
    }

    /// Set a value by dotted key (e.g. "extraction.timeout_secs").
    ///
    /// The value is parsed as TOML first, so numbers and booleans keep their type;
    /// anything that does not parse is stored as a string.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, field) = key
            .split_once('.')
            .ok_or_else(|| LydError::Config(format!("Expected section.field, got '{key}'")))?;

        let mut root = toml::Value::try_from(&*self).map_err(|e| LydError::Config(e.to_string()))?;
        let table = root
            .get_mut(section)
            .and_then(toml::Value::as_table_mut)
            .ok_or_else(|| LydError::Config(format!("Unknown section '{section}'")))?;

        let parsed = toml::from_str::<toml::Table>(&format!("v = {value}"))
            .ok()
            .and_then(|mut t| t.remove("v"))
            .unwrap_or_else(|| toml::Value::String(value.to_string()));
        table.insert(field.to_string(), parsed);

        *self = root.try_into().map_err(|e: toml::de::Error| {
            LydError::Config(format!("Invalid value for '{key}': {e}"))
        })?;
        Ok(())
    }
}
