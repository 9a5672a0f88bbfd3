//! Error types for Lydbot.

use thiserror::Error;

/// Library-level error type for Lydbot operations.
#[derive(Error, Debug)]
pub enum LydError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid link: {0}")]
    InvalidLocator(String),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Never carries the request URL, which holds the bot token.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),
}

impl From<reqwest::Error> for LydError {
    fn from(e: reqwest::Error) -> Self {
        LydError::Http(e.without_url())
    }
}

/// Result type alias for Lydbot operations.
pub type Result<T> = std::result::Result<T, LydError>;
