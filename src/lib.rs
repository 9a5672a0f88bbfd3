//! Lydbot - YouTube audio over Telegram
//!
//! A Telegram bot that takes a YouTube link, extracts the audio with `yt-dlp`,
//! reports progress in the chat, sends back an MP3 file and keeps a CSV audit
//! trail of every request.
//!
//! The name comes from the Norwegian word "lyd", meaning "sound".
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `locator` - YouTube link validation
//! - `audio` - Extraction through `yt-dlp` and progress normalization
//! - `channel` - Reply sinks and inbound messages (Telegram, console, memory)
//! - `delivery` - Sending the audio file with bounded retries
//! - `audit` - Append-only CSV activity log
//! - `pipeline` - Per-request state machine tying the above together
//! - `bot` - Dispatch of inbound messages to commands and pipelines
//!
//! # Example
//!
//! ```rust,no_run
//! use lydbot::audio::YtDlpExtractor;
//! use lydbot::audit::ActivityLogger;
//! use lydbot::channel::{ChatId, InboundMessage, MemorySink};
//! use lydbot::config::Settings;
//! use lydbot::pipeline::Pipeline;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let sink = Arc::new(MemorySink::new());
//!     let audit = ActivityLogger::spawn(settings.audit_log_path());
//!     let pipeline = Pipeline::new(&settings, Arc::new(YtDlpExtractor::new()), sink.clone(), audit);
//!
//!     let message = InboundMessage::new("ada", "https://youtu.be/dQw4w9WgXcQ", ChatId(1));
//!     let outcome = pipeline.handle(message, CancellationToken::new()).await;
//!     println!("{outcome}: {:?}", sink.texts());
//!
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod audit;
pub mod bot;
pub mod channel;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod locator;
pub mod pipeline;
pub mod retry;

pub use error::{LydError, Result};
