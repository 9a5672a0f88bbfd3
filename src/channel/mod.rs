//! Conversational channel abstraction for Lydbot.
//!
//! The request pipeline only talks to a [`ReplySink`] and consumes
//! [`InboundMessage`]s; Telegram, the local console and the in-memory test sink
//! are interchangeable behind it.

mod console;
mod memory;
pub mod telegram;

pub use console::ConsoleSink;
pub use memory::{MemorySink, SentMessage};
pub use telegram::TelegramClient;

use crate::audio::ProgressEvent;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Identifier of the conversation a reply goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Username, or a fallback display identity.
    pub requester: String,
    pub text: String,
    pub chat: ChatId,
}

impl InboundMessage {
    pub fn new(requester: impl Into<String>, text: impl Into<String>, chat: ChatId) -> Self {
        Self {
            requester: requester.into(),
            text: text.into(),
            chat,
        }
    }

    /// The bot command in this message (`/start`, `/help`), without any `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        let first = self.text.split_whitespace().next()?;
        if !first.starts_with('/') {
            return None;
        }
        Some(first.split('@').next().unwrap_or(first))
    }
}

/// Trait for outbound reply channels.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Send a text reply.
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()>;

    /// Send an audio file.
    async fn send_audio(&self, chat: ChatId, bytes: Vec<u8>, filename: &str) -> Result<()>;

    /// Report extraction progress. Defaults to a text reply.
    async fn send_progress(&self, chat: ChatId, event: &ProgressEvent) -> Result<()> {
        self.send_text(chat, &event.describe()).await
    }
}

/// Send a text reply, logging instead of failing.
pub async fn notify(sink: &dyn ReplySink, chat: ChatId, text: &str) {
    if let Err(e) = sink.send_text(chat, text).await {
        warn!(%chat, error = %e, "Failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        let chat = ChatId(1);
        assert_eq!(InboundMessage::new("a", "/start", chat).command(), Some("/start"));
        assert_eq!(
            InboundMessage::new("a", "/help@lyd_bot extra", chat).command(),
            Some("/help")
        );
        assert_eq!(
            InboundMessage::new("a", "https://youtu.be/dQw4w9WgXcQ", chat).command(),
            None
        );
        assert_eq!(InboundMessage::new("a", "", chat).command(), None);
    }
}
