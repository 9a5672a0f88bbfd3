//! In-memory reply sink.
//!
//! Records every reply instead of sending it. Audio sends can be made to fail a
//! fixed number of times to exercise retry paths.

use super::{ChatId, ReplySink};
use crate::error::{LydError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

/// A reply captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text { chat: ChatId, text: String },
    Audio { chat: ChatId, filename: String, size: usize },
}

/// Reply sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<SentMessage>>,
    audio_failures_left: AtomicU32,
    audio_attempts: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose first `failures` audio sends fail.
    pub fn failing_audio(failures: u32) -> Self {
        Self {
            audio_failures_left: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    /// All successfully recorded replies, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Text replies only.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMessage::Text { text, .. } => Some(text),
                SentMessage::Audio { .. } => None,
            })
            .collect()
    }

    /// Audio sends that went through.
    pub fn audio(&self) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| matches!(m, SentMessage::Audio { .. }))
            .collect()
    }

    /// Audio sends attempted, including failed ones.
    pub fn audio_attempts(&self) -> u32 {
        self.audio_attempts.load(Ordering::SeqCst)
    }

    fn push(&self, message: SentMessage) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

#[async_trait]
impl ReplySink for MemorySink {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()> {
        self.push(SentMessage::Text {
            chat,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_audio(&self, chat: ChatId, bytes: Vec<u8>, filename: &str) -> Result<()> {
        self.audio_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .audio_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LydError::Telegram("simulated send failure".to_string()));
        }

        self.push(SentMessage::Audio {
            chat,
            filename: filename.to_string(),
            size: bytes.len(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_failing_audio_recovers() {
        let sink = MemorySink::failing_audio(2);
        let chat = ChatId(7);

        assert_err!(sink.send_audio(chat, vec![1, 2, 3], "a.mp3").await);
        assert_err!(sink.send_audio(chat, vec![1, 2, 3], "a.mp3").await);
        assert_ok!(sink.send_audio(chat, vec![1, 2, 3], "a.mp3").await);

        assert_eq!(sink.audio_attempts(), 3);
        assert_eq!(
            sink.audio(),
            vec![SentMessage::Audio {
                chat,
                filename: "a.mp3".to_string(),
                size: 3
            }]
        );
    }
}
