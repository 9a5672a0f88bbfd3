//! Sending extracted audio back to the requester.

use crate::audio::Artifact;
use crate::channel::{notify, ChatId, ReplySink};
use crate::config::DeliverySettings;
use crate::error::{LydError, Result};
use crate::retry::retry;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{error, info, instrument};

/// Reply sent when every attempt failed.
pub const DELIVERY_FAILED_REPLY: &str =
    "Sorry, I could not send the audio file. Please try again later.";

/// Upper bound on send attempts, whatever the configuration says.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Result of delivering one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Sends artifacts through a reply sink with bounded retries.
#[derive(Debug, Clone)]
pub struct DeliveryManager {
    max_attempts: u32,
    final_failure_delay: Duration,
}

impl DeliveryManager {
    pub fn new(max_attempts: u32, final_failure_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_DELIVERY_ATTEMPTS),
            final_failure_delay,
        }
    }

    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.final_failure_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Send `artifact` to `chat`.
    ///
    /// On persistent failure the user gets [`DELIVERY_FAILED_REPLY`] after the
    /// configured pause.
    #[instrument(skip_all, fields(%chat, file = %artifact.file_name()))]
    pub async fn deliver(
        &self,
        artifact: &Artifact,
        chat: ChatId,
        sink: &dyn ReplySink,
    ) -> DeliveryOutcome {
        let filename = artifact.file_name();
        let filename = filename.as_str();

        let outcome = retry(self.max_attempts, |_: &LydError| true, move |_| async move {
            let bytes = read_artifact(artifact).await?;
            sink.send_audio(chat, bytes, filename).await
        })
        .await;

        let success = outcome.is_ok();
        match &outcome.result {
            Ok(()) => {
                info!(attempts = outcome.attempts, bytes = artifact.byte_size(), "Audio delivered");
            }
            Err(e) => {
                error!(attempts = outcome.attempts, error = %e, "Giving up on audio delivery");
                tokio::time::sleep(self.final_failure_delay).await;
                notify(sink, chat, DELIVERY_FAILED_REPLY).await;
            }
        }

        DeliveryOutcome {
            success,
            attempts: outcome.attempts,
        }
    }
}

/// Read the whole artifact. The handle is closed before the send starts.
async fn read_artifact(artifact: &Artifact) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(artifact.path()).await?;
    let mut bytes = Vec::with_capacity(artifact.byte_size() as usize);
    file.read_to_end(&mut bytes).await?;
    Ok(bytes)
}
