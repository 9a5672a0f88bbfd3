//! Inbound message dispatch.
//!
//! Answers bot commands directly and hands every other message to the
//! [`Pipeline`] in its own task.

use crate::channel::{notify, InboundMessage};
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const WELCOME_REPLY: &str = "Welcome! Send a YouTube link to download the audio.";
pub const HELP_REPLY: &str =
    "Send a link to a single YouTube video and I will reply with its audio as an MP3 file.";
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command. Send /help for usage.";

/// Routes inbound messages to command replies or pipeline tasks.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Process messages until the inbox closes or `cancel` fires.
    ///
    /// In-flight requests get a child token of `cancel`; on return every
    /// request has finished and the audit log is flushed.
    pub async fn run(&self, mut inbox: mpsc::Receiver<InboundMessage>, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => self.dispatch(message, &mut tasks, &cancel).await,
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Request task failed");
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for running requests");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Request task failed");
            }
        }

        self.pipeline.audit().flush().await;
        info!("Dispatcher stopped");
    }

    async fn dispatch(
        &self,
        message: InboundMessage,
        tasks: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) {
        let sink = self.pipeline.sink();

        match message.command() {
            Some("/start") => notify(sink, message.chat, WELCOME_REPLY).await,
            Some("/help") => notify(sink, message.chat, HELP_REPLY).await,
            Some(command) => {
                debug!(command, "Unknown command");
                notify(sink, message.chat, UNKNOWN_COMMAND_REPLY).await;
            }
            None => {
                let pipeline = Arc::clone(&self.pipeline);
                let token = cancel.child_token();
                tasks.spawn(async move {
                    pipeline.handle(message, token).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Artifact, ExtractionConfig, ExtractionFailure, Extractor, ProgressSample};
    use crate::audit::ActivityLogger;
    use crate::channel::{ChatId, MemorySink};
    use crate::config::Settings;
    use crate::locator::ValidatedLocator;
    use async_trait::async_trait;

    struct UnusedExtractor;

    #[async_trait]
    impl Extractor for UnusedExtractor {
        async fn extract(
            &self,
            _locator: &ValidatedLocator,
            _config: &ExtractionConfig,
            _progress: mpsc::Sender<ProgressSample>,
            _cancel: CancellationToken,
        ) -> Result<Artifact, ExtractionFailure> {
            panic!("commands must not reach the extractor");
        }
    }

    #[tokio::test]
    async fn test_commands_are_answered_directly() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let audit = ActivityLogger::spawn(dir.path().join("log.csv"));
        let pipeline = Pipeline::new(
            &Settings::default(),
            Arc::new(UnusedExtractor),
            sink.clone(),
            audit,
        );
        let dispatcher = Dispatcher::new(Arc::new(pipeline));

        let (tx, rx) = mpsc::channel(8);
        tx.send(InboundMessage::new("ada", "/start", ChatId(1))).await.unwrap();
        tx.send(InboundMessage::new("ada", "/help@lyd_bot", ChatId(1))).await.unwrap();
        tx.send(InboundMessage::new("ada", "/stop", ChatId(1))).await.unwrap();
        drop(tx);

        dispatcher.run(rx, CancellationToken::new()).await;

        assert_eq!(
            sink.texts(),
            vec![
                WELCOME_REPLY.to_string(),
                HELP_REPLY.to_string(),
                UNKNOWN_COMMAND_REPLY.to_string()
            ]
        );
        assert!(!dir.path().join("log.csv").exists());
    }

    #[tokio::test]
    async fn test_cancelled_dispatcher_returns() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let audit = ActivityLogger::spawn(dir.path().join("log.csv"));
        let pipeline = Pipeline::new(&Settings::default(), Arc::new(UnusedExtractor), sink, audit);
        let dispatcher = Dispatcher::new(Arc::new(pipeline));

        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        dispatcher.run(rx, cancel).await;
    }
}
