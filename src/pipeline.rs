//! Per-request pipeline: validate, extract, deliver, log.
//!
//! Every inbound link message runs through [`Pipeline::handle`] in its own task.
//! The pipeline never fails to its caller; every path ends with an audit row
//! and an [`Outcome`].

use crate::audio::{
    Artifact, ExtractionConfig, ExtractionFailure, Extractor, FailureClass, ProgressMonitor,
    ProgressSample,
};
use crate::audit::{ActivityLogger, ActivityRecord, Outcome};
use crate::channel::{notify, ChatId, InboundMessage, ReplySink};
use crate::config::{ExtractionSettings, Settings};
use crate::delivery::DeliveryManager;
use crate::locator::ValidatedLocator;
use crate::retry::retry;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub const INVALID_LINK_REPLY: &str = "Error: Please send a valid YouTube link.";
pub const STARTED_REPLY: &str = "Download started. Please wait...";
pub const EXTRACTION_FAILED_REPLY: &str = "Error: Unable to download the audio.";
pub const COMPLETE_REPLY: &str = "Download complete. Sending audio file...";
pub const UNEXPECTED_REPLY: &str = "Sorry, something went wrong. Please try again.";

/// Buffered progress samples between the extractor and the reply forwarder.
const PROGRESS_BUFFER: usize = 32;

/// One user request, created when a message arrives.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub id: Uuid,
    pub requester: String,
    pub chat: ChatId,
    /// The link exactly as sent, minus surrounding whitespace.
    pub locator: String,
    pub submitted_at: DateTime<Utc>,
}

impl DownloadRequest {
    pub fn new(message: &InboundMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester: message.requester.clone(),
            chat: message.chat,
            locator: message.text.trim().to_string(),
            submitted_at: Utc::now(),
        }
    }
}

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Validating,
    Extracting,
    Delivering,
    Logged(Outcome),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Received => write!(f, "received"),
            PipelineState::Validating => write!(f, "validating"),
            PipelineState::Extracting => write!(f, "extracting"),
            PipelineState::Delivering => write!(f, "delivering"),
            PipelineState::Logged(outcome) => write!(f, "logged({outcome})"),
        }
    }
}

fn transition(request: &DownloadRequest, state: PipelineState) {
    debug!(request_id = %request.id, %state, "Pipeline state");
}

/// Shared request pipeline.
pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn ReplySink>,
    audit: ActivityLogger,
    delivery: DeliveryManager,
    extraction: ExtractionSettings,
    work_root: PathBuf,
    permits: Arc<Semaphore>,
    progress_step: f64,
}

impl Pipeline {
    pub fn new(
        settings: &Settings,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn ReplySink>,
        audit: ActivityLogger,
    ) -> Self {
        Self {
            extractor,
            sink,
            audit,
            delivery: DeliveryManager::from_settings(&settings.delivery),
            extraction: settings.extraction.clone(),
            work_root: settings.work_dir(),
            permits: Arc::new(Semaphore::new(settings.extraction.max_concurrent.max(1))),
            progress_step: settings.progress.step_percent,
        }
    }

    /// Replace the delivery policy.
    pub fn with_delivery(mut self, delivery: DeliveryManager) -> Self {
        self.delivery = delivery;
        self
    }

    /// Replace the directory under which per-request working directories are created.
    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn sink(&self) -> &dyn ReplySink {
        self.sink.as_ref()
    }

    pub fn audit(&self) -> &ActivityLogger {
        &self.audit
    }

    /// Run one message through the pipeline.
    ///
    /// Panics are caught here and turned into an apology reply, so one bad
    /// request never takes the service down.
    pub async fn handle(&self, message: InboundMessage, cancel: CancellationToken) -> Outcome {
        let request = DownloadRequest::new(&message);
        transition(&request, PipelineState::Received);

        let outcome = match AssertUnwindSafe(self.run(&request, &cancel))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    request_id = %request.id,
                    panic = panic_message(&*panic),
                    "Pipeline panicked"
                );
                notify(self.sink(), request.chat, UNEXPECTED_REPLY).await;
                Outcome::Failure
            }
        };

        self.audit
            .record(ActivityRecord::new(&request.requester, &request.locator, outcome));
        transition(&request, PipelineState::Logged(outcome));
        outcome
    }

    #[instrument(skip_all, fields(request_id = %request.id, requester = %request.requester))]
    async fn run(&self, request: &DownloadRequest, cancel: &CancellationToken) -> Outcome {
        transition(request, PipelineState::Validating);
        let Some(locator) = ValidatedLocator::parse(&request.locator) else {
            info!("Rejected invalid link");
            notify(self.sink(), request.chat, INVALID_LINK_REPLY).await;
            return Outcome::Failure;
        };

        transition(request, PipelineState::Extracting);
        let artifact = match self.extract(request, &locator, cancel).await {
            Ok(artifact) => artifact,
            Err(failure) if failure.class == FailureClass::Cancelled => {
                info!("Request abandoned");
                return Outcome::Failure;
            }
            Err(failure) => {
                warn!(class = %failure.class, detail = %failure.detail, "Extraction failed");
                notify(self.sink(), request.chat, EXTRACTION_FAILED_REPLY).await;
                return Outcome::Failure;
            }
        };

        notify(self.sink(), request.chat, COMPLETE_REPLY).await;

        transition(request, PipelineState::Delivering);
        let delivered = self
            .delivery
            .deliver(&artifact, request.chat, self.sink())
            .await;
        artifact.discard();

        if delivered.success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    /// Extract with progress forwarding, a concurrency permit and the network retry.
    async fn extract(
        &self,
        request: &DownloadRequest,
        locator: &ValidatedLocator,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ExtractionFailure> {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let forwarder = tokio::spawn(forward_progress(
            rx,
            Arc::clone(&self.sink),
            request.chat,
            self.progress_step,
        ));

        let result = self.extract_with_permit(request, locator, cancel, tx).await;

        // A failed extractor may leave stray readers holding a sender.
        match &result {
            Ok(_) => {
                let _ = forwarder.await;
            }
            Err(_) => forwarder.abort(),
        }
        result
    }

    async fn extract_with_permit(
        &self,
        request: &DownloadRequest,
        locator: &ValidatedLocator,
        cancel: &CancellationToken,
        progress: mpsc::Sender<ProgressSample>,
    ) -> Result<Artifact, ExtractionFailure> {
        let _permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                let _ = progress.send(ProgressSample::status("queued")).await;
                tokio::select! {
                    permit = self.permits.acquire() => permit.map_err(|_| {
                        ExtractionFailure::new(FailureClass::Cancelled, "extraction slots closed")
                    })?,
                    _ = cancel.cancelled() => {
                        return Err(ExtractionFailure::new(
                            FailureClass::Cancelled,
                            "abandoned while queued",
                        ));
                    }
                }
            }
        };

        notify(self.sink(), request.chat, STARTED_REPLY).await;

        let config = ExtractionConfig::for_request(&self.extraction, &self.work_root, request.id);
        let config = &config;
        let extractor = self.extractor.as_ref();
        let attempts = self.extraction.network_retries + 1;

        let outcome = retry(
            attempts,
            |failure: &ExtractionFailure| failure.class.is_transient(),
            move |attempt| {
                debug!(attempt, "Running extractor");
                let progress = progress.clone();
                let cancel = cancel.clone();
                async move { extractor.extract(locator, config, progress, cancel).await }
            },
        )
        .await;

        outcome.result
    }
}

/// Turn raw samples into progress replies until every sender is gone.
async fn forward_progress(
    mut rx: mpsc::Receiver<ProgressSample>,
    sink: Arc<dyn ReplySink>,
    chat: ChatId,
    step_percent: f64,
) {
    let mut monitor = ProgressMonitor::new(step_percent);

    while let Some(sample) = rx.recv().await {
        let event = monitor.on_sample(&sample);
        if !monitor.should_forward(&event) {
            continue;
        }
        if let Err(e) = sink.send_progress(chat, &event).await {
            debug!(%chat, error = %e, "Progress reply failed");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_message() {
        let message = InboundMessage::new("ada", "  https://youtu.be/dQw4w9WgXcQ \n", ChatId(3));
        let a = DownloadRequest::new(&message);
        let b = DownloadRequest::new(&message);

        assert_eq!(a.locator, "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(a.requester, "ada");
        assert_eq!(a.chat, ChatId(3));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Extracting.to_string(), "extracting");
        assert_eq!(
            PipelineState::Logged(Outcome::Success).to_string(),
            "logged(Success)"
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(&*payload), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
