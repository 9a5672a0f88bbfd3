//! Audio extraction.
//!
//! The [`Extractor`] trait turns a validated link into an MP3 [`Artifact`];
//! [`YtDlpExtractor`] is the production implementation driving `yt-dlp`.

mod downloader;
pub mod progress;

pub use downloader::{classify_failure, parse_progress_line, YtDlpExtractor};
pub use progress::{Phase, ProgressEvent, ProgressMonitor, ProgressSample};

use crate::config::ExtractionSettings;
use crate::locator::ValidatedLocator;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Per-request extraction options.
///
/// Built fresh for every request; the request id keeps working directories apart.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub request_id: Uuid,
    /// yt-dlp executable.
    pub ytdlp_path: String,
    pub audio_format: String,
    /// Bitrate in kbit/s.
    pub audio_quality: String,
    /// Directory under which the request's own working directory is created.
    pub work_root: PathBuf,
    /// yt-dlp output template, relative to the request's working directory.
    pub output_template: String,
    pub cookies_file: Option<PathBuf>,
    pub no_playlist: bool,
    pub timeout: Duration,
}

impl ExtractionConfig {
    pub fn for_request(settings: &ExtractionSettings, work_root: &Path, request_id: Uuid) -> Self {
        Self {
            request_id,
            ytdlp_path: settings.ytdlp_path.clone(),
            audio_format: settings.audio_format.clone(),
            audio_quality: settings.audio_quality.clone(),
            work_root: work_root.to_path_buf(),
            output_template: "%(title).80B [%(id)s].%(ext)s".to_string(),
            cookies_file: settings.cookies_path(),
            no_playlist: true,
            timeout: settings.timeout(),
        }
    }

    /// Create this request's working directory.
    pub fn create_workdir(&self) -> std::io::Result<TempDir> {
        std::fs::create_dir_all(&self.work_root)?;
        tempfile::Builder::new()
            .prefix(&format!("lydbot-{}-", self.request_id))
            .tempdir_in(&self.work_root)
    }
}

/// Why an extraction produced no artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Removed, private, region-blocked or otherwise not downloadable.
    Unavailable,
    NetworkFailure,
    Timeout,
    /// The transcode step failed.
    PostprocessFailure,
    /// The tool reported success but no file was found.
    ArtifactMissing,
    /// The request was abandoned (shutdown).
    Cancelled,
}

impl FailureClass {
    /// Whether a fresh attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureClass::NetworkFailure)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Unavailable => write!(f, "unavailable"),
            FailureClass::NetworkFailure => write!(f, "network_failure"),
            FailureClass::Timeout => write!(f, "timeout"),
            FailureClass::PostprocessFailure => write!(f, "postprocess_failure"),
            FailureClass::ArtifactMissing => write!(f, "artifact_missing"),
            FailureClass::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Extraction failure: a class for control flow plus detail for the logs.
#[derive(Debug, Clone, Error)]
#[error("{class}: {detail}")]
pub struct ExtractionFailure {
    pub class: FailureClass,
    pub detail: String,
}

impl ExtractionFailure {
    pub fn new(class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
        }
    }
}

/// An extracted audio file.
///
/// Owns the request's working directory, so the file is deleted when the
/// artifact is dropped or discarded.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    byte_size: u64,
    title: String,
    workdir: TempDir,
}

impl Artifact {
    /// Wrap a file inside `workdir`. Fails if the file does not exist.
    pub fn new(path: PathBuf, title: impl Into<String>, workdir: TempDir) -> std::io::Result<Self> {
        let byte_size = std::fs::metadata(&path)?.len();
        Ok(Self {
            path,
            byte_size,
            title: title.into(),
            workdir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// File name used when sending the audio.
    pub fn file_name(&self) -> String {
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3");
        let stem: String = self
            .title
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
            .collect();
        let stem = stem.trim();

        if stem.is_empty() {
            format!("audio.{extension}")
        } else {
            format!("{stem}.{extension}")
        }
    }

    /// Delete the working directory now, logging instead of failing.
    pub fn discard(self) {
        let dir = self.workdir.path().to_path_buf();
        if let Err(e) = self.workdir.close() {
            warn!(dir = %dir.display(), error = %e, "Failed to remove working directory");
        }
    }
}

/// Trait for audio extraction backends.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract audio for `locator`.
    ///
    /// Raw progress samples go to `progress`; firing `cancel` stops the work and
    /// yields [`FailureClass::Cancelled`].
    async fn extract(
        &self,
        locator: &ValidatedLocator,
        config: &ExtractionConfig,
        progress: mpsc::Sender<ProgressSample>,
        cancel: CancellationToken,
    ) -> Result<Artifact, ExtractionFailure>;
}
