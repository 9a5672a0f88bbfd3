//! Append-only CSV audit log of handled requests.
//!
//! All writes go through a single writer task, so concurrent pipelines never
//! interleave rows. Logging is best-effort: failures are reported through
//! `tracing` and never reach the caller.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// First line of every audit file.
pub const HEADER: &str = "Identity,Locator,Timestamp,Outcome";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Final outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "Success"),
            Outcome::Failure => write!(f, "Failure"),
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub requester: String,
    /// The locator as the user sent it.
    pub locator: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

impl ActivityRecord {
    pub fn new(requester: impl Into<String>, locator: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            requester: requester.into(),
            locator: locator.into(),
            timestamp: Utc::now(),
            outcome,
        }
    }

    /// Render as a CSV row without the line terminator.
    pub fn to_csv_row(&self) -> String {
        [
            escape(&self.requester),
            escape(&self.locator),
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.outcome.to_string(),
        ]
        .join(",")
    }
}

/// Quote a field if it contains a separator, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

enum Command {
    Record(ActivityRecord),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    tx: mpsc::UnboundedSender<Command>,
    path: Arc<PathBuf>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Record(record) => f.debug_tuple("Record").field(record).finish(),
            Command::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl ActivityLogger {
    /// Start the writer task for the CSV file at `path`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = Arc::new(path.into());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&path), rx));
        Self { tx, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a record for writing.
    pub fn record(&self, record: ActivityRecord) {
        if self.tx.send(Command::Record(record)).is_err() {
            error!(path = %self.path.display(), "Audit writer has stopped, record dropped");
        }
    }

    /// Wait until every record queued so far has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(path: Arc<PathBuf>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(record) => match append(&path, &record).await {
                Ok(()) => debug!(outcome = %record.outcome, "Audit row written"),
                Err(e) => error!(path = %path.display(), error = %e, "Failed to write audit row"),
            },
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn append(path: &Path, record: &ActivityRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut text = String::new();
    if file.metadata().await?.len() == 0 {
        text.push_str(HEADER);
        text.push('\n');
    }
    text.push_str(&record.to_csv_row());
    text.push('\n');

    file.write_all(text.as_bytes()).await?;
    file.flush().await
}
