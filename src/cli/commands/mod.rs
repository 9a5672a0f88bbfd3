//! CLI command implementations.

mod config;
mod doctor;
mod grab;
mod run;
mod serve;

pub use config::run_config;
pub use doctor::run_doctor;
pub use grab::run_grab;
pub use run::run_bot;
pub use serve::{router, run_serve, AppState};

use crate::audio::YtDlpExtractor;
use crate::audit::ActivityLogger;
use crate::channel::ReplySink;
use crate::config::Settings;
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Pending inbound messages before the receiver applies backpressure.
const INBOX_CAPACITY: usize = 64;

/// Build the production pipeline around `sink`.
fn build_pipeline(settings: &Settings, sink: Arc<dyn ReplySink>) -> Arc<Pipeline> {
    let audit = ActivityLogger::spawn(settings.audit_log_path());
    Arc::new(Pipeline::new(
        settings,
        Arc::new(YtDlpExtractor::new()),
        sink,
        audit,
    ))
}
