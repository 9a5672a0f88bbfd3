//! Grab command - run one link through the pipeline locally.

use super::build_pipeline;
use crate::audit::Outcome;
use crate::channel::{ChatId, ConsoleSink, InboundMessage};
use crate::cli::preflight::{self, Operation};
use crate::cli::{format_size, Output};
use crate::config::Settings;
use crate::error::LydError;
use crate::locator;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Chat id used for local requests.
const LOCAL_CHAT: ChatId = ChatId(0);

/// Download `url` into `out_dir`, replying on the terminal.
pub async fn run_grab(
    url: &str,
    out_dir: &Path,
    settings: Settings,
    cancel: CancellationToken,
) -> Result<()> {
    preflight::check(Operation::Grab, &settings)?;

    let sink = Arc::new(ConsoleSink::new(out_dir));
    let pipeline = build_pipeline(&settings, sink.clone());

    let requester = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    let message = InboundMessage::new(requester, url, LOCAL_CHAT);

    let outcome = pipeline.handle(message, cancel).await;
    pipeline.audit().flush().await;
    sink.finish();

    match (outcome, sink.saved_path()) {
        (Outcome::Success, Some(path)) => {
            let size = std::fs::metadata(&path)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "unknown size".to_string());
            Output::success(&format!("Saved {} ({})", path.display(), size));
            Ok(())
        }
        _ if !locator::validate(url) => Err(LydError::InvalidLocator(url.to_string()).into()),
        _ => anyhow::bail!("Could not download {}", url),
    }
}
