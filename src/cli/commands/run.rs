//! Run command - serve the bot with long polling.

use super::{build_pipeline, INBOX_CAPACITY};
use crate::bot::Dispatcher;
use crate::channel::TelegramClient;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Poll Telegram for messages until `cancel` fires.
pub async fn run_bot(settings: Settings, cancel: CancellationToken) -> Result<()> {
    preflight::check(Operation::Bot, &settings)?;

    let token = settings.telegram_token()?;
    let client = TelegramClient::new(&token, &settings.telegram.api_base)?;

    // getUpdates is refused while a webhook is registered.
    client.delete_webhook().await?;

    let pipeline = build_pipeline(&settings, Arc::new(client.clone()));
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

    let poller = {
        let cancel = cancel.clone();
        let timeout = settings.telegram.poll_timeout_secs;
        tokio::spawn(async move { client.poll_updates(tx, timeout, cancel).await })
    };

    Output::header("Lydbot");
    Output::kv("Audit log", &settings.audit_log_path().display().to_string());
    Output::kv("Working directory", &settings.work_dir().display().to_string());
    Output::success("Polling for messages. Press Ctrl+C to stop.");

    Dispatcher::new(pipeline).run(rx, cancel.clone()).await;

    // The dispatcher also stops when polling ends on its own.
    cancel.cancel();
    poller.await??;

    Output::info("Stopped.");
    Ok(())
}
