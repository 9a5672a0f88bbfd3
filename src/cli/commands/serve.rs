//! Webhook server for Telegram updates.
//!
//! Telegram pushes updates to `POST /telegram/webhook`; they are handed to the
//! same dispatcher the polling mode uses.

use super::{build_pipeline, INBOX_CAPACITY};
use crate::bot::Dispatcher;
use crate::channel::telegram::Update;
use crate::channel::{InboundMessage, TelegramClient};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Header carrying the secret registered with `setWebhook`.
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared application state.
pub struct AppState {
    inbox: mpsc::Sender<InboundMessage>,
    secret: Option<String>,
}

impl AppState {
    pub fn new(inbox: mpsc::Sender<InboundMessage>, secret: Option<String>) -> Self {
        Self {
            inbox,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }
}

/// Build the webhook router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram/webhook", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the webhook server until `cancel` fires.
pub async fn run_serve(
    host: &str,
    port: u16,
    settings: Settings,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    preflight::check(Operation::Bot, &settings)?;

    let token = settings.telegram_token()?;
    let client = TelegramClient::new(&token, &settings.telegram.api_base)?;
    let secret = settings.telegram.webhook_secret.clone();

    match &settings.telegram.webhook_url {
        Some(url) if !url.is_empty() => {
            client.set_webhook(url, secret.as_deref()).await?;
            Output::info(&format!("Registered webhook {}", url));
        }
        _ => Output::warning(
            "telegram.webhook_url is not set; the webhook must be registered separately.",
        ),
    }

    let pipeline = build_pipeline(&settings, Arc::new(client));
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let app = router(Arc::new(AppState::new(tx, secret)));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Lydbot Webhook Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Telegram", "POST /telegram/webhook");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    let dispatcher = tokio::spawn({
        let cancel = cancel.clone();
        async move { Dispatcher::new(pipeline).run(rx, cancel).await }
    });

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    cancel.cancel();
    dispatcher.await?;

    Output::info("Stopped.");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if let Some(secret) = &state.secret {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(secret.as_str()) {
            warn!("Rejected webhook call with a wrong secret");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update_id = update.update_id;
    let Some(message) = update.into_inbound() else {
        debug!(update_id, "Ignoring non-text update");
        return StatusCode::OK;
    };

    match state.inbox.send(message).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
