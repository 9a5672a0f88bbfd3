//! Telegram Bot API client.
//!
//! Implements [`ReplySink`] over `sendMessage`/`sendAudio` and produces
//! [`InboundMessage`]s either from long polling (`getUpdates`) or from updates
//! pushed to the webhook server.

use super::{ChatId, InboundMessage, ReplySink};
use crate::error::{LydError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Pause after a failed getUpdates call.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// An incoming update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

impl User {
    /// Username, falling back to the first name, then the numeric id.
    pub fn identity(&self) -> String {
        self.username
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| Some(self.first_name.clone()).filter(|n| !n.is_empty()))
            .unwrap_or_else(|| self.id.to_string())
    }
}

impl Update {
    /// Convert a text message update into an inbound message. Other updates are ignored.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let message = self.message?;
        let text = message.text?;
        let requester = message
            .from
            .as_ref()
            .map(User::identity)
            .unwrap_or_else(|| "unknown".to_string());

        Some(InboundMessage::new(requester, text, ChatId(message.chat.id)))
    }
}

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: Url,
}

impl TelegramClient {
    /// Create a client for `token` against `api_base` (normally `https://api.telegram.org`).
    pub fn new(token: &str, api_base: &str) -> Result<Self> {
        let base = Url::parse(&format!("{}/bot{token}/", api_base.trim_end_matches('/')))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("lydbot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, base })
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        Ok(self.base.join(method)?)
    }

    /// Call a JSON method and unwrap the API envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.http.post(self.method_url(method)?).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response: ApiResponse<T> = request.send().await?.json().await?;
        unwrap_response(method, response)
    }

    /// Fetch pending updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        // Leave headroom over the server-side long-poll timeout.
        let timeout = Duration::from_secs(timeout_secs + 10);
        self.call("getUpdates", &body, Some(timeout)).await
    }

    /// Register a webhook URL.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<()> {
        let mut body = json!({ "url": url, "allowed_updates": ["message"] });
        if let Some(secret) = secret {
            body["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", &body, None).await?;
        Ok(())
    }

    /// Remove any webhook so getUpdates can be used.
    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self.call("deleteWebhook", &json!({}), None).await?;
        Ok(())
    }

    /// Long-poll for updates and forward text messages until cancelled or the receiver closes.
    #[instrument(skip_all)]
    pub async fn poll_updates(
        &self,
        tx: mpsc::Sender<InboundMessage>,
        timeout_secs: u64,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut offset = 0;
        info!("Polling Telegram for updates");

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.get_updates(offset, timeout_secs) => batch,
            };

            let updates = match batch {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.into_inbound() else {
                    continue;
                };
                debug!(chat = %message.chat, requester = %message.requester, "Received message");
                if tx.send(message).await.is_err() {
                    return Ok(());
                }
            }
        }

        info!("Stopped polling");
        Ok(())
    }
}

fn unwrap_response<T>(method: &str, response: ApiResponse<T>) -> Result<T> {
    if !response.ok {
        let description = response.description.unwrap_or_else(|| "no description".to_string());
        return Err(LydError::Telegram(format!("{method}: {description}")));
    }
    response
        .result
        .ok_or_else(|| LydError::Telegram(format!("{method}: missing result")))
}

#[async_trait]
impl ReplySink for TelegramClient {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()> {
        let body = json!({ "chat_id": chat.0, "text": text });
        let _: serde_json::Value = self.call("sendMessage", &body, None).await?;
        Ok(())
    }

    async fn send_audio(&self, chat: ChatId, bytes: Vec<u8>, filename: &str) -> Result<()> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("audio/mpeg")?;
        let form = Form::new()
            .text("chat_id", chat.0.to_string())
            .part("audio", part);

        let response: ApiResponse<serde_json::Value> = self
            .http
            .post(self.method_url("sendAudio")?)
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        unwrap_response("sendAudio", response).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url() {
        let client = TelegramClient::new("123:abc", "https://api.telegram.org").unwrap();
        assert_eq!(
            client.method_url("sendMessage").unwrap().as_str(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_update_into_inbound() {
        let update: Update = serde_json::from_str(
            r#"{
                "update_id": 10,
                "message": {
                    "message_id": 1,
                    "chat": {"id": 42, "type": "private"},
                    "from": {"id": 5, "is_bot": false, "first_name": "Ada", "username": "ada"},
                    "text": "https://youtu.be/dQw4w9WgXcQ"
                }
            }"#,
        )
        .unwrap();

        let message = update.into_inbound().unwrap();
        assert_eq!(message.requester, "ada");
        assert_eq!(message.chat, ChatId(42));
        assert_eq!(message.text, "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn test_identity_fallbacks() {
        let named = User { id: 5, username: None, first_name: "Ada".into() };
        assert_eq!(named.identity(), "Ada");

        let anonymous = User { id: 5, username: Some(String::new()), first_name: String::new() };
        assert_eq!(anonymous.identity(), "5");
    }

    #[test]
    fn test_non_text_updates_are_ignored() {
        let update: Update =
            serde_json::from_str(r#"{"update_id": 11, "message": {"chat": {"id": 1}}}"#).unwrap();
        assert!(update.into_inbound().is_none());

        let update: Update = serde_json::from_str(r#"{"update_id": 12}"#).unwrap();
        assert!(update.into_inbound().is_none());
    }

    #[tokio::test]
    async fn test_transport_errors_hide_token() {
        let client = TelegramClient::new("123456:SUPERSECRETTOKEN", "http://127.0.0.1:1").unwrap();

        let err = client.send_text(ChatId(1), "hello").await.unwrap_err();
        assert!(matches!(err, LydError::Http(_)));
        assert!(!err.to_string().contains("SUPERSECRETTOKEN"), "{err}");
        assert!(!format!("{err:?}").contains("SUPERSECRETTOKEN"));

        let err = client
            .send_audio(ChatId(1), b"ID3".to_vec(), "song.mp3")
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("SUPERSECRETTOKEN"), "{err}");

        let err = client.get_updates(0, 0).await.unwrap_err();
        assert!(!err.to_string().contains("SUPERSECRETTOKEN"), "{err}");
    }

    #[test]
    fn test_error_envelope() {
        let response: ApiResponse<bool> =
            serde_json::from_str(r#"{"ok": false, "description": "Unauthorized"}"#).unwrap();
        let err = unwrap_response("getMe", response).unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
    }
}
