use async_trait::async_trait;
use log::info;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::db::DynError;

/// Bot API upload limit for sendVideo
pub const MAX_BOT_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn send_video(&self, destination: &str, path: &Path, caption: &str)
        -> Result<(), DynError>;

    async fn send_message(&self, destination: &str, text: &str) -> Result<(), DynError>;
}

pub fn recording_caption(username: &str) -> String {
    format!("🔴 Live recording from @{}", username)
}

pub fn live_notice(username: &str) -> String {
    format!("🟢 @{} is live, recording started", username)
}

#[derive(Debug, Deserialize)]
struct BotResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramForwarder {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
}

impl TelegramForwarder {
    pub fn new(api_url: &str, bot_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    async fn check_response(response: reqwest::Response, method: &str) -> Result<(), DynError> {
        let status = response.status();
        let body: BotResponse = response
            .json()
            .await
            .map_err(|e| format!("Invalid {} response (HTTP {}): {}", method, status, e))?;
        if !body.ok {
            return Err(format!(
                "{} failed (HTTP {}): {}",
                method,
                status,
                body.description.unwrap_or_default()
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Forwarder for TelegramForwarder {
    async fn send_video(&self, chat_id: &str, path: &Path, caption: &str) -> Result<(), DynError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("Cannot read '{}': {}", path.display(), e))?
            .len();
        if size > MAX_BOT_UPLOAD_BYTES {
            return Err(format!(
                "'{}' is {} bytes, over the {} byte bot upload limit",
                path.display(),
                size,
                MAX_BOT_UPLOAD_BYTES
            )
            .into());
        }

        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "recording.mp4".to_string());
        let part = Part::bytes(data).file_name(file_name).mime_str("video/mp4")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("supports_streaming", "true")
            .part("video", part);

        let response = self
            .client
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;
        Self::check_response(response, "sendVideo").await?;
        info!("Sent {} to chat {}", path.display(), chat_id);
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DynError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .timeout(MESSAGE_TIMEOUT)
            .send()
            .await?;
        Self::check_response(response, "sendMessage").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caption() {
        assert_eq!(recording_caption("alice"), "🔴 Live recording from @alice");
    }

    #[test]
    fn test_method_url_trims_trailing_slash() {
        let forwarder = TelegramForwarder::new("http://localhost:9000/", "123:abc".to_string());
        assert_eq!(
            forwarder.method_url("sendVideo"),
            "http://localhost:9000/bot123:abc/sendVideo"
        );
    }
}
