use reqwest::{Client, Response};
use serde_json::Value;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::message::{Message, OutgoingMessage};
use crate::transport::Transport;

/// `GET /poll?id=<watermark>` and `POST /msg` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    poll_url: Url,
    send_url: Url,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_client(client, &config.base_url)
    }

    /// Use an existing reqwest client (shared connection pool, custom TLS, ...).
    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)?;
        // Keep any path prefix: "http://host/chat" polls "http://host/chat/poll"
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            poll_url: base.join("poll")?,
            send_url: base.join("msg")?,
        })
    }

    pub fn poll_url(&self) -> &Url {
        &self.poll_url
    }

    pub fn send_url(&self) -> &Url {
        &self.send_url
    }
}

impl Transport for HttpTransport {
    async fn fetch_since(&self, watermark: u64) -> Result<Vec<Message>> {
        log::debug!("GET {} id={}", self.poll_url, watermark);

        let response = self
            .client
            .get(self.poll_url.clone())
            .query(&[("id", watermark)])
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| SyncError::MalformedPayload(format!("poll response is not JSON: {}", e)))?;
        decode_batch(value)
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<Vec<Message>> {
        log::debug!("POST {} author={} ({} bytes)", self.send_url, message.author, message.text.len());

        let response = self
            .client
            .post(self.send_url.clone())
            .form(message)
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        // The server is not required to echo anything back
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(value @ Value::Array(_)) => decode_batch(value),
            Ok(_) | Err(_) => {
                log::debug!("POST {} returned no message list, ignoring body", self.send_url);
                Ok(Vec::new())
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Server { status, body })
}

/// Decode a JSON array of messages, skipping elements that don't parse.
fn decode_batch(value: Value) -> Result<Vec<Message>> {
    let Value::Array(items) = value else {
        return Err(SyncError::MalformedPayload(format!(
            "expected a JSON array of messages, got {}",
            json_kind(&value)
        )));
    };

    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        match Message::from_value(item) {
            Ok(message) => messages.push(message),
            Err(e) => log::warn!("Skipping message: {}", e),
        }
    }
    Ok(messages)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
