use crate::traits::OutboundChannel;
use crate::types::{ActionCard, OutboundText};
use anyhow::{Result, anyhow};
use reqwest::Url;
use serde_json::{Value, json};
use std::time::Duration;

/// Delivers outbound events to an external bridge as JSON over HTTP.
#[derive(Clone)]
pub struct HttpPluginChannel {
    http: reqwest::Client,
    channel_id: String,
    send_url: String,
    auth_token: Option<String>,
}

impl HttpPluginChannel {
    pub fn new(channel_id: &str, send_url: &str) -> Result<Self> {
        let channel_id = normalize_plugin_channel_id(channel_id)?;
        let send_url = normalize_http_url(send_url, "send_url")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            channel_id,
            send_url,
            auth_token: None,
        })
    }

    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);
        self
    }

    fn authorized_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post(&self, payload: Value) -> Result<()> {
        let url = Url::parse(&self.send_url).map_err(|e| {
            anyhow!(
                "invalid plugin send_url for channel {}: {e}",
                self.channel_id
            )
        })?;
        let response = self
            .authorized_request(self.http.post(url))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "http plugin send failed for channel {}: status={} body={}",
                self.channel_id,
                status,
                body
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboundChannel for HttpPluginChannel {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn send_text(&self, message: OutboundText) -> Result<()> {
        if message.destination.trim().is_empty() {
            return Err(anyhow!("destination is required"));
        }
        if message.text.trim().is_empty() {
            return Err(anyhow!("message text is empty"));
        }
        self.post(text_envelope(&self.channel_id, &message)).await
    }

    async fn send_action_card(&self, card: ActionCard) -> Result<()> {
        if card.destination.trim().is_empty() {
            return Err(anyhow!("destination is required"));
        }
        self.post(card_envelope(&self.channel_id, &card)).await
    }
}

fn text_envelope(channel_id: &str, message: &OutboundText) -> Value {
    json!({
        "channel_id": channel_id,
        "kind": "text",
        "destination": message.destination,
        "is_channel": message.is_channel,
        "text": message.text.trim(),
        "mention": message.mention,
        "thread_id": message.thread_id,
    })
}

fn card_envelope(channel_id: &str, card: &ActionCard) -> Value {
    json!({
        "channel_id": channel_id,
        "kind": "action_card",
        "destination": card.destination,
        "is_channel": card.is_channel,
        "heading": card.heading,
        "body_text": card.body_text,
        "buttons": card.buttons,
    })
}

fn normalize_plugin_channel_id(raw: &str) -> Result<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(anyhow!("plugin channel id is required"));
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(anyhow!(
            "plugin channel id {id:?} may only contain [a-zA-Z0-9_-]"
        ));
    }
    Ok(id.to_string())
}

fn normalize_http_url(raw: &str, field: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|e| anyhow!("invalid {field}: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(anyhow!("{field} must use http or https, got {other}")),
    }
}
