use crate::traits::OutboundChannel;
use crate::types::{ActionCard, ButtonStyle, OutboundText};
use anyhow::{Result, anyhow};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const SECTION_TEXT_LIMIT: usize = 3000;
const HEADER_TEXT_LIMIT: usize = 150;

#[derive(Clone)]
pub struct SlackChannel {
    http: reqwest::Client,
    bot_token: String,
    api_base: String,
}

impl SlackChannel {
    pub fn new(bot_token: &str) -> Result<Self> {
        let token = bot_token.trim();
        if token.is_empty() {
            return Err(anyhow!("slack bot token is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            bot_token: token.to_string(),
            api_base: "https://slack.com/api".to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}/{method}", self.api_base))?)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(channel = %payload["channel"]))]
    async fn post_message(&self, payload: Value) -> Result<()> {
        let url = self.api_url("chat.postMessage")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body: SlackPostMessageResponse = response.json().await?;
        if !status.is_success() || !body.ok {
            return Err(anyhow!(
                "slack chat.postMessage failed: status={} error={}",
                status,
                body.error.unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboundChannel for SlackChannel {
    fn channel_id(&self) -> &str {
        "slack"
    }

    async fn send_text(&self, message: OutboundText) -> Result<()> {
        self.post_message(text_payload(&message)?).await
    }

    async fn send_action_card(&self, card: ActionCard) -> Result<()> {
        self.post_message(card_payload(&card)?).await
    }
}

fn text_payload(message: &OutboundText) -> Result<Value> {
    let destination = message.destination.trim();
    if destination.is_empty() {
        return Err(anyhow!("destination (slack channel or user id) is required"));
    }
    let text = message.text.trim();
    if text.is_empty() {
        return Err(anyhow!("message text is empty"));
    }
    // chat.postMessage with a user id opens the bot's DM with that user.
    let text = match message.mention.as_ref() {
        Some(user) => format!("<@{user}> {text}"),
        None => text.to_string(),
    };
    let mut payload = json!({ "channel": destination, "text": text });
    if let Some(thread) = message.thread_id.as_ref() {
        payload["thread_ts"] = json!(thread.as_str());
    }
    Ok(payload)
}

fn card_payload(card: &ActionCard) -> Result<Value> {
    let destination = card.destination.trim();
    if destination.is_empty() {
        return Err(anyhow!("destination (slack channel or user id) is required"));
    }
    let buttons: Vec<Value> = card
        .buttons
        .iter()
        .enumerate()
        .map(|(idx, button)| {
            let mut element = json!({
                "type": "button",
                "action_id": format!("observer_action_{idx}"),
                "text": { "type": "plain_text", "text": button.text },
                "value": button.value,
            });
            match button.style {
                ButtonStyle::Primary => element["style"] = json!("primary"),
                ButtonStyle::Danger => element["style"] = json!("danger"),
                ButtonStyle::Default => {}
            }
            element
        })
        .collect();

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": clip(&card.heading, HEADER_TEXT_LIMIT) },
        }),
        json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": clip(&card.body_text, SECTION_TEXT_LIMIT) },
        }),
    ];
    if !buttons.is_empty() {
        blocks.push(json!({ "type": "actions", "elements": buttons }));
    }

    Ok(json!({
        "channel": destination,
        "text": card.heading,
        "blocks": blocks,
    }))
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[derive(Debug, Deserialize)]
struct SlackPostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}
