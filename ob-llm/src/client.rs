use crate::anthropic::AnthropicClient;
use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse, ToolDefinition};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOOL_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        Self::with_timeout(api_key, model, DEFAULT_TIMEOUT)
    }

    /// Build a client whose every request is bounded by `timeout`.
    #[tracing::instrument(level = "debug", skip_all, fields(model = %model))]
    pub fn with_timeout(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::InvalidInput("api key is required".to_string()));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            provider: detect_provider(model),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = ?self.provider, model = %self.model))]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        match self.provider {
            Provider::OpenAI => {
                OpenAiClient::new(self.client.clone(), &self.api_key, &self.model)
                    .chat(messages, tools)
                    .await
            }
            Provider::Anthropic => {
                AnthropicClient::new(self.client.clone(), &self.api_key, &self.model)
                    .chat(messages, tools)
                    .await
            }
        }
    }

    /// One system + user turn without tools; returns the assistant text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let response = self.chat(&messages, &[]).await?;
        Ok(response.message.content)
    }
}

fn detect_provider(model: &str) -> Provider {
    let m = model.to_ascii_lowercase();
    if m.starts_with("claude-") {
        return Provider::Anthropic;
    }
    Provider::OpenAI
}

/// Tool names must satisfy both providers: `^[a-zA-Z0-9_-]{1,64}$`.
pub fn validate_tool_name_all_providers(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LEN {
        return Err(LlmError::InvalidInput(format!(
            "tool name must be 1..={MAX_TOOL_NAME_LEN} chars: {name:?}"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-'))
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_models_route_to_anthropic() {
        assert_eq!(detect_provider("claude-3-5-haiku-latest"), Provider::Anthropic);
        assert_eq!(detect_provider("gpt-4o-mini"), Provider::OpenAI);
    }

    #[test]
    fn tool_names_are_validated_for_all_providers() {
        validate_tool_name_all_providers("update_ticket").expect("plain name is valid");
        validate_tool_name_all_providers("crm-lookup").expect("dash is valid");

        let err = validate_tool_name_all_providers("ticket.update")
            .expect_err("dots are rejected");
        assert!(err.to_string().contains("invalid character"));
        assert!(validate_tool_name_all_providers("").is_err());
        assert!(validate_tool_name_all_providers(&"a".repeat(65)).is_err());
    }

    #[test]
    fn client_requires_key_and_model() {
        assert!(LlmClient::new("  ", "gpt-4o-mini").is_err());
        assert!(LlmClient::new("sk-test", "").is_err());
        let client = LlmClient::new("sk-test", " claude-3-5-haiku-latest ").expect("valid client");
        assert_eq!(client.model(), "claude-3-5-haiku-latest");
        assert_eq!(client.provider(), Provider::Anthropic);
    }
}
