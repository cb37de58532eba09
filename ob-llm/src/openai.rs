use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
use serde::Deserialize;
use serde_json::{Value, json};

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub(crate) struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub(crate) fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub(crate) async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let body = request_body(&self.model, messages, tools);
        let response = self
            .http
            .post(OPENAI_CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::status("openai", status.as_u16(), &text));
        }
        let parsed: CompletionResponse = serde_json::from_str(&text)?;
        parsed.try_into()
    }
}

fn request_body(model: &str, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
    });
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tool_choice"] = json!("auto");
    }
    body
}

fn wire_message(m: &ChatMessage) -> Value {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut out = json!({ "role": role });
    if !m.content.is_empty() {
        out["content"] = json!(m.content);
    }
    if !m.tool_calls.is_empty() {
        out["tool_calls"] = m
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": { "name": tc.name, "arguments": tc.arguments },
                })
            })
            .collect();
    }
    if let Some(id) = m.tool_call_id.as_ref() {
        out["tool_call_id"] = json!(id);
    }
    out
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChoiceToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChoiceToolCall {
    id: String,
    function: ChoiceFunction,
}

#[derive(Debug, Deserialize)]
struct ChoiceFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl TryFrom<CompletionResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: CompletionResponse) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("openai response missing choices".to_string())
        })?;
        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: choice.message.content.unwrap_or_default(),
                tool_calls: choice
                    .message
                    .tool_calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect(),
                tool_call_id: None,
            },
            usage: v.usage.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
