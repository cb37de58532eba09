use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
use serde::{Deserialize, Serialize};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

pub(crate) struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
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
        let req = MessagesRequest::build(&self.model, messages, tools);
        let response = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::status("anthropic", status.as_u16(), &body));
        }
        let parsed: MessagesResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

impl MessagesRequest {
    fn build(model: &str, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let mut system = String::new();
        let mut wire: Vec<WireMessage> = Vec::with_capacity(messages.len());
        for m in messages {
            let (role, block) = match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                    continue;
                }
                Role::User => (
                    "user",
                    vec![Block::Text {
                        text: m.content.clone(),
                    }],
                ),
                Role::Tool => (
                    "user",
                    vec![Block::ToolResult {
                        tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                        content: m.content.clone(),
                    }],
                ),
                Role::Assistant => ("assistant", assistant_blocks(m)),
            };
            // Consecutive tool results must share one user turn.
            match wire.last_mut() {
                Some(last) if last.role == role && role == "user" && m.role == Role::Tool => {
                    last.content.extend(block);
                }
                _ => wire.push(WireMessage {
                    role: role.to_string(),
                    content: block,
                }),
            }
        }

        Self {
            model: model.to_string(),
            max_tokens: MAX_TOKENS,
            system,
            messages: wire,
            tools: tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        }
    }
}

fn assistant_blocks(m: &ChatMessage) -> Vec<Block> {
    let mut blocks = Vec::new();
    if !m.content.trim().is_empty() {
        blocks.push(Block::Text {
            text: m.content.clone(),
        });
    }
    for tc in &m.tool_calls {
        let input = serde_json::from_str(&tc.arguments).unwrap_or_else(|_| serde_json::json!({}));
        blocks.push(Block::ToolUse {
            id: tc.id.clone(),
            name: tc.name.clone(),
            input,
        });
    }
    blocks
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl TryFrom<MessagesResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: MessagesResponse) -> Result<Self> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in v.content {
            match block {
                Block::Text { text } => content.push_str(&text),
                Block::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: serde_json::to_string(&input)?,
                }),
                Block::ToolResult { .. } | Block::Unknown => {}
            }
        }
        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content,
                tool_calls,
                tool_call_id: None,
            },
            usage: Usage {
                prompt_tokens: v.usage.input_tokens,
                completion_tokens: v.usage.output_tokens,
            },
            finish_reason: v.stop_reason.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
