use crate::error::{Result, ToolError};
use crate::traits::{Tool, ToolEffect, ToolSpec, require_object};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RESPONSE_CHARS: usize = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    /// Non-GET methods are assumed to change remote state.
    pub fn default_effect(self) -> ToolEffect {
        match self {
            Self::Get => ToolEffect::ReadOnly,
            _ => ToolEffect::SideEffecting,
        }
    }
}

/// A remote HTTP endpoint exposed to the model as a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpActionConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub effect: Option<ToolEffect>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
}

fn default_parameters() -> serde_json::Value {
    json!({ "type": "object", "additionalProperties": true })
}

impl HttpActionConfig {
    pub fn effect(&self) -> ToolEffect {
        self.effect.unwrap_or_else(|| self.method.default_effect())
    }
}

pub struct HttpActionTool {
    config: HttpActionConfig,
    http: reqwest::Client,
}

impl HttpActionTool {
    pub fn new(config: HttpActionConfig) -> Result<Self> {
        ob_llm::validate_tool_name_all_providers(&config.name)
            .map_err(|e| ToolError::InvalidConfig(e.to_string()))?;
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(ToolError::InvalidConfig(format!(
                "tool {} url must be http(s): {}",
                config.name, config.url
            )));
        }
        if !config.parameters.is_object() {
            return Err(ToolError::InvalidConfig(format!(
                "tool {} parameters must be a JSON schema object",
                config.name
            )));
        }
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl Tool for HttpActionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            parameters_schema: self.config.parameters.clone(),
            effect: self.config.effect(),
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(tool = %self.config.name))]
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let params = require_object(&arguments)?;
        let mut request = self
            .http
            .request(self.config.method.as_reqwest(), &self.config.url);
        request = match self.config.method {
            HttpMethod::Get => {
                let query: Vec<(String, String)> = params
                    .iter()
                    .map(|(k, v)| (k.clone(), query_value(v)))
                    .collect();
                request.query(&query)
            }
            _ => request.json(&arguments),
        };
        if let Some(token) = self.config.bearer_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "{} status={status} body={}",
                self.config.name,
                truncate(&text)
            )));
        }
        let body = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or_else(|_| serde_json::Value::String(truncate(&text)));
        Ok(json!({ "status": status.as_u16(), "body": body }))
    }
}

fn query_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_RESPONSE_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_RESPONSE_CHARS).collect();
    out.push_str("...");
    out
}
