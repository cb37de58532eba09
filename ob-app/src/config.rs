//! Observer configuration loader.

use ob_tools::HttpActionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ObserverConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub prefilter: PrefilterConfig,
    #[serde(default)]
    pub observe: ObserveConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_acknowledgment")]
    pub acknowledgment: String,
}

fn default_acknowledgment() -> String {
    "Thanks, we're looking into this and will follow up shortly.".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrefilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `general.model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_prefilter_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_example_pool_cap")]
    pub example_pool_cap: usize,
    #[serde(default = "default_few_shot_limit")]
    pub few_shot_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_prefilter_timeout_ms() -> u64 {
    3000
}

fn default_example_pool_cap() -> usize {
    50
}

fn default_few_shot_limit() -> usize {
    20
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            timeout_ms: default_prefilter_timeout_ms(),
            example_pool_cap: default_example_pool_cap(),
            few_shot_limit: default_few_shot_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObserveConfig {
    #[serde(default = "default_long_ttl")]
    pub approval_ttl_minutes: u64,
    #[serde(default = "default_long_ttl")]
    pub blocked_ttl_minutes: u64,
    #[serde(default = "default_filtered_ttl")]
    pub filtered_ttl_minutes: u64,
    #[serde(default = "default_training_ttl")]
    pub training_ttl_minutes: u64,
    /// Sender ids allowed to run `/observe` commands.
    #[serde(default)]
    pub admin_users: Vec<String>,
    /// Test identities that bypass the prefilter and the acknowledgment.
    #[serde(default)]
    pub roleplay_senders: Vec<String>,
    #[serde(default = "default_max_tool_loops")]
    pub max_tool_loops: usize,
    #[serde(default = "default_knowledge_limit")]
    pub knowledge_limit: usize,
}

fn default_long_ttl() -> u64 {
    120
}

fn default_filtered_ttl() -> u64 {
    60
}

fn default_training_ttl() -> u64 {
    30
}

fn default_max_tool_loops() -> usize {
    6
}

fn default_knowledge_limit() -> usize {
    5
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            approval_ttl_minutes: default_long_ttl(),
            blocked_ttl_minutes: default_long_ttl(),
            filtered_ttl_minutes: default_filtered_ttl(),
            training_ttl_minutes: default_training_ttl(),
            admin_users: Vec::new(),
            roleplay_senders: Vec::new(),
            max_tool_loops: default_max_tool_loops(),
            knowledge_limit: default_knowledge_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

fn default_inbound_queue_capacity() -> usize {
    1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: None,
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
            inbound_queue_capacity: default_inbound_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub http_plugin: HttpPluginConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpPluginConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_plugin_channel_id")]
    pub channel_id: String,
    #[serde(default)]
    pub send_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_plugin_channel_id() -> String {
    "http_plugin".to_string()
}

impl Default for HttpPluginConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_id: default_plugin_channel_id(),
            send_url: String::new(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub http_actions: Vec<HttpActionConfig>,
}

impl ObserverConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg = Self::parse(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env("OBSERVER_MODEL") {
            self.general.model = v;
        }
        if let Some(v) = non_empty_env("OPENAI_API_KEY") {
            self.keys.openai_api_key = Some(v);
        }
        if let Some(v) = non_empty_env("ANTHROPIC_API_KEY") {
            self.keys.anthropic_api_key = Some(v);
        }
        if let Some(v) = non_empty_env("SLACK_BOT_TOKEN") {
            self.channels.slack.bot_token = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        let ttls = [
            ("observe.approval_ttl_minutes", self.observe.approval_ttl_minutes),
            ("observe.blocked_ttl_minutes", self.observe.blocked_ttl_minutes),
            ("observe.filtered_ttl_minutes", self.observe.filtered_ttl_minutes),
            ("observe.training_ttl_minutes", self.observe.training_ttl_minutes),
        ];
        for (name, minutes) in ttls {
            if minutes == 0 {
                return Err(anyhow::anyhow!("{name} must be > 0"));
            }
        }
        if self.observe.max_tool_loops == 0 {
            return Err(anyhow::anyhow!("observe.max_tool_loops must be > 0"));
        }
        if self.prefilter.timeout_ms == 0 {
            return Err(anyhow::anyhow!("prefilter.timeout_ms must be > 0"));
        }
        if self.prefilter.few_shot_limit > self.prefilter.example_pool_cap {
            return Err(anyhow::anyhow!(
                "prefilter.few_shot_limit ({}) must not exceed prefilter.example_pool_cap ({})",
                self.prefilter.few_shot_limit,
                self.prefilter.example_pool_cap
            ));
        }
        if self.runtime.inbound_queue_capacity == 0 {
            return Err(anyhow::anyhow!("runtime.inbound_queue_capacity must be > 0"));
        }
        match (self.channels.slack.enabled, self.channels.http_plugin.enabled) {
            (true, true) => {
                return Err(anyhow::anyhow!(
                    "enable exactly one of channels.slack and channels.http_plugin"
                ));
            }
            (false, false) => {
                return Err(anyhow::anyhow!(
                    "no outbound channel enabled; set channels.slack.enabled or channels.http_plugin.enabled"
                ));
            }
            (true, false) if self.channels.slack.bot_token.trim().is_empty() => {
                return Err(anyhow::anyhow!(
                    "channels.slack.bot_token is required (or set SLACK_BOT_TOKEN)"
                ));
            }
            (false, true) if self.channels.http_plugin.send_url.trim().is_empty() => {
                return Err(anyhow::anyhow!("channels.http_plugin.send_url is required"));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn api_key_for_model(&self, model: &str) -> Option<String> {
        let model = model.to_ascii_lowercase();
        if model.starts_with("claude-") {
            return self
                .keys
                .anthropic_api_key
                .clone()
                .filter(|s| !s.is_empty());
        }
        self.keys.openai_api_key.clone().filter(|s| !s.is_empty())
    }

    pub fn prefilter_model(&self) -> &str {
        self.prefilter
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.general.model.as_str())
    }

    pub fn prefilter_timeout(&self) -> Duration {
        Duration::from_millis(self.prefilter.timeout_ms)
    }

    pub fn data_dir(&self) -> PathBuf {
        match self.runtime.data_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => expand_home(dir),
            _ => default_data_dir(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        return Path::new(&home).join(rest);
    }
    PathBuf::from(path)
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".observer").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".observer").join("data")
}
