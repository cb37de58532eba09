//! Durable per-channel observe policy.
//!
//! Policies live in a `DashMap` and are mirrored to a JSON file after every
//! mutation. A channel without a stored policy reads as the default (observe off).

use crate::error::PolicyError;
use dashmap::DashMap;
use ob_channels::ChannelId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserveMode {
    #[default]
    Active,
    Silent,
    Training,
}

impl ObserveMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "silent" => Some(Self::Silent),
            "training" => Some(Self::Training),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Silent => "silent",
            Self::Training => "training",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionPolicy {
    #[default]
    None,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelPolicy {
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub observe_enabled: bool,
    #[serde(default)]
    pub review_destination: Option<ChannelId>,
    #[serde(default)]
    pub mode: ObserveMode,
    #[serde(default)]
    pub cross_channel_enabled: bool,
    #[serde(default)]
    pub redaction: RedactionPolicy,
}

impl ChannelPolicy {
    /// Silent and training modes skip the prefilter and the acknowledgment,
    /// and approvals only record.
    pub fn is_quiet(&self) -> bool {
        self.mode != ObserveMode::Active
    }

    pub fn redacts(&self) -> bool {
        self.cross_channel_enabled && self.redaction == RedactionPolicy::Pattern
    }
}

pub struct ChannelPolicyStore {
    path: Option<PathBuf>,
    policies: DashMap<String, ChannelPolicy>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ChannelPolicyStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            policies: DashMap::new(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let policies = DashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let stored: BTreeMap<String, ChannelPolicy> = serde_json::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("parse channel policies {}: {e}", path.display()))?;
                for (channel, policy) in stored {
                    policies.insert(channel, policy);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "read channel policies {}: {e}",
                    path.display()
                ));
            }
        }
        tracing::info!(path = %path.display(), channels = policies.len(), "channel policies loaded");
        Ok(Self {
            path: Some(path),
            policies,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get(&self, channel_id: &str) -> ChannelPolicy {
        self.policies
            .get(channel_id)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Enabling requires a review destination to already be set.
    pub async fn set_observe_enabled(
        &self,
        channel_id: &ChannelId,
        channel_name: Option<&str>,
        enabled: bool,
    ) -> Result<ChannelPolicy, PolicyError> {
        let updated = {
            if enabled && self.get(channel_id).review_destination.is_none() {
                return Err(PolicyError::ReviewDestinationRequired {
                    channel: channel_id.to_string(),
                });
            }
            let mut entry = self.policies.entry(channel_id.to_string()).or_default();
            entry.observe_enabled = enabled;
            if let Some(name) = channel_name.filter(|n| !n.trim().is_empty()) {
                entry.channel_name = Some(name.trim().to_string());
            }
            entry.value().clone()
        };
        tracing::info!(channel_id = %channel_id, enabled, "observe mode toggled");
        self.persist().await?;
        Ok(updated)
    }

    pub async fn set_review_destination(
        &self,
        channel_id: &ChannelId,
        destination: ChannelId,
    ) -> Result<ChannelPolicy, PolicyError> {
        if destination.trim().is_empty() {
            return Err(PolicyError::EmptyReviewDestination);
        }
        let updated = self.update(channel_id, |p| p.review_destination = Some(destination));
        tracing::info!(
            channel_id = %channel_id,
            review_destination = ?updated.review_destination,
            "review destination set"
        );
        self.persist().await?;
        Ok(updated)
    }

    pub async fn set_mode(
        &self,
        channel_id: &ChannelId,
        mode: ObserveMode,
    ) -> Result<ChannelPolicy, PolicyError> {
        let updated = self.update(channel_id, |p| p.mode = mode);
        tracing::info!(channel_id = %channel_id, mode = mode.as_str(), "observe mode set");
        self.persist().await?;
        Ok(updated)
    }

    pub async fn set_cross_channel_training(
        &self,
        channel_id: &ChannelId,
        enabled: bool,
        redaction: RedactionPolicy,
    ) -> Result<ChannelPolicy, PolicyError> {
        let updated = self.update(channel_id, |p| {
            p.cross_channel_enabled = enabled;
            p.redaction = redaction;
        });
        tracing::info!(channel_id = %channel_id, enabled, ?redaction, "cross-channel training set");
        self.persist().await?;
        Ok(updated)
    }

    fn update(&self, channel_id: &ChannelId, apply: impl FnOnce(&mut ChannelPolicy)) -> ChannelPolicy {
        let mut entry = self.policies.entry(channel_id.to_string()).or_default();
        apply(entry.value_mut());
        entry.value().clone()
    }

    async fn persist(&self) -> Result<(), PolicyError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let snapshot: BTreeMap<String, ChannelPolicy> = self
            .policies
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let persist_err = |message: String| PolicyError::Persist {
            path: path.display().to_string(),
            message,
        };
        let body = serde_json::to_string_pretty(&snapshot).map_err(|e| persist_err(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persist_err(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| persist_err(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| persist_err(e.to_string()))?;
        Ok(())
    }
}
