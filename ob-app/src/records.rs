use crate::gate::BlockedCall;
use ob_channels::{ChannelId, InboundMessage, SenderId, ThreadId};

/// Where a request came from and who asked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub channel_id: ChannelId,
    pub channel_name: Option<String>,
    pub sender_id: SenderId,
    pub sender_name: Option<String>,
    pub thread_id: Option<ThreadId>,
}

impl Origin {
    pub fn from_inbound(inbound: &InboundMessage) -> Self {
        Self {
            channel_id: inbound.channel_id.clone(),
            channel_name: inbound.channel_name.clone(),
            sender_id: inbound.sender_id.clone(),
            sender_name: inbound.sender_name.clone(),
            thread_id: inbound.thread_id.clone(),
        }
    }

    pub fn channel_label(&self) -> &str {
        self.channel_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.channel_id.as_str())
    }

    pub fn sender_label(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.sender_id.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub origin: Origin,
    pub question: String,
    pub answer: String,
    pub profile_facts: Vec<String>,
    pub review_destination: ChannelId,
    /// Approval records the answer without posting it.
    pub silent: bool,
    /// Reviewer decisions also become prefilter examples.
    pub training: bool,
}

#[derive(Debug, Clone)]
pub struct TrainingSession {
    pub ref_id: String,
    pub origin: Origin,
    pub question: String,
    pub previous_answer: String,
    pub review_destination: ChannelId,
    pub silent: bool,
    pub training: bool,
}

#[derive(Debug, Clone)]
pub struct BlockedToolCallSet {
    pub origin: Origin,
    pub request: String,
    pub review_destination: ChannelId,
    pub calls: Vec<BlockedCall>,
    pub silent: bool,
}

impl BlockedToolCallSet {
    /// Distinct tool names in first-attempt order.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for call in &self.calls {
            if !names.contains(&call.tool_name) {
                names.push(call.tool_name.clone());
            }
        }
        names
    }
}

/// A message the prefilter classified as casual, held for a reviewer override.
#[derive(Debug, Clone)]
pub struct FilteredMessage {
    pub message: InboundMessage,
    pub review_destination: ChannelId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_names_are_deduplicated_in_order() {
        let set = BlockedToolCallSet {
            origin: Origin {
                channel_id: ChannelId::from("C1"),
                channel_name: None,
                sender_id: SenderId::from("U1"),
                sender_name: None,
                thread_id: None,
            },
            request: "close 7 and 8".to_string(),
            review_destination: ChannelId::from("C-review"),
            calls: vec![
                BlockedCall::new("update_ticket", json!({"id": 7})),
                BlockedCall::new("notify_customer", json!({})),
                BlockedCall::new("update_ticket", json!({"id": 8})),
            ],
            silent: false,
        };
        assert_eq!(set.tool_names(), vec!["update_ticket", "notify_customer"]);
        assert_eq!(set.origin.channel_label(), "C1");
    }
}
