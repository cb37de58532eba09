//! `/observe` admin commands.

use crate::policy::{ChannelPolicy, ChannelPolicyStore, ObserveMode, RedactionPolicy};
use ob_channels::{ChannelId, InboundMessage, SenderId};
use std::collections::HashSet;

const USAGE: &str = "Usage: /observe on [review-channel] | off | review <channel> | mode active|silent|training | crosschannel on|off [redact|noredact] | status";

pub trait AdminPredicate: Send + Sync {
    fn is_admin(&self, sender: &SenderId) -> bool;
}

/// Admins are the configured `admin_users`. An empty list admits nobody.
#[derive(Debug, Clone, Default)]
pub struct AllowlistAdmins {
    users: HashSet<String>,
}

impl AllowlistAdmins {
    pub fn new(users: impl IntoIterator<Item = String>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
        }
    }
}

impl AdminPredicate for AllowlistAdmins {
    fn is_admin(&self, sender: &SenderId) -> bool {
        self.users.contains(sender.as_str())
    }
}

/// Returns `None` when the message is not an `/observe` command.
///
/// Commands apply to the channel they are typed in.
pub async fn handle_command(
    policies: &ChannelPolicyStore,
    admins: &dyn AdminPredicate,
    inbound: &InboundMessage,
) -> Option<String> {
    let trimmed = inbound.text.trim();
    let mut parts = trimmed.split_whitespace();
    if parts.next() != Some("/observe") {
        return None;
    }
    if !admins.is_admin(&inbound.sender_id) {
        tracing::warn!(
            sender_id = %inbound.sender_id,
            channel_id = %inbound.channel_id,
            "non-admin issued observe command"
        );
        return Some("You are not authorized to change observe settings.".to_string());
    }

    let args: Vec<&str> = parts.collect();
    let channel = &inbound.channel_id;
    let label = inbound.channel_label();
    let result = match args.as_slice() {
        ["on"] => policies
            .set_observe_enabled(channel, inbound.channel_name.as_deref(), true)
            .await
            .map(|p| enabled_reply(label, &p)),
        ["on", review] => {
            let Some(review) = parse_channel_ref(review) else {
                return Some(USAGE.to_string());
            };
            match policies.set_review_destination(channel, review).await {
                Ok(_) => policies
                    .set_observe_enabled(channel, inbound.channel_name.as_deref(), true)
                    .await
                    .map(|p| enabled_reply(label, &p)),
                Err(e) => Err(e),
            }
        }
        ["off"] => policies
            .set_observe_enabled(channel, inbound.channel_name.as_deref(), false)
            .await
            .map(|_| format!("Observe mode disabled for {label}.")),
        ["review", review] => {
            let Some(review) = parse_channel_ref(review) else {
                return Some(USAGE.to_string());
            };
            policies
                .set_review_destination(channel, review)
                .await
                .map(|p| {
                    format!(
                        "Review cards for {label} will go to {}.",
                        p.review_destination.as_deref().unwrap_or("(none)")
                    )
                })
        }
        ["mode", mode] => {
            let Some(mode) = ObserveMode::parse(mode) else {
                return Some(USAGE.to_string());
            };
            policies
                .set_mode(channel, mode)
                .await
                .map(|p| format!("Observe mode for {label} is now {}.", p.mode.as_str()))
        }
        ["crosschannel", toggle, rest @ ..] if rest.len() <= 1 => {
            let enabled = match *toggle {
                "on" => true,
                "off" => false,
                _ => return Some(USAGE.to_string()),
            };
            let redaction = match rest.first().copied() {
                None if enabled => RedactionPolicy::Pattern,
                None => RedactionPolicy::None,
                Some("redact") => RedactionPolicy::Pattern,
                Some("noredact") => RedactionPolicy::None,
                Some(_) => return Some(USAGE.to_string()),
            };
            policies
                .set_cross_channel_training(channel, enabled, redaction)
                .await
                .map(|p| {
                    format!(
                        "Cross-channel knowledge for {label}: {} (redaction {}).",
                        if p.cross_channel_enabled { "on" } else { "off" },
                        if p.redacts() { "on" } else { "off" }
                    )
                })
        }
        ["status"] => Ok(status_reply(label, &policies.get(channel))),
        _ => return Some(USAGE.to_string()),
    };

    Some(match result {
        Ok(reply) => {
            tracing::info!(
                sender_id = %inbound.sender_id,
                channel_id = %inbound.channel_id,
                command = trimmed,
                "observe command applied"
            );
            reply
        }
        Err(e) => e.to_string(),
    })
}

/// Accepts `C123`, `#C123` and Slack-style `<#C123|name>` references.
pub fn parse_channel_ref(raw: &str) -> Option<ChannelId> {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix("<#")
        .and_then(|r| r.strip_suffix('>'))
        .map(|r| r.split('|').next().unwrap_or(r))
        .unwrap_or_else(|| raw.trim_start_matches('#'));
    let inner = inner.trim();
    if inner.is_empty() || inner.contains(['<', '>', '|']) {
        return None;
    }
    Some(ChannelId::from(inner))
}

fn enabled_reply(label: &str, policy: &ChannelPolicy) -> String {
    format!(
        "Observe mode enabled for {label}. Review cards go to {}.",
        policy.review_destination.as_deref().unwrap_or("(none)")
    )
}

fn status_reply(label: &str, policy: &ChannelPolicy) -> String {
    format!(
        "Observe status for {label}\nenabled={}\nreview_destination={}\nmode={}\ncross_channel={}\nredaction={}",
        policy.observe_enabled,
        policy.review_destination.as_deref().unwrap_or("(none)"),
        policy.mode.as_str(),
        policy.cross_channel_enabled,
        policy.redacts()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admins() -> AllowlistAdmins {
        AllowlistAdmins::new(["U-admin".to_string()])
    }

    fn command(sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: ChannelId::from("C1"),
            channel_name: Some("acme-support".to_string()),
            sender_id: SenderId::from(sender),
            sender_name: None,
            text: text.to_string(),
            is_thread_reply: false,
            message_id: None,
            thread_id: None,
        }
    }

    #[tokio::test]
    async fn ordinary_messages_are_not_commands() {
        let store = ChannelPolicyStore::in_memory();
        let reply = handle_command(&store, &admins(), &command("U-admin", "/observer on")).await;
        assert!(reply.is_none());
        let reply = handle_command(&store, &admins(), &command("U1", "hello")).await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn non_admins_are_refused() {
        let store = ChannelPolicyStore::in_memory();
        let reply = handle_command(&store, &admins(), &command("U1", "/observe on C-review"))
            .await
            .expect("command");
        assert!(reply.contains("not authorized"));
        assert!(!store.get("C1").observe_enabled);
    }

    #[tokio::test]
    async fn on_with_review_channel_sets_both() {
        let store = ChannelPolicyStore::in_memory();
        let reply = handle_command(
            &store,
            &admins(),
            &command("U-admin", "/observe on <#C-review|reviews>"),
        )
        .await
        .expect("command");
        assert!(reply.contains("Review cards go to C-review"), "{reply}");
        let policy = store.get("C1");
        assert!(policy.observe_enabled);
        assert_eq!(policy.review_destination, Some(ChannelId::from("C-review")));
        assert_eq!(policy.channel_name.as_deref(), Some("acme-support"));
    }

    #[tokio::test]
    async fn on_without_destination_explains_what_is_missing() {
        let store = ChannelPolicyStore::in_memory();
        let reply = handle_command(&store, &admins(), &command("U-admin", "/observe on"))
            .await
            .expect("command");
        assert!(reply.contains("no review destination"), "{reply}");
        assert!(!store.get("C1").observe_enabled);
    }

    #[tokio::test]
    async fn mode_and_crosschannel_update_policy() {
        let store = ChannelPolicyStore::in_memory();
        let a = admins();
        handle_command(&store, &a, &command("U-admin", "/observe mode training")).await;
        handle_command(&store, &a, &command("U-admin", "/observe crosschannel on")).await;
        let policy = store.get("C1");
        assert_eq!(policy.mode, ObserveMode::Training);
        assert!(policy.redacts());

        handle_command(
            &store,
            &a,
            &command("U-admin", "/observe crosschannel on noredact"),
        )
        .await;
        assert!(!store.get("C1").redacts());

        let status = handle_command(&store, &a, &command("U-admin", "/observe status"))
            .await
            .expect("status");
        assert!(status.contains("mode=training"));
        assert!(status.contains("cross_channel=true"));
    }

    #[tokio::test]
    async fn unknown_subcommands_get_usage() {
        let store = ChannelPolicyStore::in_memory();
        for text in ["/observe", "/observe loud", "/observe mode loud", "/observe crosschannel maybe"] {
            let reply = handle_command(&store, &admins(), &command("U-admin", text))
                .await
                .expect("command");
            assert!(reply.starts_with("Usage:"), "{text}: {reply}");
        }
    }

    #[test]
    fn channel_refs() {
        assert_eq!(parse_channel_ref("<#C9|ops>"), Some(ChannelId::from("C9")));
        assert_eq!(parse_channel_ref("#C9"), Some(ChannelId::from("C9")));
        assert_eq!(parse_channel_ref("C9"), Some(ChannelId::from("C9")));
        assert_eq!(parse_channel_ref("<#>"), None);
    }
}
