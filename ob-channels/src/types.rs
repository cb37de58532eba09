use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(ChannelId);
id_newtype!(SenderId);
id_newtype!(ThreadId);

/// A channel message after provider-specific parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub channel_name: Option<String>,
    pub sender_id: SenderId,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub text: String,
    /// Reply in a thread the assistant already engaged with.
    #[serde(default)]
    pub is_thread_reply: bool,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
}

impl InboundMessage {
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

/// A button pressed on a previously sent `ActionCard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonClick {
    pub value: String,
    pub user_id: SenderId,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Where the card was clicked, when the platform reports it.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundText {
    pub destination: ChannelId,
    pub text: String,
    /// `false` means `destination` is a user and the text goes to a direct conversation.
    pub is_channel: bool,
    #[serde(default)]
    pub mention: Option<SenderId>,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
}

impl OutboundText {
    pub fn to_channel(destination: ChannelId, text: impl Into<String>) -> Self {
        Self {
            destination,
            text: text.into(),
            is_channel: true,
            mention: None,
            thread_id: None,
        }
    }

    pub fn with_mention(mut self, sender: SenderId) -> Self {
        self.mention = Some(sender);
        self
    }

    pub fn in_thread(mut self, thread_id: Option<ThreadId>) -> Self {
        self.thread_id = thread_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
    #[default]
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub value: String,
    #[serde(default)]
    pub style: ButtonStyle,
}

impl Button {
    pub fn new(text: impl Into<String>, value: impl Into<String>, style: ButtonStyle) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionCard {
    pub destination: ChannelId,
    pub heading: String,
    pub body_text: String,
    pub buttons: Vec<Button>,
    pub is_channel: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_defaults_optional_fields() {
        let raw = serde_json::json!({
            "channel_id": "C1",
            "sender_id": "U1",
            "text": "How many seats does the Pro plan include?"
        });
        let msg: InboundMessage = serde_json::from_value(raw).expect("parse inbound");
        assert!(!msg.is_thread_reply);
        assert_eq!(msg.channel_label(), "C1");
        assert_eq!(msg.sender_label(), "U1");
    }

    #[test]
    fn labels_prefer_names() {
        let raw = serde_json::json!({
            "channel_id": "C1",
            "channel_name": "acme-support",
            "sender_id": "U1",
            "sender_name": "Dana",
            "text": "hi",
            "is_thread_reply": true
        });
        let msg: InboundMessage = serde_json::from_value(raw).expect("parse inbound");
        assert_eq!(msg.channel_label(), "acme-support");
        assert_eq!(msg.sender_label(), "Dana");
        assert!(msg.is_thread_reply);
    }

    #[test]
    fn button_style_serializes_snake_case() {
        let button = Button::new("Approve", "approve_answer:abc", ButtonStyle::Primary);
        let value = serde_json::to_value(&button).expect("serialize");
        assert_eq!(value["style"], "primary");
    }
}
