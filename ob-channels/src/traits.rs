use crate::types::{ActionCard, OutboundText};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Unique channel identifier: "slack", "http_plugin".
    fn channel_id(&self) -> &str;

    /// Post plain text to a channel or direct conversation.
    async fn send_text(&self, message: OutboundText) -> Result<()>;

    /// Post a card with buttons. Button values come back verbatim on click.
    async fn send_action_card(&self, card: ActionCard) -> Result<()>;
}
