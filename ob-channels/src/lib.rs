//! Channel contracts for the observer.
//!
//! Inbound events arrive already normalized (`InboundMessage`, `ButtonClick`).
//! Delivery adapters are pure I/O: they render `OutboundText` and `ActionCard`
//! for one platform.

mod http_plugin;
mod slack;
mod traits;
mod types;

pub use http_plugin::HttpPluginChannel;
pub use slack::SlackChannel;
pub use traits::OutboundChannel;
pub use types::{
    ActionCard, Button, ButtonClick, ButtonStyle, ChannelId, InboundMessage, MessageId,
    OutboundText, SenderId, ThreadId,
};
