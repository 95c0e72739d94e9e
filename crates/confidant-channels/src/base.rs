//! Channel trait — what a chat integration provides to the rest of Confidant.
//!
//! A channel turns chat updates into `InboundMessage`s on the bus and
//! delivers `OutboundMessage`s back to the chat.

use async_trait::async_trait;
use confidant_core::bus::types::OutboundMessage;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name; matches `InboundMessage.channel` and `OutboundMessage.channel`.
    fn name(&self) -> &str;

    /// Receive updates until `stop()` is called. Long-running.
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver one message. Errors are returned to the caller, so the
    /// scheduler can tell an undelivered message from a delivered one.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}
