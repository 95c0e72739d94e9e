//! Message bus — inbound/outbound queues between channels and the assistant.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, OutboundMessage};
