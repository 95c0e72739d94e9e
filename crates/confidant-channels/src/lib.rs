//! Confidant Channels — the chat side of the assistant.
//!
//! This crate provides:
//! - **base**: The `Channel` trait a chat integration implements
//! - **manager**: `ChannelManager` — channel lifecycle and outbound routing
//! - **formatting**: Markdown → Telegram HTML and message splitting
//! - **telegram** (feature `telegram`): long-polling bot for one private user

pub mod base;
pub mod formatting;
pub mod manager;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use base::Channel;
pub use manager::ChannelManager;

#[cfg(feature = "telegram")]
pub use telegram::TelegramChannel;
