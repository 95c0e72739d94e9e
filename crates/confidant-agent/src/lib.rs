//! Confidant Agent — conversation cycles, chat commands, and the random-thought scheduler.
//!
//! This crate contains:
//! - **conversation**: one locked request cycle per inbound message
//! - **assistant_loop**: bus consumer dispatching commands, photos, and text
//! - **commands**: slash-command parsing and reply texts
//! - **scheduler**: unsolicited messages on a randomized cadence

pub mod assistant_loop;
pub mod commands;
pub mod conversation;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use assistant_loop::{AssistantLoop, CommandTimings};
pub use commands::Command;
pub use conversation::{ConversationEngine, CycleLimits, CycleOutcome, DEFAULT_IMAGE_CAPTION};
pub use scheduler::{DeliverFn, Scheduler, SchedulerSettings};
