//! Channel Manager — starts channels and routes assistant replies to them.
//!
//! Each registered channel runs on its own task. A single dispatcher task
//! drains the bus outbound queue and hands every message to the channel it
//! names; messages for unknown channels are logged and dropped. Stop signals
//! are stored permits, so a stop issued mid-dispatch is not lost.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use confidant_core::bus::queue::MessageBus;
use confidant_core::bus::types::OutboundMessage;

use crate::base::Channel;

pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    bus: Arc<MessageBus>,
    shutdown: Arc<Notify>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a channel, replacing any channel with the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registered channel");
        self.channels.insert(name, channel);
    }

    /// Registered channel names, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start every channel plus the outbound dispatcher, then wait for
    /// [`stop_all`](Self::stop_all).
    pub async fn start_all(&self) -> Result<()> {
        if self.channels.is_empty() {
            warn!("no channels registered, nothing to start");
            return Ok(());
        }

        info!(channels = ?self.channel_names(), "starting channels");

        for (name, channel) in &self.channels {
            let channel = channel.clone();
            let name = name.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.start().await {
                    error!(channel = %name, error = %format!("{e:#}"), "channel failed");
                }
                info!(channel = %name, "channel stopped");
            });
        }

        let stop_dispatch = Arc::new(Notify::new());
        let dispatcher = tokio::spawn(Self::dispatch_outbound(
            self.bus.clone(),
            self.channels.clone(),
            stop_dispatch.clone(),
        ));

        self.shutdown.notified().await;
        info!("channel manager shutting down");
        stop_dispatch.notify_one();
        if let Err(e) = dispatcher.await {
            error!(error = %e, "outbound dispatcher task failed");
        }
        Ok(())
    }

    /// Stop the dispatcher and every channel.
    pub async fn stop_all(&self) {
        // Stored permit: also ends a start_all that has not reached its wait yet.
        self.shutdown.notify_one();

        for (name, channel) in &self.channels {
            debug!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            }
        }
        info!("all channels stopped");
    }

    async fn route(channels: &HashMap<String, Arc<dyn Channel>>, msg: OutboundMessage) {
        let Some(channel) = channels.get(&msg.channel) else {
            warn!(channel = %msg.channel, "no channel registered for outbound message");
            return;
        };

        debug!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            chars = msg.content.chars().count(),
            "dispatching outbound message"
        );
        if let Err(e) = channel.send(&msg).await {
            error!(
                channel = %msg.channel,
                chat_id = %msg.chat_id,
                error = %format!("{e:#}"),
                "failed to deliver outbound message"
            );
        }
    }

    async fn dispatch_outbound(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        shutdown: Arc<Notify>,
    ) {
        info!("outbound dispatcher started");
        loop {
            tokio::select! {
                msg = bus.consume_outbound() => match msg {
                    Some(msg) => Self::route(&channels, msg).await,
                    None => {
                        info!("outbound bus closed, dispatcher exiting");
                        break;
                    }
                },
                _ = shutdown.notified() => {
                    debug!("dispatcher received shutdown signal");
                    break;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
