//! `confidant run` — wires storage, model gateway, assistant, scheduler, and Telegram.
//!
//! Startup sequence:
//! 1. Load and validate config
//! 2. Open the durable log and build the conversation store
//! 3. Build the LM Studio gateway, request builder, and conversation engine
//! 4. Register the Telegram channel; its `send` doubles as scheduler delivery
//! 5. Run channels, assistant loop, and scheduler until Ctrl+C or `/exit`

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{info, warn};

use confidant_agent::{
    AssistantLoop, ConversationEngine, CycleLimits, DeliverFn, Scheduler, SchedulerSettings,
};
use confidant_channels::ChannelManager;
use confidant_core::bus::queue::MessageBus;
use confidant_core::config::load_config;
use confidant_core::session::{ConversationStore, DurableLog};
use confidant_core::utils::{expand_home, format_uptime};
use confidant_core::StatsCounter;
use confidant_providers::{LmStudioGateway, LmsCli, ModelGateway, RequestBuilder};

use crate::helpers;

const BUS_CAPACITY: usize = 100;

pub async fn run() -> Result<()> {
    helpers::print_banner();

    // 1. Config
    let config = load_config(None);
    config.validate().context("invalid configuration")?;
    let Some(recipient) = config.telegram.allowed_user else {
        anyhow::bail!("telegram.allowedUser is not set");
    };
    let recipient_session = format!("telegram:{recipient}");

    // 2. Storage
    let db_path = expand_home(&config.storage.database_path);
    let log = DurableLog::open(&db_path)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let store = Arc::new(ConversationStore::with_hydrate_limit(
        log.clone(),
        config.storage.hydrate_limit,
    ));

    // 3. Model side
    let gateway = Arc::new(
        LmStudioGateway::from_config(&config.model).context("failed to build HTTP client")?,
    );
    let stats = Arc::new(StatsCounter::new());
    let engine = Arc::new(ConversationEngine::new(
        store,
        gateway.clone(),
        RequestBuilder::from_config(&config.model),
        stats.clone(),
        CycleLimits::from_config(&config),
    ));

    let bus = Arc::new(MessageBus::new(BUS_CAPACITY));
    let shutdown = Arc::new(Notify::new());
    let assistant = Arc::new(AssistantLoop::new(
        bus.clone(),
        engine.clone(),
        Arc::new(LmsCli::new(config.model.lms_binary.clone())),
        shutdown.clone(),
    ));

    // 4. Channels
    #[allow(unused_mut)]
    let mut channel_manager = ChannelManager::new(bus.clone());

    #[cfg(feature = "telegram")]
    let deliver: Option<DeliverFn> = {
        use confidant_channels::{Channel, TelegramChannel};
        use confidant_core::bus::types::OutboundMessage;

        let telegram = Arc::new(TelegramChannel::new(
            &config.telegram.token,
            bus.clone(),
            Some(recipient),
            confidant_core::utils::get_media_path(),
        ));
        channel_manager.register(telegram.clone());

        let chat_id = recipient.to_string();
        let deliver: DeliverFn = Arc::new(move |text: String| {
            let telegram = telegram.clone();
            let msg = OutboundMessage::new("telegram", chat_id.as_str(), text);
            Box::pin(async move { telegram.send(&msg).await })
        });
        Some(deliver)
    };

    #[cfg(not(feature = "telegram"))]
    let deliver: Option<DeliverFn> = {
        warn!("built without the telegram feature; no channel will be served");
        None
    };

    let scheduler = match deliver {
        Some(deliver) if config.scheduler.enabled => Some(Arc::new(Scheduler::new(
            engine.clone(),
            deliver,
            recipient_session.clone(),
            SchedulerSettings::from(&config.scheduler),
        ))),
        _ => None,
    };

    let probe = gateway.probe().await;
    if !probe.available {
        warn!(api_base = %gateway.api_base(), "LM Studio is not reachable yet");
    }
    info!(
        api_base = %gateway.api_base(),
        model = probe.model_id.as_deref().unwrap_or("-"),
        database = %db_path.display(),
        recipient = %recipient_session,
        scheduler = scheduler.is_some(),
        "confidant starting"
    );

    println!("  LM Studio: {}", gateway.api_base());
    println!("  Model:     {}", probe.model_id.as_deref().unwrap_or("(none loaded)"));
    println!("  Database:  {}", db_path.display());
    println!("  Channels:  {:?}", channel_manager.channel_names());
    if scheduler.is_some() {
        println!(
            "  Random:    every {}–{} min (p={})",
            config.scheduler.min_interval_secs / 60,
            config.scheduler.max_interval_secs / 60,
            config.scheduler.probability
        );
    } else {
        println!("  Random:    disabled");
    }
    println!();
    println!("  Ctrl+C or /exit to stop");
    println!();

    // 5. Run
    let channel_manager = Arc::new(channel_manager);
    {
        let channel_manager = channel_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = channel_manager.start_all().await {
                tracing::error!(error = %e, "channel manager error");
            }
        });
    }
    tokio::spawn(assistant.run());
    if let Some(scheduler) = &scheduler {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start().await });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!();
            info!("received Ctrl+C, shutting down");
        }
        _ = shutdown.notified() => {
            info!("shutdown requested from chat");
        }
    }

    println!("  Shutting down...");
    if let Some(scheduler) = &scheduler {
        scheduler.stop();
    }
    channel_manager.stop_all().await;
    log.close().await;

    let snap = stats.snapshot();
    info!(
        uptime = %format_uptime(snap.uptime.as_secs()),
        received = snap.messages_received,
        sent = snap.messages_sent,
        llm_calls = snap.llm_calls,
        errors = snap.errors,
        "confidant stopped"
    );
    println!("  Stopped after {}. ¡Hasta pronto!", format_uptime(snap.uptime.as_secs()));
    Ok(())
}
