//! Test doubles shared by the agent crate's unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use confidant_core::config::AntiRepetitionConfig;
use confidant_core::session::{ConversationStore, DurableLog};
use confidant_core::StatsCounter;
use confidant_providers::payload::{WireContent, WirePart};
use confidant_providers::{
    ChatPayload, GatewayFailure, ManagerError, ModelGateway, ModelManager, ProbeResult,
    RequestBuilder,
};

use crate::conversation::{ConversationEngine, CycleLimits};

/// Scripted gateway: replays queued results, or echoes the last turn.
pub struct MockGateway {
    probe: Mutex<ProbeResult>,
    replies: Mutex<VecDeque<Result<String, GatewayFailure>>>,
    payloads: Mutex<Vec<ChatPayload>>,
    echo: bool,
    delay: Duration,
    blocker: Mutex<Option<(String, Arc<Notify>)>>,
}

impl MockGateway {
    pub fn new(replies: Vec<Result<String, GatewayFailure>>) -> Self {
        MockGateway {
            probe: Mutex::new(ProbeResult {
                available: true,
                model_id: Some("mock-model".into()),
            }),
            replies: Mutex::new(replies.into()),
            payloads: Mutex::new(Vec::new()),
            echo: false,
            delay: Duration::ZERO,
            blocker: Mutex::new(None),
        }
    }

    /// Replies `"eco: <last turn text>"` to every request.
    pub fn echo() -> Self {
        MockGateway {
            echo: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_probe(self, probe: ProbeResult) -> Self {
        *self.probe.lock().unwrap() = probe;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_probe(&self, probe: ProbeResult) {
        *self.probe.lock().unwrap() = probe;
    }

    /// Requests whose last turn is `word` wait until the returned notify fires.
    pub fn block_on(&self, word: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.blocker.lock().unwrap() = Some((word.to_string(), notify.clone()));
        notify
    }

    pub fn payloads(&self) -> Vec<ChatPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

fn last_text(payload: &ChatPayload) -> String {
    match payload.messages.last().map(|m| &m.content) {
        Some(WireContent::Text(t)) => t.clone(),
        Some(WireContent::Parts(parts)) => parts
            .iter()
            .filter_map(|p| match p {
                WirePart::Text { text } => Some(text.as_str()),
                WirePart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn probe(&self) -> ProbeResult {
        self.probe.lock().unwrap().clone()
    }

    async fn complete(&self, payload: &ChatPayload) -> Result<String, GatewayFailure> {
        self.payloads.lock().unwrap().push(payload.clone());
        let last = last_text(payload);

        let gate = self
            .blocker
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(word, _)| *word == last)
            .map(|(_, notify)| notify.clone());
        if let Some(notify) = gate {
            notify.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.echo {
            return Ok(format!("eco: {last}"));
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("(sin respuesta)".into()))
    }
}

/// Model manager that records calls and returns scripted results.
pub struct MockManager {
    pub models: Vec<String>,
    pub fail_with: Option<ManagerError>,
    pub calls: Mutex<Vec<String>>,
}

impl MockManager {
    pub fn new(models: &[&str]) -> Self {
        MockManager {
            models: models.iter().map(|m| m.to_string()).collect(),
            fail_with: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ManagerError) -> Self {
        MockManager {
            fail_with: Some(error),
            ..Self::new(&[])
        }
    }

    fn outcome(&self, call: String) -> Result<(), ManagerError> {
        self.calls.lock().unwrap().push(call);
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ModelManager for MockManager {
    async fn list(&self) -> Result<Vec<String>, ManagerError> {
        self.outcome("ls".into())?;
        Ok(self.models.clone())
    }

    async fn load(&self, name: &str) -> Result<(), ManagerError> {
        self.outcome(format!("load {name}"))
    }

    async fn unload(&self) -> Result<(), ManagerError> {
        self.outcome("unload".into())
    }
}

pub fn engine_with_store(
    store: Arc<ConversationStore>,
    gateway: Arc<dyn ModelGateway>,
) -> ConversationEngine {
    ConversationEngine::new(
        store,
        gateway,
        RequestBuilder::new("Eres un asistente.", 0.7, AntiRepetitionConfig::default()),
        Arc::new(StatsCounter::new()),
        CycleLimits::default(),
    )
}

pub async fn make_engine(gateway: Arc<dyn ModelGateway>) -> ConversationEngine {
    let store = Arc::new(ConversationStore::new(
        DurableLog::in_memory().await.unwrap(),
    ));
    engine_with_store(store, gateway)
}
