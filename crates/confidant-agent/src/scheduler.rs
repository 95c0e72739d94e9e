//! Random-thought scheduler — unsolicited messages on a randomized cadence.
//!
//! The loop alternates between two states:
//!
//! - **Waiting**: sleep for a random interval (or the failure cooldown).
//!   Shutdown abandons the sleep without starting a cycle.
//! - **Deciding**: draw `u ∈ [0, 1)`; above the configured probability the
//!   wake-up is skipped. Otherwise ask the model for a conversation starter,
//!   answer it with the recipient's history as context, deliver both as one
//!   message and record the exchange in the recipient's session.
//!
//! A failed cycle is logged and followed by the cooldown; the loop never ends
//! on its own.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use confidant_core::config::SchedulerConfig;
use confidant_core::types::MessageEnvelope;

use crate::conversation::ConversationEngine;

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Prompt used to obtain a conversation starter.
pub const QUESTION_PROMPT: &str = "Genera una pregunta interesante y natural para iniciar una conversación casual y cercana.

La pregunta puede ser sobre alguno de estos temas:
- Astronomía
- Cultura
- Inteligencia artificial
- Creatividad e ideas innovadoras
- Programación
- Curiosidades del mundo

Requisitos:
- Que sea cálida y cercana, como si la hiciera una amiga
- Puede incluir un emoji si lo ves apropiado
- Debe invitar a una respuesta reflexiva, no solo sí/no
- Máximo 3 líneas de texto

Devuelve SOLO la pregunta, sin explicaciones, sin comillas, sin introducción.";

const QUESTION_MAX_TOKENS: u32 = 150;

// ─────────────────────────────────────────────
// Callback type
// ─────────────────────────────────────────────

/// Sends a composed message to the recipient.
pub type DeliverFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync,
>;

// ─────────────────────────────────────────────
// Settings and states
// ─────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerSettings {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub probability: f64,
    pub cooldown: Duration,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        SchedulerSettings {
            min_interval: Duration::from_secs(config.min_interval_secs),
            max_interval: Duration::from_secs(config.max_interval_secs),
            probability: config.probability,
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

/// What happens when a wait completes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Wake {
    /// Move to Deciding.
    Decide,
    /// The cooldown ended; start a fresh random wait.
    Rearm,
}

#[derive(Clone, Debug, PartialEq)]
pub enum State {
    Waiting { delay: Duration, wake: Wake },
    Deciding,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    Skip,
    Emit,
}

/// Strip whitespace and surrounding quote characters from a generated question.
pub fn clean_question(raw: &str) -> String {
    const QUOTES: &[char] = &['"', '\'', '“', '”', '«', '»'];
    raw.trim().trim_matches(QUOTES).trim().to_string()
}

/// The composite message delivered for one exchange.
pub fn compose_message(question: &str, answer: &str) -> String {
    format!("💭 **Pensamiento aleatorio:**\n\n❓ _{question}_\n\n{answer}")
}

// ─────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────

pub struct Scheduler {
    engine: Arc<ConversationEngine>,
    deliver: DeliverFn,
    /// Session of the authorized recipient.
    session_id: String,
    settings: SchedulerSettings,
    rng: Mutex<StdRng>,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<ConversationEngine>,
        deliver: DeliverFn,
        session_id: impl Into<String>,
        settings: SchedulerSettings,
    ) -> Self {
        Self::with_rng(engine, deliver, session_id, settings, StdRng::from_entropy())
    }

    /// Build with a specific RNG (seeded in tests).
    pub fn with_rng(
        engine: Arc<ConversationEngine>,
        deliver: DeliverFn,
        session_id: impl Into<String>,
        settings: SchedulerSettings,
        rng: StdRng,
    ) -> Self {
        Scheduler {
            engine,
            deliver,
            session_id: session_id.into(),
            settings,
            rng: Mutex::new(rng),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Uniform random interval within `[min, max]`.
    pub fn next_interval(&self) -> Duration {
        let (min, max) = (self.settings.min_interval, self.settings.max_interval);
        if max <= min {
            return min;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Duration::from_millis(rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64))
    }

    /// Draw once against the configured probability.
    pub fn decide(&self) -> Decision {
        let u: f64 = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen();
        if u > self.settings.probability {
            Decision::Skip
        } else {
            Decision::Emit
        }
    }

    fn waiting(&self) -> State {
        State::Waiting {
            delay: self.next_interval(),
            wake: Wake::Decide,
        }
    }

    /// Run the state machine until [`stop`](Self::stop) is called.
    pub async fn start(&self) {
        info!(
            session = %self.session_id,
            min_s = self.settings.min_interval.as_secs(),
            max_s = self.settings.max_interval.as_secs(),
            probability = self.settings.probability,
            "scheduler started"
        );

        let mut state = self.waiting();
        loop {
            state = match state {
                State::Waiting { delay, wake } => {
                    debug!(delay_s = delay.as_secs(), ?wake, "scheduler waiting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => match wake {
                            Wake::Decide => State::Deciding,
                            Wake::Rearm => self.waiting(),
                        },
                        _ = self.shutdown.notified() => {
                            info!("scheduler shutting down");
                            return;
                        }
                    }
                }
                State::Deciding => self.step().await,
            }
        }
    }

    /// Handle one wake-up and return the next waiting state.
    async fn step(&self) -> State {
        match self.decide() {
            Decision::Skip => {
                self.engine.stats().random_skipped();
                debug!("random message skipped by probability");
                self.waiting()
            }
            Decision::Emit => match self.run_cycle().await {
                Ok(()) => self.waiting(),
                Err(e) => {
                    error!(error = %format!("{e:#}"), "random message cycle failed");
                    State::Waiting {
                        delay: self.settings.cooldown,
                        wake: Wake::Rearm,
                    }
                }
            },
        }
    }

    /// Generate, answer, deliver and record one unsolicited exchange.
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let raw = self
            .engine
            .ask(QUESTION_PROMPT, QUESTION_MAX_TOKENS)
            .await
            .context("question generation failed")?;
        let question = clean_question(&raw);
        if question.is_empty() {
            anyhow::bail!("model returned an empty question");
        }
        info!(question = %question, "random question generated");

        let store = self.engine.store();
        let mut session = store.lock(&self.session_id).await?;

        let user_turn = MessageEnvelope::user(self.session_id.as_str(), question.clone());
        let mut context = session.history().to_vec();
        context.push(user_turn.clone());

        let limits = self.engine.limits().clone();
        let answer = self
            .engine
            .complete(&context, limits.text_max_tokens)
            .await
            .context("answer generation failed")?;

        (self.deliver)(compose_message(&question, &answer))
            .await
            .context("delivery failed")?;

        session.append(user_turn).await?;
        session
            .append(MessageEnvelope::assistant(self.session_id.as_str(), answer))
            .await?;
        session.truncate(limits.text_window);

        let stats = self.engine.stats();
        stats.message_sent();
        stats.random_sent();
        info!(session = %self.session_id, "random message delivered");
        Ok(())
    }

    pub fn stop(&self) {
        info!("stopping scheduler");
        // A stored permit also covers a stop issued mid-cycle.
        self.shutdown.notify_one();
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
