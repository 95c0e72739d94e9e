//! Conversation engine — one request cycle against the model, per session.
//!
//! A cycle holds the session lock from the user append until truncation:
//!
//! 1. lock (hydrating on first contact)
//! 2. persist + cache the user turn
//! 3. probe the active model, build the payload, complete
//! 4. persist + cache the assistant turn (the failure text on gateway errors)
//! 5. truncate the cache to the text or image window

use std::sync::Arc;

use tracing::{debug, info, warn};

use confidant_core::config::Config;
use confidant_core::session::ConversationStore;
use confidant_core::types::{Content, MessageEnvelope};
use confidant_core::{StatsCounter, StoreResult};
use confidant_providers::{GatewayFailure, ModelGateway, RequestBuilder};

/// Caption used when a photo arrives without one.
pub const DEFAULT_IMAGE_CAPTION: &str = "Describe esta imagen en detalle.";

/// Token budgets and cache windows for the two cycle kinds.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleLimits {
    pub text_max_tokens: u32,
    pub image_max_tokens: u32,
    pub text_window: usize,
    pub image_window: usize,
}

impl Default for CycleLimits {
    fn default() -> Self {
        Self {
            text_max_tokens: 500,
            image_max_tokens: 1000,
            text_window: 20,
            image_window: 10,
        }
    }
}

impl CycleLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            text_max_tokens: config.model.text_max_tokens,
            image_max_tokens: config.model.image_max_tokens,
            text_window: config.storage.text_window,
            image_window: config.storage.image_window,
        }
    }
}

/// Result of a foreground cycle that reached the model.
#[derive(Clone, Debug)]
pub struct CycleOutcome {
    /// Text stored as the assistant turn and sent to the user.
    pub reply: String,
    /// Set when `reply` is a gateway failure message.
    pub failure: Option<GatewayFailure>,
}

impl CycleOutcome {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

// ─────────────────────────────────────────────
// ConversationEngine
// ─────────────────────────────────────────────

pub struct ConversationEngine {
    store: Arc<ConversationStore>,
    gateway: Arc<dyn ModelGateway>,
    builder: RequestBuilder,
    stats: Arc<StatsCounter>,
    limits: CycleLimits,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<ConversationStore>,
        gateway: Arc<dyn ModelGateway>,
        builder: RequestBuilder,
        stats: Arc<StatsCounter>,
        limits: CycleLimits,
    ) -> Self {
        info!(
            text_window = limits.text_window,
            image_window = limits.image_window,
            "conversation engine initialized"
        );
        ConversationEngine {
            store,
            gateway,
            builder,
            stats,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    pub fn stats(&self) -> &Arc<StatsCounter> {
        &self.stats
    }

    pub fn limits(&self) -> &CycleLimits {
        &self.limits
    }

    /// Probe for the active model, then complete `history`.
    ///
    /// Counts `llm_calls` on success and `errors` on failure.
    pub async fn complete(
        &self,
        history: &[MessageEnvelope],
        max_tokens: u32,
    ) -> Result<String, GatewayFailure> {
        let probe = self.gateway.probe().await;
        let payload = self
            .builder
            .build(history, probe.model_id.as_deref(), max_tokens);

        match self.gateway.complete(&payload).await {
            Ok(text) => {
                self.stats.llm_call();
                Ok(text)
            }
            Err(failure) => {
                self.stats.error();
                warn!(
                    kind = failure.kind(),
                    model = probe.model_id.as_deref().unwrap_or("-"),
                    error = %failure,
                    "completion failed"
                );
                Err(failure)
            }
        }
    }

    /// One-shot prompt outside any session (question generation, health checks).
    pub async fn ask(&self, prompt: &str, max_tokens: u32) -> Result<String, GatewayFailure> {
        let history = [MessageEnvelope::user("", prompt)];
        self.complete(&history, max_tokens).await
    }

    /// Run a full cycle for `content` in `session_id`.
    ///
    /// Gateway failures become the assistant turn. Persistence failures abort
    /// the cycle and are returned.
    pub async fn run_cycle(&self, session_id: &str, content: Content) -> StoreResult<CycleOutcome> {
        let multimodal = content.has_image();
        let (max_tokens, window) = if multimodal {
            (self.limits.image_max_tokens, self.limits.image_window)
        } else {
            (self.limits.text_max_tokens, self.limits.text_window)
        };

        let mut session = self.store.lock(session_id).await?;
        session
            .append(MessageEnvelope::user(session_id, content))
            .await?;

        debug!(
            session = %session_id,
            history = session.history().len(),
            multimodal,
            "cycle started"
        );

        let (reply, failure) = match self.complete(session.history(), max_tokens).await {
            Ok(text) => (text, None),
            Err(failure) => (failure.to_string(), Some(failure)),
        };

        session
            .append(MessageEnvelope::assistant(session_id, reply.clone()))
            .await?;
        session.truncate(window);

        Ok(CycleOutcome { reply, failure })
    }

    pub async fn text_cycle(&self, session_id: &str, text: &str) -> StoreResult<CycleOutcome> {
        self.run_cycle(session_id, Content::Text(text.to_string()))
            .await
    }

    /// Image cycle; an empty or missing caption becomes [`DEFAULT_IMAGE_CAPTION`].
    pub async fn image_cycle(
        &self,
        session_id: &str,
        encoding: &str,
        data: String,
        caption: Option<&str>,
    ) -> StoreResult<CycleOutcome> {
        let caption = caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_IMAGE_CAPTION);
        self.run_cycle(
            session_id,
            Content::image_with_caption(encoding, data, caption),
        )
        .await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_engine, MockGateway};
    use confidant_core::session::DurableLog;
    use confidant_core::types::{Part, Role};
    use confidant_providers::payload::WireContent;
    use confidant_providers::{LmStudioGateway, ProbeResult};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_hola_scenario() {
        let gateway = Arc::new(MockGateway::new(vec![Ok("¡Hola! ¿En qué puedo ayudarte?".into())]));
        let engine = make_engine(gateway.clone()).await;

        let outcome = engine.text_cycle("telegram:1", "Hola").await.unwrap();
        assert_eq!(outcome.reply, "¡Hola! ¿En qué puedo ayudarte?");
        assert!(!outcome.failed());

        let session = engine.store().get_or_hydrate("telegram:1").await.unwrap();
        assert_eq!(session.cache.len(), 2);
        assert_eq!(session.cache[0].role, Role::User);
        assert_eq!(session.cache[0].content, Content::Text("Hola".into()));
        assert_eq!(session.cache[1].role, Role::Assistant);
        assert_eq!(engine.store().log().count("telegram:1").await.unwrap(), 2);

        let payloads = gateway.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].messages.len(), 2);
        assert_eq!(payloads[0].messages[0].role, Role::System);
        assert_eq!(payloads[0].max_tokens, 500);
        assert_eq!(engine.stats().snapshot().llm_calls, 1);
    }

    #[tokio::test]
    async fn test_captionless_image_eleven_stored_ten_cached() {
        let gateway = Arc::new(MockGateway::new(vec![Ok("Veo un gato.".into())]));
        let engine = make_engine(gateway.clone()).await;

        for i in 0..9 {
            engine
                .store()
                .append("s", MessageEnvelope::user("s", format!("m{i}")))
                .await
                .unwrap();
        }

        let outcome = engine
            .image_cycle("s", "image/jpeg", "QUJD".into(), None)
            .await
            .unwrap();
        assert_eq!(outcome.reply, "Veo un gato.");

        let session = engine.store().get_or_hydrate("s").await.unwrap();
        assert_eq!(engine.store().log().count("s").await.unwrap(), 11);
        assert_eq!(session.cache.len(), 10);
        assert_eq!(session.cache[0].content.text(), "m1");

        match &session.cache[8].content {
            Content::Parts(parts) => {
                assert!(matches!(parts[0], Part::Image { .. }));
                assert_eq!(
                    parts[1],
                    Part::Text {
                        value: DEFAULT_IMAGE_CAPTION.into()
                    }
                );
            }
            other => panic!("Expected parts, got {other:?}"),
        }
        assert_eq!(session.cache[9].role, Role::Assistant);
        assert_eq!(gateway.payloads()[0].max_tokens, 1000);
    }

    #[tokio::test]
    async fn test_http_500_becomes_assistant_turn() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": [{"id": "gemma-3"}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let gateway = Arc::new(
            LmStudioGateway::new(server.uri(), Duration::from_secs(5), Duration::from_secs(5))
                .unwrap(),
        );
        let engine = make_engine(gateway).await;

        let outcome = engine.text_cycle("s", "Hola").await.unwrap();
        assert!(outcome.failed());
        assert_eq!(outcome.reply, "Error del LLM (status 500): internal error");

        let session = engine.store().get_or_hydrate("s").await.unwrap();
        assert_eq!(session.cache.len(), 2);
        assert_eq!(session.cache[1].content.text(), outcome.reply);

        let snap = engine.stats().snapshot();
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.llm_calls, 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_before_model_call() {
        let gateway = Arc::new(MockGateway::new(vec![Ok("never".into())]));
        let engine = make_engine(gateway.clone()).await;
        engine.store().get_or_hydrate("s").await.unwrap();

        engine.store().log().close().await;
        let result = engine.text_cycle("s", "Hola").await;

        assert!(result.is_err());
        assert!(gateway.payloads().is_empty());
        let session = engine.store().lock("s").await.unwrap();
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_probe_selects_penalties() {
        let gateway = Arc::new(
            MockGateway::new(vec![Ok("a".into()), Ok("b".into())]).with_probe(ProbeResult {
                available: true,
                model_id: Some("qwen2.5-7b-instruct".into()),
            }),
        );
        let engine = make_engine(gateway.clone()).await;
        engine.text_cycle("s", "uno").await.unwrap();

        gateway.set_probe(ProbeResult {
            available: true,
            model_id: Some("gemma-3-12b".into()),
        });
        engine.text_cycle("s", "dos").await.unwrap();

        let payloads = gateway.payloads();
        assert!(payloads[0].has_penalties());
        assert!(!payloads[1].has_penalties());
    }

    #[tokio::test]
    async fn test_history_is_sent_in_order() {
        let gateway = Arc::new(MockGateway::echo());
        let engine = make_engine(gateway.clone()).await;

        engine.text_cycle("s", "primero").await.unwrap();
        engine.text_cycle("s", "segundo").await.unwrap();

        let last = gateway.payloads().pop().unwrap();
        let texts: Vec<String> = last
            .messages
            .iter()
            .skip(1)
            .map(|m| match &m.content {
                WireContent::Text(t) => t.clone(),
                WireContent::Parts(_) => String::new(),
            })
            .collect();
        assert_eq!(texts, vec!["primero", "eco: primero", "segundo"]);
    }

    #[tokio::test]
    async fn test_same_session_cycles_never_interleave() {
        let gateway = Arc::new(MockGateway::echo().with_delay(Duration::from_millis(30)));
        let engine = Arc::new(make_engine(gateway).await);

        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.text_cycle("s", &format!("m{i}")).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let rows = engine.store().log().recent("s", 20).await.unwrap();
        assert_eq!(rows.len(), 8);
        for pair in rows.chunks(2) {
            assert_eq!(pair[0].role, "user");
            assert_eq!(pair[1].role, "assistant");
            assert_eq!(pair[1].content, format!("eco: {}", pair[0].content));
        }
    }

    #[tokio::test]
    async fn test_distinct_sessions_progress_independently() {
        let gateway = Arc::new(MockGateway::echo());
        let release = gateway.block_on("bloquear");
        let engine = Arc::new(make_engine(gateway).await);

        let blocked = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.text_cycle("a", "bloquear").await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let other = tokio::time::timeout(Duration::from_secs(2), engine.text_cycle("b", "hola"))
            .await
            .expect("session b must not wait for session a")
            .unwrap();
        assert_eq!(other.reply, "eco: hola");
        assert!(!blocked.is_finished());

        release.notify_one();
        let outcome = tokio::time::timeout(Duration::from_secs(2), blocked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.reply, "eco: bloquear");
    }

    #[tokio::test]
    async fn test_cold_restart_keeps_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confidant.db");

        {
            let gateway = Arc::new(MockGateway::echo());
            let store = Arc::new(ConversationStore::new(DurableLog::open(&path).await.unwrap()));
            let engine = crate::testing::engine_with_store(store.clone(), gateway);
            for i in 0..12 {
                engine.text_cycle("s", &format!("m{i}")).await.unwrap();
            }
            store.log().close().await;
        }

        let gateway = Arc::new(MockGateway::echo());
        let store = Arc::new(ConversationStore::new(DurableLog::open(&path).await.unwrap()));
        let engine = crate::testing::engine_with_store(store, gateway.clone());
        engine.text_cycle("s", "después").await.unwrap();

        // 20 hydrated + the new user turn, behind the system entry
        let payload = gateway.payloads().pop().unwrap();
        assert_eq!(payload.messages.len(), 22);
    }
}
