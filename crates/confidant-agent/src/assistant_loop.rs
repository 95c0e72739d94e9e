//! Assistant loop — consumes inbound chat messages and answers them.
//!
//! Each inbound message is handled on its own task. Commands are dispatched
//! first, then photos, then plain text. Messages from the same session are
//! serialized by the conversation store's per-session lock; different
//! sessions proceed independently.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use confidant_core::bus::queue::MessageBus;
use confidant_core::bus::types::{InboundMessage, OutboundMessage};
use confidant_core::utils::truncate_string;
use confidant_providers::ModelManager;

use crate::commands::{
    format_cleared, format_manager_error, format_model_list, format_stats, Command,
    GOODBYE_TEXT, HEALTH_CHECK_PROMPT, HELP_TEXT, WELCOME_TEXT,
};
use crate::conversation::ConversationEngine;

const IMAGE_PROGRESS_TEXT: &str = "🔍 Analizando la imagen...";
const IMAGE_READ_ERROR_TEXT: &str = "❌ Error al descargar la imagen. Por favor, intenta de nuevo.";
const VISION_HINT: &str =
    "Verifica que LM Studio tenga un modelo de visión cargado (como Qwen3-VL).";
const HEALTH_CHECK_MAX_TOKENS: u32 = 10;

/// Pauses around model management and shutdown.
#[derive(Clone, Debug)]
pub struct CommandTimings {
    /// Wait after `lms load` before probing.
    pub load_settle: Duration,
    /// Wait after `lms unload` before re-probing.
    pub unload_settle: Duration,
    /// Wait after the goodbye reply before signalling shutdown.
    pub exit_delay: Duration,
}

impl Default for CommandTimings {
    fn default() -> Self {
        Self {
            load_settle: Duration::from_secs(3),
            unload_settle: Duration::from_secs(1),
            exit_delay: Duration::from_secs(1),
        }
    }
}

// ─────────────────────────────────────────────
// AssistantLoop
// ─────────────────────────────────────────────

pub struct AssistantLoop {
    bus: Arc<MessageBus>,
    engine: Arc<ConversationEngine>,
    manager: Arc<dyn ModelManager>,
    /// Notified by `/exit`; the binary waits on it.
    shutdown: Arc<Notify>,
    timings: CommandTimings,
}

impl AssistantLoop {
    pub fn new(
        bus: Arc<MessageBus>,
        engine: Arc<ConversationEngine>,
        manager: Arc<dyn ModelManager>,
        shutdown: Arc<Notify>,
    ) -> Self {
        AssistantLoop {
            bus,
            engine,
            manager,
            shutdown,
            timings: CommandTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: CommandTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Poll inbound messages until the inbound channel is closed.
    pub async fn run(self: Arc<Self>) {
        info!("assistant loop started, waiting for messages");
        while let Some(msg) = self.bus.consume_inbound().await {
            debug!(session = %msg.session_key(), "received message");
            let this = self.clone();
            tokio::spawn(async move { this.handle(msg).await });
        }
        info!("inbound channel closed, assistant loop stopped");
    }

    /// Handle a single inbound message to completion.
    pub async fn handle(&self, msg: InboundMessage) {
        if let Some((name, args)) = msg.command() {
            let command = Command::parse(&name, &args);
            info!(command = %name, "handling command");
            let reply = self.run_command(&msg, &command).await;
            self.reply(&msg, reply).await;

            if command == Command::Exit {
                tokio::time::sleep(self.timings.exit_delay).await;
                info!("shutdown requested by user");
                self.shutdown.notify_one();
            }
        } else if !msg.media.is_empty() {
            self.handle_photo(&msg).await;
        } else if !msg.content.trim().is_empty() {
            self.handle_text(&msg).await;
        } else {
            debug!("ignoring empty message");
        }
    }

    /// Final reply to a message; counted in `messages_sent`.
    async fn reply(&self, to: &InboundMessage, content: String) {
        self.publish(OutboundMessage::reply(to, content)).await;
        self.engine.stats().message_sent();
    }

    /// Intermediate status text; not counted.
    async fn progress(&self, to: &InboundMessage, content: impl Into<String>) {
        self.publish(OutboundMessage::reply(to, content)).await;
    }

    async fn publish(&self, msg: OutboundMessage) {
        if let Err(e) = self.bus.publish_outbound(msg).await {
            error!(error = %e, "failed to publish outbound message");
        }
    }

    // ─────────────────────────────────────────────
    // Conversation
    // ─────────────────────────────────────────────

    async fn handle_text(&self, msg: &InboundMessage) {
        let stats = self.engine.stats();
        stats.message_received();

        let session = msg.session_key();
        let reply = match self.engine.text_cycle(&session, msg.content.trim()).await {
            Ok(outcome) => outcome.reply,
            Err(e) => {
                stats.error();
                error!(session = %session, error = %e, "text cycle aborted");
                format!("❌ Error al guardar la conversación: {e}")
            }
        };
        self.reply(msg, reply).await;
    }

    async fn handle_photo(&self, msg: &InboundMessage) {
        let stats = self.engine.stats();
        stats.image_received();
        self.progress(msg, IMAGE_PROGRESS_TEXT).await;

        let media = &msg.media[0];
        let bytes = match tokio::fs::read(&media.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                stats.error();
                error!(path = %media.path, error = %e, "failed to read downloaded photo");
                self.reply(msg, IMAGE_READ_ERROR_TEXT.to_string()).await;
                return;
            }
        };
        if let Err(e) = tokio::fs::remove_file(&media.path).await {
            debug!(path = %media.path, error = %e, "could not remove downloaded photo");
        }

        let data = STANDARD.encode(&bytes);
        debug!(bytes = bytes.len(), mime = %media.mime_type, "photo encoded");

        let session = msg.session_key();
        let caption = Some(msg.content.as_str());
        let reply = match self
            .engine
            .image_cycle(&session, &media.mime_type, data, caption)
            .await
        {
            Ok(outcome) if outcome.failed() => format!("⚠️ {}\n\n{VISION_HINT}", outcome.reply),
            Ok(outcome) => format!("📸 **Análisis de imagen:**\n\n{}", outcome.reply),
            Err(e) => {
                stats.error();
                error!(session = %session, error = %e, "image cycle aborted");
                format!("❌ Error al guardar la conversación: {e}")
            }
        };
        self.reply(msg, reply).await;
    }

    // ─────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────

    async fn run_command(&self, msg: &InboundMessage, command: &Command) -> String {
        let session = msg.session_key();
        match command {
            Command::Start => {
                if let Err(e) = self.engine.store().get_or_hydrate(&session).await {
                    warn!(session = %session, error = %e, "hydration failed on /start");
                }
                WELCOME_TEXT.to_string()
            }
            Command::Help => HELP_TEXT.to_string(),
            Command::Stats => {
                let probe = self.engine.gateway().probe().await;
                format_stats(&probe, &self.engine.stats().snapshot())
            }
            Command::Clear => match self.engine.store().clear(&session).await {
                Ok(removed) => {
                    info!(session = %session, removed, "history cleared");
                    format_cleared(removed)
                }
                Err(e) => {
                    self.engine.stats().error();
                    error!(session = %session, error = %e, "clear failed");
                    format!("❌ Error al limpiar el historial: {e}")
                }
            },
            Command::Load(None) => self.list_models(msg).await,
            Command::Load(Some(name)) => self.load_model(msg, name).await,
            Command::Unload => self.unload_model(msg).await,
            Command::Exit => GOODBYE_TEXT.to_string(),
            Command::Unknown(name) => format!(
                "❓ Comando desconocido: /{name}\nUsa /help para ver los comandos disponibles."
            ),
        }
    }

    async fn list_models(&self, msg: &InboundMessage) -> String {
        self.progress(msg, "📋 Listando modelos disponibles...").await;
        match self.manager.list().await {
            Ok(models) => format_model_list(&models),
            Err(e) => format_manager_error("listar modelos", &e),
        }
    }

    async fn load_model(&self, msg: &InboundMessage, name: &str) -> String {
        self.progress(msg, format!("⏳ Cargando modelo `{name}`..."))
            .await;

        if let Err(e) = self.manager.load(name).await {
            warn!(model = %name, error = %e, "model load failed");
            return format_manager_error("cargar modelo", &e);
        }

        tokio::time::sleep(self.timings.load_settle).await;
        let probe = self.engine.gateway().probe().await;
        let Some(loaded) = probe.model_id else {
            return "⚠️ Comando ejecutado, pero no se detecta modelo cargado.\n\
                    Verifica LM Studio manualmente."
                .into();
        };

        match self
            .engine
            .ask(HEALTH_CHECK_PROMPT, HEALTH_CHECK_MAX_TOKENS)
            .await
        {
            Ok(_) => {
                info!(model = %loaded, "model loaded and responding");
                format!("✅ Modelo cargado y funcionando\n🤖 Modelo activo: `{loaded}`")
            }
            Err(failure) => format!(
                "⚠️ Modelo cargado pero falla al responder:\n\
                 🤖 Modelo: `{loaded}`\n\
                 ❌ Error: `{}`\n\n\
                 Posibles causas:\n\
                 • System prompt incompatible\n\
                 • Modelo requiere parámetros específicos\n\
                 • Versión beta inestable",
                truncate_string(&failure.to_string(), 150)
            ),
        }
    }

    async fn unload_model(&self, msg: &InboundMessage) -> String {
        let before = self.engine.gateway().probe().await;
        let Some(current) = before.model_id else {
            return "ℹ️ No hay ningún modelo cargado actualmente".into();
        };

        self.progress(msg, format!("⏳ Descargando modelo `{current}`..."))
            .await;
        if let Err(e) = self.manager.unload().await {
            warn!(model = %current, error = %e, "model unload failed");
            return format_manager_error("descargar", &e);
        }

        tokio::time::sleep(self.timings.unload_settle).await;
        let after = self.engine.gateway().probe().await;
        if after.model_id.as_deref() == Some(current.as_str()) {
            "⚠️ El comando se ejecutó pero el modelo sigue cargado".into()
        } else {
            info!(model = %current, "model unloaded");
            format!("✅ Modelo descargado correctamente\n🔓 `{current}` ya no está en memoria")
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_engine, MockGateway, MockManager};
    use confidant_core::types::{MediaAttachment, Part, Role};
    use confidant_core::types::Content;
    use confidant_providers::{GatewayFailure, ManagerError, ProbeResult};

    fn zero_timings() -> CommandTimings {
        CommandTimings {
            load_settle: Duration::ZERO,
            unload_settle: Duration::ZERO,
            exit_delay: Duration::ZERO,
        }
    }

    async fn make_loop(
        gateway: Arc<MockGateway>,
        manager: MockManager,
    ) -> (Arc<AssistantLoop>, Arc<MessageBus>, Arc<Notify>) {
        let bus = Arc::new(MessageBus::new(32));
        let engine = Arc::new(make_engine(gateway).await);
        let shutdown = Arc::new(Notify::new());
        let assistant = AssistantLoop::new(bus.clone(), engine, Arc::new(manager), shutdown.clone())
            .with_timings(zero_timings());
        (Arc::new(assistant), bus, shutdown)
    }

    /// Everything published so far.
    async fn drain(bus: &MessageBus) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(20), bus.consume_outbound()).await
        {
            out.push(msg);
        }
        out
    }

    fn text(content: &str) -> InboundMessage {
        let mut msg = InboundMessage::new("telegram", "42", "42", content);
        msg.metadata.insert("message_id".into(), "7".into());
        msg
    }

    #[tokio::test]
    async fn test_text_message_reply() {
        let gateway = Arc::new(MockGateway::new(vec![Ok("¡Hola! ¿Qué tal?".into())]));
        let (assistant, bus, _) = make_loop(gateway, MockManager::new(&[])).await;

        assistant.handle(text("Hola")).await;

        let out = drain(&bus).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chat_id, "42");
        assert_eq!(out[0].content, "¡Hola! ¿Qué tal?");
        assert_eq!(out[0].reply_to.as_deref(), Some("7"));

        let snap = assistant.engine.stats().snapshot();
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.llm_calls, 1);
    }

    #[tokio::test]
    async fn test_empty_text_is_ignored() {
        let gateway = Arc::new(MockGateway::echo());
        let (assistant, bus, _) = make_loop(gateway.clone(), MockManager::new(&[])).await;

        assistant.handle(text("   ")).await;

        assert!(drain(&bus).await.is_empty());
        assert!(gateway.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_failure_reply_is_stored() {
        let gateway = Arc::new(MockGateway::new(vec![Err(GatewayFailure::Transport(
            "connection refused".into(),
        ))]));
        let (assistant, bus, _) = make_loop(gateway, MockManager::new(&[])).await;

        assistant.handle(text("Hola")).await;

        let out = drain(&bus).await;
        assert_eq!(
            out[0].content,
            "Error de conexión con LM Studio: connection refused"
        );
        let session = assistant
            .engine
            .store()
            .get_or_hydrate("telegram:42")
            .await
            .unwrap();
        assert_eq!(session.cache.len(), 2);
        assert_eq!(assistant.engine.stats().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_photo_is_encoded_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"ABC").unwrap();

        let gateway = Arc::new(MockGateway::new(vec![Ok("Un gato naranja.".into())]));
        let (assistant, bus, _) = make_loop(gateway.clone(), MockManager::new(&[])).await;

        let mut msg = text("");
        msg.media.push(MediaAttachment {
            mime_type: "image/jpeg".into(),
            path: path.to_string_lossy().into_owned(),
            size: Some(3),
        });
        assistant.handle(msg).await;

        let out = drain(&bus).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, IMAGE_PROGRESS_TEXT);
        assert_eq!(out[1].content, "📸 **Análisis de imagen:**\n\nUn gato naranja.");
        assert!(!path.exists());

        let session = assistant
            .engine
            .store()
            .get_or_hydrate("telegram:42")
            .await
            .unwrap();
        match &session.cache[0].content {
            Content::Parts(parts) => assert_eq!(
                parts[0],
                Part::Image {
                    encoding: "image/jpeg".into(),
                    data: "QUJD".into()
                }
            ),
            other => panic!("Expected parts, got {other:?}"),
        }
        assert_eq!(session.cache[1].role, Role::Assistant);

        let snap = assistant.engine.stats().snapshot();
        assert_eq!(snap.images_received, 1);
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(gateway.payloads()[0].max_tokens, 1000);
    }

    #[tokio::test]
    async fn test_photo_failure_hints_vision_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"ABC").unwrap();

        let gateway = Arc::new(MockGateway::new(vec![Err(GatewayFailure::Upstream {
            status: 400,
            body: "model does not support images".into(),
        })]));
        let (assistant, bus, _) = make_loop(gateway, MockManager::new(&[])).await;

        let mut msg = text("¿Qué ves?");
        msg.media.push(MediaAttachment {
            mime_type: "image/jpeg".into(),
            path: path.to_string_lossy().into_owned(),
            size: None,
        });
        assistant.handle(msg).await;

        let out = drain(&bus).await;
        assert!(out[1].content.starts_with("⚠️ Error del LLM (status 400)"));
        assert!(out[1].content.ends_with(VISION_HINT));
    }

    #[tokio::test]
    async fn test_unreadable_photo() {
        let gateway = Arc::new(MockGateway::echo());
        let (assistant, bus, _) = make_loop(gateway.clone(), MockManager::new(&[])).await;

        let mut msg = text("");
        msg.media.push(MediaAttachment {
            mime_type: "image/jpeg".into(),
            path: "/nonexistent/confidant/photo.jpg".into(),
            size: None,
        });
        assistant.handle(msg).await;

        let out = drain(&bus).await;
        assert_eq!(out[1].content, IMAGE_READ_ERROR_TEXT);
        assert!(gateway.payloads().is_empty());
        assert_eq!(assistant.engine.stats().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_start_and_help() {
        let (assistant, bus, _) = make_loop(Arc::new(MockGateway::echo()), MockManager::new(&[])).await;

        assistant.handle(text("/start")).await;
        assistant.handle(text("/ayuda")).await;

        let out = drain(&bus).await;
        assert_eq!(out[0].content, WELCOME_TEXT);
        assert_eq!(out[1].content, HELP_TEXT);
        assert_eq!(assistant.engine.stats().snapshot().messages_sent, 2);
    }

    #[tokio::test]
    async fn test_stats_command() {
        let (assistant, bus, _) = make_loop(Arc::new(MockGateway::echo()), MockManager::new(&[])).await;

        assistant.handle(text("Hola")).await;
        assistant.handle(text("/stats")).await;

        let out = drain(&bus).await;
        let stats = &out[1].content;
        assert!(stats.contains("🟢 **LM Studio**: Online"));
        assert!(stats.contains("🤖 **Modelo**: mock-model"));
        assert!(stats.contains("📨 **Mensajes recibidos**: 1"));
        assert!(stats.contains("📤 **Mensajes enviados**: 1"));
    }

    #[tokio::test]
    async fn test_clear_command_reports_count() {
        let (assistant, bus, _) = make_loop(Arc::new(MockGateway::echo()), MockManager::new(&[])).await;

        assistant.handle(text("uno")).await;
        assistant.handle(text("dos")).await;
        assistant.handle(text("/clear")).await;

        let out = drain(&bus).await;
        assert!(out[2].content.contains("Eliminados 4 mensajes"));
        let session = assistant
            .engine
            .store()
            .get_or_hydrate("telegram:42")
            .await
            .unwrap();
        assert!(session.cache.is_empty());
    }

    #[tokio::test]
    async fn test_load_without_name_lists_models() {
        let manager = MockManager::new(&["qwen2.5-7b-instruct", "gemma-3-12b"]);
        let (assistant, bus, _) = make_loop(Arc::new(MockGateway::echo()), manager).await;

        assistant.handle(text("/load")).await;

        let out = drain(&bus).await;
        assert_eq!(out[0].content, "📋 Listando modelos disponibles...");
        assert!(out[1].content.contains("• `qwen2.5-7b-instruct`"));
        assert!(out[1].content.contains("• `gemma-3-12b`"));
    }

    #[tokio::test]
    async fn test_load_model_runs_health_check() {
        let gateway = Arc::new(MockGateway::new(vec![Ok("ok".into())]).with_probe(ProbeResult {
            available: true,
            model_id: Some("gemma-3-12b".into()),
        }));
        let (assistant, bus, _) = make_loop(gateway.clone(), MockManager::new(&[])).await;

        assistant.handle(text("/load gemma-3-12b")).await;

        let out = drain(&bus).await;
        assert_eq!(out[0].content, "⏳ Cargando modelo `gemma-3-12b`...");
        assert_eq!(
            out[1].content,
            "✅ Modelo cargado y funcionando\n🤖 Modelo activo: `gemma-3-12b`"
        );
        assert_eq!(gateway.payloads()[0].max_tokens, 10);
    }

    #[tokio::test]
    async fn test_load_model_missing_cli() {
        let manager = MockManager::failing(ManagerError::NotFound("lms".into()));
        let (assistant, bus, _) = make_loop(Arc::new(MockGateway::echo()), manager).await;

        assistant.handle(text("/load qwen")).await;

        let out = drain(&bus).await;
        assert!(out[1].content.contains("'lms' no encontrado"));
    }

    #[tokio::test]
    async fn test_unload_without_model() {
        let gateway = Arc::new(MockGateway::echo().with_probe(ProbeResult::offline()));
        let manager = MockManager::new(&[]);
        let (assistant, bus, _) = make_loop(gateway, manager).await;

        assistant.handle(text("/unload")).await;

        let out = drain(&bus).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "ℹ️ No hay ningún modelo cargado actualmente");
    }

    #[tokio::test]
    async fn test_unload_model_still_loaded() {
        let (assistant, bus, _) = make_loop(Arc::new(MockGateway::echo()), MockManager::new(&[])).await;

        assistant.handle(text("/unload")).await;

        let out = drain(&bus).await;
        assert_eq!(out[0].content, "⏳ Descargando modelo `mock-model`...");
        assert_eq!(
            out[1].content,
            "⚠️ El comando se ejecutó pero el modelo sigue cargado"
        );
    }

    #[tokio::test]
    async fn test_exit_signals_shutdown() {
        let (assistant, bus, shutdown) =
            make_loop(Arc::new(MockGateway::echo()), MockManager::new(&[])).await;

        assistant.handle(text("/salir")).await;

        let out = drain(&bus).await;
        assert_eq!(out[0].content, GOODBYE_TEXT);
        tokio::time::timeout(Duration::from_secs(1), shutdown.notified())
            .await
            .expect("shutdown must be signalled");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let gateway = Arc::new(MockGateway::echo());
        let (assistant, bus, _) = make_loop(gateway.clone(), MockManager::new(&[])).await;

        assistant.handle(text("/foo bar")).await;

        let out = drain(&bus).await;
        assert!(out[0].content.starts_with("❓ Comando desconocido: /foo"));
        assert!(gateway.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_run_dispatches_from_bus() {
        let (assistant, bus, _) = make_loop(Arc::new(MockGateway::echo()), MockManager::new(&[])).await;
        let handle = tokio::spawn(assistant.clone().run());

        bus.publish_inbound(text("Hola")).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), bus.consume_outbound())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "eco: Hola");

        handle.abort();
    }
}
