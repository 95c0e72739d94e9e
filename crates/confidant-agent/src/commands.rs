//! Slash commands understood by the assistant, plus their fixed reply texts.

use confidant_core::utils::{format_uptime, truncate_string};
use confidant_core::StatsSnapshot;
use confidant_providers::{ManagerError, ProbeResult};

/// Maximum models shown by a bare `/load`.
pub const MAX_LISTED_MODELS: usize = 10;

/// Prompt of the post-load health check.
pub const HEALTH_CHECK_PROMPT: &str = "Di solo 'ok'";

pub const WELCOME_TEXT: &str = "¡Hola! 👋 Soy un bot conectado a un LLM local con capacidades de visión.

Comandos disponibles:
/help o /ayuda - Ver ayuda completa
/stats - Ver estadísticas del sistema
/clear - Limpiar historial de conversación
/load - Cargar modelo en LM Studio
/unload - Descargar modelo actual
/exit o /salir - Cerrar el bot

📸 Puedes enviarme imágenes y las analizaré
💬 O simplemente escribe y charlemos
🎲 Las preguntas aleatorias son generadas dinámicamente por el LLM
💾 Tu historial se guarda automáticamente

¡Envíame una imagen o escríbeme lo que quieras!";

pub const HELP_TEXT: &str = "📚 *Ayuda del Bot*

*Comandos disponibles:*
/start - Mensaje de bienvenida
/help o /ayuda - Esta ayuda
/stats - Estadísticas del sistema
/clear - Limpiar historial
/load - Gestionar modelos
/unload - Descargar modelo actual
/exit o /salir - Cerrar el bot

*Funcionalidades:*
📸 Análisis de imágenes
💬 Conversación con contexto
🎲 Mensajes aleatorios
💾 Historial persistente

El bot usa LM Studio local. Usa /stats para ver el modelo activo.";

pub const GOODBYE_TEXT: &str = "👋 Cerrando el bot... ¡Hasta pronto!";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Start,
    Help,
    Stats,
    Clear,
    /// `/load` alone lists models; with an argument it loads that model.
    Load(Option<String>),
    Unload,
    Exit,
    Unknown(String),
}

impl Command {
    /// Map a lowercased command name and its argument string.
    pub fn parse(name: &str, args: &str) -> Self {
        match name {
            "start" => Command::Start,
            "help" | "ayuda" => Command::Help,
            "stats" => Command::Stats,
            "clear" => Command::Clear,
            "load" => {
                let model = args.split_whitespace().collect::<Vec<_>>().join(" ");
                Command::Load(Some(model).filter(|m| !m.is_empty()))
            }
            "unload" => Command::Unload,
            "exit" | "salir" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

pub fn format_stats(probe: &ProbeResult, stats: &StatsSnapshot) -> String {
    let (emoji, status) = if probe.available {
        ("🟢", "Online")
    } else {
        ("🔴", "Offline")
    };
    let model = probe.model_id.as_deref().unwrap_or("Desconocido");

    format!(
        "📊 **Estadísticas del Bot**\n\n\
         {emoji} **LM Studio**: {status}\n\
         🤖 **Modelo**: {model}\n\n\
         ⏱️ **Tiempo activo**: {uptime}\n\
         📨 **Mensajes recibidos**: {received}\n\
         📸 **Imágenes recibidas**: {images}\n\
         📤 **Mensajes enviados**: {sent}\n\
         🎲 **Mensajes aleatorios enviados**: {random_sent}\n\
         ⏭️ **Mensajes aleatorios omitidos**: {random_skipped}\n\
         🔄 **Llamadas al LLM**: {llm_calls}\n\
         ❌ **Errores**: {errors}\n",
        uptime = format_uptime(stats.uptime.as_secs()),
        received = stats.messages_received,
        images = stats.images_received,
        sent = stats.messages_sent,
        random_sent = stats.random_messages_sent,
        random_skipped = stats.random_messages_skipped,
        llm_calls = stats.llm_calls,
        errors = stats.errors,
    )
}

pub fn format_cleared(removed: u64) -> String {
    format!(
        "🧹 Historial de conversación limpiado.\n\
         📊 Eliminados {removed} mensajes de la base de datos.\n\
         ¡Empecemos de nuevo!"
    )
}

pub fn format_model_list(models: &[String]) -> String {
    if models.is_empty() {
        return "❌ No se encontraron modelos descargados".into();
    }
    let list = models
        .iter()
        .take(MAX_LISTED_MODELS)
        .map(|m| format!("• `{m}`"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "📦 **Modelos disponibles:**\n\n{list}\n\n💡 Usa `/load nombre_del_modelo` para cargarlo"
    )
}

/// Reply for a failed `lms` invocation; `action` names the step ("cargar modelo").
pub fn format_manager_error(action: &str, error: &ManagerError) -> String {
    match error {
        ManagerError::NotFound(binary) => format!(
            "❌ Comando '{binary}' no encontrado.\n\
             Asegúrate de que LM Studio CLI esté instalado y en el PATH."
        ),
        ManagerError::Timeout(secs) => {
            format!("⏱️ Tiempo de espera agotado ({secs}s). Reintenta en unos momentos.")
        }
        ManagerError::Failed(detail) => {
            format!("❌ Error al {action}:\n`{}`", truncate_string(detail, 200))
        }
    }
}
