//! Model gateway trait — the seam between the assistant and the model server.
//!
//! `LmStudioGateway` in `http_gateway.rs` is the production implementation;
//! tests substitute in-process mocks.

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::ChatPayload;

/// Outcome of asking the server which model is active.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbeResult {
    /// The server answered the probe with a success status.
    pub available: bool,
    /// Id of the first loaded model, if any.
    pub model_id: Option<String>,
}

impl ProbeResult {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn has_model(&self) -> bool {
        self.model_id.is_some()
    }
}

/// Why a completion produced no text.
///
/// The `Display` strings are user-facing; foreground cycles store them as the
/// assistant's turn.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GatewayFailure {
    #[error("Error de conexión con LM Studio: {0}")]
    Transport(String),

    #[error("Error del LLM (status {status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("Respuesta inválida del LLM: {0}")]
    Malformed(String),
}

impl GatewayFailure {
    /// Short machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayFailure::Transport(_) => "transport",
            GatewayFailure::Upstream { .. } => "server_error",
            GatewayFailure::Malformed(_) => "malformed",
        }
    }
}

/// A local OpenAI-compatible model server.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Report availability and the active model. Never fails.
    async fn probe(&self) -> ProbeResult;

    /// Run one non-streaming completion. No retries.
    async fn complete(&self, payload: &ChatPayload) -> Result<String, GatewayFailure>;
}
