//! Adaptive request builder — history + active model → completion payload.
//!
//! Anti-repetition penalties are only sent to model families known to accept
//! them; other servers reject or misbehave on unknown sampling fields.

use confidant_core::config::{AntiRepetitionConfig, ModelConfig};
use confidant_core::types::{MessageEnvelope, Role};

use crate::payload::{ChatPayload, WireMessage};

/// Builds [`ChatPayload`]s. Pure: no I/O.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    system_prompt: String,
    temperature: f64,
    anti_repetition: AntiRepetitionConfig,
}

impl RequestBuilder {
    pub fn new(
        system_prompt: impl Into<String>,
        temperature: f64,
        anti_repetition: AntiRepetitionConfig,
    ) -> Self {
        RequestBuilder {
            system_prompt: system_prompt.into(),
            temperature,
            anti_repetition,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.system_prompt.clone(),
            config.temperature,
            config.anti_repetition.clone(),
        )
    }

    /// Whether `model_id` belongs to one of the configured families.
    ///
    /// Case-insensitive substring match; an empty id or empty token never matches.
    pub fn wants_penalties(&self, model_id: Option<&str>) -> bool {
        let id = match model_id {
            Some(id) if !id.trim().is_empty() => id.to_lowercase(),
            _ => return false,
        };
        self.anti_repetition
            .families
            .iter()
            .map(|f| f.trim().to_lowercase())
            .any(|family| !family.is_empty() && id.contains(&family))
    }

    /// Assemble the payload: one system turn, then the history in order.
    ///
    /// System turns inside `history` are dropped so the configured
    /// instructions are the only system entry.
    pub fn build(
        &self,
        history: &[MessageEnvelope],
        active_model_id: Option<&str>,
        max_tokens: u32,
    ) -> ChatPayload {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage::system(self.system_prompt.clone()));
        messages.extend(
            history
                .iter()
                .filter(|env| env.role != Role::System)
                .map(WireMessage::from),
        );

        let penalties = self.wants_penalties(active_model_id);
        let ar = &self.anti_repetition;

        ChatPayload {
            messages,
            temperature: self.temperature,
            max_tokens,
            stream: false,
            repeat_penalty: penalties.then_some(ar.repeat_penalty),
            frequency_penalty: penalties.then_some(ar.frequency_penalty),
            presence_penalty: penalties.then_some(ar.presence_penalty),
        }
    }
}
