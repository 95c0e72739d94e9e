//! Configuration schema.
//!
//! Hierarchy: `Config` → `TelegramConfig`, `ModelConfig`, `SchedulerConfig`,
//! `StorageConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration, loaded from `~/.confidant/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub model: ModelConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
}

/// A configuration that cannot be run.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("telegram.token is empty (set TELEGRAM_TOKEN)")]
    MissingToken,
    #[error("telegram.allowedUser is not set (set ALLOWED_USER_ID)")]
    MissingRecipient,
    #[error("scheduler.minIntervalSecs ({min}) exceeds scheduler.maxIntervalSecs ({max})")]
    IntervalOrder { min: u64, max: u64 },
    #[error("scheduler.probability must be within [0, 1], got {0}")]
    Probability(f64),
    #[error("scheduler.cooldownSecs ({cooldown}) must be shorter than scheduler.minIntervalSecs ({min})")]
    CooldownTooLong { cooldown: u64, min: u64 },
    #[error("storage.{field} must be greater than zero")]
    ZeroWindow { field: &'static str },
}

impl Config {
    /// Check everything needed to serve the bot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.telegram.allowed_user.is_none() {
            return Err(ConfigError::MissingRecipient);
        }
        self.validate_runtime()
    }

    /// Checks that do not depend on Telegram credentials.
    pub fn validate_runtime(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.min_interval_secs > s.max_interval_secs {
            return Err(ConfigError::IntervalOrder {
                min: s.min_interval_secs,
                max: s.max_interval_secs,
            });
        }
        if !(0.0..=1.0).contains(&s.probability) {
            return Err(ConfigError::Probability(s.probability));
        }
        if s.enabled && s.cooldown_secs >= s.min_interval_secs {
            return Err(ConfigError::CooldownTooLong {
                cooldown: s.cooldown_secs,
                min: s.min_interval_secs,
            });
        }
        for (field, value) in [
            ("hydrateLimit", self.storage.hydrate_limit),
            ("textWindow", self.storage.text_window),
            ("imageWindow", self.storage.image_window),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroWindow { field });
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Telegram
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub token: String,
    /// The only user the bot talks to, and the recipient of unsolicited messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_user: Option<i64>,
}

// ─────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────

/// Local model server settings (OpenAI-compatible API).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    /// Base URL, including the `/v1` suffix.
    pub api_base: String,
    /// Instructions prepended to every request as the single system turn.
    pub system_prompt: String,
    pub temperature: f64,
    pub text_max_tokens: u32,
    pub image_max_tokens: u32,
    pub probe_timeout_secs: u64,
    pub completion_timeout_secs: u64,
    pub anti_repetition: AntiRepetitionConfig,
    /// Model-management CLI used by `/load` and `/unload`.
    pub lms_binary: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:1234/v1".to_string(),
            system_prompt: "Eres un asistente personal cercano y útil. Respondes en español, \
                            con claridad y sin rodeos."
                .to_string(),
            temperature: 0.7,
            text_max_tokens: 500,
            image_max_tokens: 1000,
            probe_timeout_secs: 5,
            completion_timeout_secs: 60,
            anti_repetition: AntiRepetitionConfig::default(),
            lms_binary: "lms".to_string(),
        }
    }
}

/// Sampling penalties applied only to model families prone to loops.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AntiRepetitionConfig {
    /// Case-insensitive substrings matched against the active model id.
    pub families: Vec<String>,
    pub repeat_penalty: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

impl Default for AntiRepetitionConfig {
    fn default() -> Self {
        Self {
            families: vec!["qwen".to_string(), "llama".to_string()],
            repeat_penalty: 1.1,
            frequency_penalty: 0.3,
            presence_penalty: 0.2,
        }
    }
}

// ─────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────

/// Unsolicited "random thought" messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    /// Chance that a wake-up produces a message.
    pub probability: f64,
    /// Pause after a failed cycle.
    pub cooldown_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: 3600,
            max_interval_secs: 7200,
            probability: 0.5,
            cooldown_secs: 60,
        }
    }
}

// ─────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// SQLite database file (`~` is expanded).
    pub database_path: String,
    /// Envelopes read back from the log when a session is first touched.
    pub hydrate_limit: usize,
    /// Cache window after a text exchange.
    pub text_window: usize,
    /// Cache window after an image exchange.
    pub image_window: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "~/.confidant/confidant.db".to_string(),
            hydrate_limit: 20,
            text_window: 20,
            image_window: 10,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
