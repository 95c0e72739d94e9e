//! Config loader — reads `~/.confidant/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.confidant/config.json`
//! 3. Environment variables `CONFIDANT_<SECTION>__<FIELD>` (override JSON)
//! 4. Deployment variables `TELEGRAM_TOKEN`, `ALLOWED_USER_ID`,
//!    `SYSTEM_PROMPT`, `LM_STUDIO_URL` (override everything)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from `path` (or the default path) + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    apply_env_overrides(load_config_from_path(&config_path), |key| {
        std::env::var(key).ok()
    })
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

fn set_parsed<T: FromStr>(target: &mut T, key: &str, lookup: &impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!("Ignoring {key}: cannot parse '{raw}'"),
        }
    }
}

fn set_string(target: &mut String, key: &str, lookup: &impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup(key) {
        *target = v;
    }
}

/// Apply environment overrides on top of a loaded config.
///
/// `lookup` resolves a variable name; `std::env::var` in production.
///
/// Every scalar field can be set as `CONFIDANT_<SECTION>__<FIELD>`, e.g.
/// `CONFIDANT_MODEL__COMPLETION_TIMEOUT_SECS` or
/// `CONFIDANT_STORAGE__HYDRATE_LIMIT`. Nested anti-repetition fields use
/// `CONFIDANT_MODEL__ANTI_REPETITION__<FIELD>`; `FAMILIES` is comma separated.
fn apply_env_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    let lookup = &lookup;

    // Telegram
    set_string(&mut config.telegram.token, "CONFIDANT_TELEGRAM__TOKEN", lookup);
    if let Some(raw) = lookup("CONFIDANT_TELEGRAM__ALLOWED_USER") {
        config.telegram.allowed_user = parse_user_id("CONFIDANT_TELEGRAM__ALLOWED_USER", &raw)
            .or(config.telegram.allowed_user);
    }

    // Model
    let model = &mut config.model;
    set_string(&mut model.api_base, "CONFIDANT_MODEL__API_BASE", lookup);
    set_string(&mut model.system_prompt, "CONFIDANT_MODEL__SYSTEM_PROMPT", lookup);
    set_string(&mut model.lms_binary, "CONFIDANT_MODEL__LMS_BINARY", lookup);
    set_parsed(&mut model.temperature, "CONFIDANT_MODEL__TEMPERATURE", lookup);
    set_parsed(&mut model.text_max_tokens, "CONFIDANT_MODEL__TEXT_MAX_TOKENS", lookup);
    set_parsed(&mut model.image_max_tokens, "CONFIDANT_MODEL__IMAGE_MAX_TOKENS", lookup);
    set_parsed(&mut model.probe_timeout_secs, "CONFIDANT_MODEL__PROBE_TIMEOUT_SECS", lookup);
    set_parsed(
        &mut model.completion_timeout_secs,
        "CONFIDANT_MODEL__COMPLETION_TIMEOUT_SECS",
        lookup,
    );

    let anti = &mut model.anti_repetition;
    if let Some(raw) = lookup("CONFIDANT_MODEL__ANTI_REPETITION__FAMILIES") {
        anti.families = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    set_parsed(&mut anti.repeat_penalty, "CONFIDANT_MODEL__ANTI_REPETITION__REPEAT_PENALTY", lookup);
    set_parsed(
        &mut anti.frequency_penalty,
        "CONFIDANT_MODEL__ANTI_REPETITION__FREQUENCY_PENALTY",
        lookup,
    );
    set_parsed(
        &mut anti.presence_penalty,
        "CONFIDANT_MODEL__ANTI_REPETITION__PRESENCE_PENALTY",
        lookup,
    );

    // Scheduler
    let scheduler = &mut config.scheduler;
    if let Some(raw) = lookup("CONFIDANT_SCHEDULER__ENABLED") {
        scheduler.enabled = matches!(raw.trim(), "true" | "1" | "yes");
    }
    set_parsed(&mut scheduler.min_interval_secs, "CONFIDANT_SCHEDULER__MIN_INTERVAL_SECS", lookup);
    set_parsed(&mut scheduler.max_interval_secs, "CONFIDANT_SCHEDULER__MAX_INTERVAL_SECS", lookup);
    set_parsed(&mut scheduler.probability, "CONFIDANT_SCHEDULER__PROBABILITY", lookup);
    set_parsed(&mut scheduler.cooldown_secs, "CONFIDANT_SCHEDULER__COOLDOWN_SECS", lookup);

    // Storage
    let storage = &mut config.storage;
    set_string(&mut storage.database_path, "CONFIDANT_STORAGE__DATABASE_PATH", lookup);
    set_parsed(&mut storage.hydrate_limit, "CONFIDANT_STORAGE__HYDRATE_LIMIT", lookup);
    set_parsed(&mut storage.text_window, "CONFIDANT_STORAGE__TEXT_WINDOW", lookup);
    set_parsed(&mut storage.image_window, "CONFIDANT_STORAGE__IMAGE_WINDOW", lookup);

    // Plain deployment variables win over everything else
    set_string(&mut config.telegram.token, "TELEGRAM_TOKEN", lookup);
    if let Some(raw) = lookup("ALLOWED_USER_ID") {
        config.telegram.allowed_user =
            parse_user_id("ALLOWED_USER_ID", &raw).or(config.telegram.allowed_user);
    }
    set_string(&mut config.model.system_prompt, "SYSTEM_PROMPT", lookup);
    set_string(&mut config.model.api_base, "LM_STUDIO_URL", lookup);

    config
}

fn parse_user_id(key: &str, raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Ignoring {key}: '{raw}' is not a numeric user id");
            None
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
