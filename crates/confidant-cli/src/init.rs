//! `confidant init` — write the default configuration and data directories.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use confidant_core::config::{get_config_path, save_config, Config};
use confidant_core::utils::{get_data_path, get_media_path};

pub fn run(force: bool) -> Result<()> {
    println!();
    println!("{}", "🤫 Confidant — Setup".cyan().bold());
    println!();

    let config_path = get_config_path();
    if write_default_config(&config_path, force)? {
        println!("  {} wrote config to {}", "✓".green(), config_path.display());
    } else {
        println!(
            "  {} config already exists at {} (use --force to overwrite)",
            "✓".green(),
            config_path.display()
        );
    }

    for dir in [get_data_path(), get_media_path()] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        println!("  {} {}", "✓".green(), dir.display());
    }

    println!();
    println!("  Next steps:");
    println!("    export TELEGRAM_TOKEN=<token from @BotFather>");
    println!("    export ALLOWED_USER_ID=<your numeric Telegram id>");
    println!("    confidant run");
    println!();
    Ok(())
}

/// Write `Config::default()` to `path`. Returns false if a file was kept.
fn write_default_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    save_config(&Config::default(), Some(path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confidant_core::config::load_config;

    #[test]
    fn test_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert!(write_default_config(&path, false).unwrap());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"apiBase\""));
        assert!(raw.contains("\"minIntervalSecs\""));

        let loaded = load_config(Some(&path));
        assert_eq!(loaded.storage.text_window, 20);
    }

    #[test]
    fn test_existing_file_is_kept_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{\"scheduler\": {\"enabled\": false}}").unwrap();

        assert!(!write_default_config(&path, false).unwrap());
        assert!(std::fs::read_to_string(&path).unwrap().contains("false"));

        assert!(write_default_config(&path, true).unwrap());
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"enabled\": true"));
    }
}
