//! `confidant status` — show configuration and model server status.

use anyhow::{Context, Result};
use colored::Colorize;

use confidant_core::config::{get_config_path, load_config};
use confidant_core::utils::expand_home;
use confidant_providers::{LmStudioGateway, ModelGateway};

use crate::helpers::mark;

pub async fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "🤫 Confidant Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        mark(config_path.exists(), "(not found, using defaults)")
    );

    // Telegram
    println!(
        "  {:<18} {}",
        "Telegram token:".bold(),
        mark(!config.telegram.token.trim().is_empty(), "not set")
    );
    let recipient = config
        .telegram
        .allowed_user
        .map(|id| id.to_string())
        .unwrap_or_else(|| "not set".red().to_string());
    println!("  {:<18} {}", "Allowed user:".bold(), recipient);

    // Model server
    let gateway = LmStudioGateway::from_config(&config.model).context("failed to build HTTP client")?;
    let probe = gateway.probe().await;
    let server = if probe.available {
        format!("{} {}", "🟢 online".green(), gateway.api_base())
    } else {
        format!("{} {}", "🔴 offline".red(), gateway.api_base())
    };
    println!("  {:<18} {}", "LM Studio:".bold(), server);
    println!(
        "  {:<18} {}",
        "Active model:".bold(),
        probe.model_id.as_deref().unwrap_or("none")
    );
    println!(
        "  {:<18} {} | text: {} tok | image: {} tok",
        "Parameters:".bold(),
        format!("temp: {}", config.model.temperature).dimmed(),
        config.model.text_max_tokens,
        config.model.image_max_tokens,
    );

    // Storage
    let db_path = expand_home(&config.storage.database_path);
    println!(
        "  {:<18} {} {}",
        "Database:".bold(),
        db_path.display(),
        mark(db_path.exists(), "(not created yet)")
    );

    // Scheduler
    let s = &config.scheduler;
    let scheduler = if s.enabled {
        format!(
            "every {}–{} min, p={}",
            s.min_interval_secs / 60,
            s.max_interval_secs / 60,
            s.probability
        )
    } else {
        "disabled".dimmed().to_string()
    };
    println!("  {:<18} {}", "Random thoughts:".bold(), scheduler);

    println!();
    match config.validate() {
        Ok(()) => println!("  {} ready to run", "✓".green()),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
    println!();

    Ok(())
}
