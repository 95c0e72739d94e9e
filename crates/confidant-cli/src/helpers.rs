//! Shared CLI helpers — banner and status markers.

use colored::Colorize;

pub fn print_banner() {
    println!();
    println!(
        "{}  v{}",
        "🤫 Confidant".cyan().bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
    println!();
}

/// `✓` or a red marker with `missing`.
pub fn mark(ok: bool, missing: &str) -> String {
    if ok {
        "✓".green().to_string()
    } else {
        missing.red().to_string()
    }
}
