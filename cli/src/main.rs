//! Sprechfunk – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Client.

use anyhow::Result;
use sprechfunk_cli::{config::AppConfig, App};
use sprechfunk_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("SPRECHFUNK_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = AppConfig::laden(&config_pfad)?;
    logging_initialisieren(&config.logging.level, &config.logging.format);
    config.pruefen()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Sprechfunk wird initialisiert"
    );

    App::neu(config).starten().await
}
