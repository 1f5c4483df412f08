//! Callgate – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet das Gateway.

use anyhow::Result;
use callgate_observability::logging_initialisieren;
use callgate_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("CALLGATE_CONFIG").unwrap_or_else(|_| "callgate.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Callgate wird initialisiert"
    );

    Server::neu(config).starten().await
}
