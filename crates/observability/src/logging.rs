//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Konfiguration):
//! - `CG_LOG_LEVEL`: Filter-Direktive (`info`, `callgate_gateway=debug`, ...)
//! - `CG_LOG_FORMAT`: Format (text/json), Standard: text

use tracing_subscriber::{fmt, EnvFilter};

pub const LEVEL_VARIABLE: &str = "CG_LOG_LEVEL";
pub const FORMAT_VARIABLE: &str = "CG_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Unbekannte Werte ergeben `None`
    pub fn aus_str(wert: &str) -> Option<Self> {
        match wert.trim() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Waehlt das Format: Umgebung vor Konfiguration, Fallback Text
fn format_waehlen(umgebung: Option<&str>, konfiguriert: &str) -> LogFormat {
    umgebung
        .and_then(LogFormat::aus_str)
        .or_else(|| LogFormat::aus_str(konfiguriert))
        .unwrap_or_default()
}

/// Baut den Filter: Umgebung vor Konfiguration, Fallback `info`
fn filter_bauen(umgebung: Option<&str>, konfiguriert: &str) -> EnvFilter {
    umgebung
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_new(konfiguriert).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialisiert das Logging-System.
///
/// Ein bereits gesetzter globaler Subscriber bleibt bestehen.
pub fn logging_initialisieren(level: &str, format: &str) {
    let level_env = std::env::var(LEVEL_VARIABLE).ok();
    let format_env = std::env::var(FORMAT_VARIABLE).ok();
    let filter = filter_bauen(level_env.as_deref(), level);

    let ergebnis = match format_waehlen(format_env.as_deref(), format) {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}
