//! Fehlertypen fuer Erkennung und Einspielung

use std::path::PathBuf;

use thiserror::Error;

/// Alle moeglichen Fehler des Audio-Subsystems
///
/// Keiner dieser Fehler ist fatal: Aufrufer melden sie als Ergebnis weiter.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Privilegierter Befehl konnte nicht ausgefuehrt werden: {0}")]
    Ausfuehrung(String),

    #[error("Wiedergabe-Prozess konnte nicht gestartet werden: {0}")]
    Start(String),

    #[error("Hilfsprogramm fuer die Wiedergabe nicht gefunden")]
    HelferFehlt,

    #[error("Audio-Quelle nicht gefunden: {0}")]
    QuelleFehlt(PathBuf),

    #[error("Kein TX-Geraet zugeordnet")]
    KeinTxGeraet,

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;
