//! Fehlertypen fuer Befehlskanal und Medien-Download

use thiserror::Error;

/// Fehler des Befehlskanals
#[derive(Debug, Error)]
pub enum KanalFehler {
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Ungueltige URL: {0}")]
    UngueltigeUrl(String),
}

/// Fehler beim Herunterladen einer Audio-Quelle
#[derive(Debug, Error)]
pub enum MedienFehler {
    #[error("HTTP-Fehler: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server antwortet mit Status {0}")]
    Status(u16),

    #[error("Leere Antwort")]
    Leer,

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}
