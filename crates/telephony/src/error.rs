//! Fehlertypen der Telefonie-Schicht

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("Ungueltige Rufnummer: {0:?}")]
    UngueltigeNummer(String),

    #[error("Waehlen fehlgeschlagen: {0}")]
    WahlFehlgeschlagen(String),

    #[error("Nicht unterstuetzt: {0}")]
    NichtUnterstuetzt(&'static str),

    #[error("Telefonie-Fehler: {0}")]
    System(String),
}
