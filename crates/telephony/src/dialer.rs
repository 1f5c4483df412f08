//! Grenze zum Telefonie-Subsystem: Waehlen und Auflegen

use async_trait::async_trait;

use crate::error::TelephonyError;

/// Stellt ausgehende Anrufe ueber das Betriebssystem her
#[async_trait]
pub trait Waehler: Send + Sync {
    /// Startet einen Anruf an eine bereits bereinigte Nummer
    async fn waehlen(&self, nummer: &str) -> Result<(), TelephonyError>;

    /// Beendet den laufenden Anruf ohne registriertes Anruf-Handle
    async fn auflegen(&self) -> Result<(), TelephonyError> {
        Err(TelephonyError::NichtUnterstuetzt("auflegen"))
    }
}

/// Behaelt nur Ziffern sowie `+`, `*` und `#`
pub fn nummer_bereinigen(nummer: &str) -> String {
    nummer
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '*' | '#'))
        .collect()
}
