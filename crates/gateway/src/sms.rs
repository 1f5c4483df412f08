//! Grenze zum SMS-Versand (optionaler Kollaborateur)

use async_trait::async_trait;

#[async_trait]
pub trait SmsVersender: Send + Sync {
    /// Sendet eine SMS; `Err` enthaelt eine lesbare Begruendung
    async fn senden(&self, nummer: &str, text: &str) -> Result<(), String>;
}
