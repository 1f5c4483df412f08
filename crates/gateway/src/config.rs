//! Laufzeit-Konfiguration des Controllers

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Adresse des Befehlskanals (`ws://` / `wss://`)
    pub url: String,
    pub heartbeat_intervall: Duration,
    /// Wartezeit vor dem einen Reconnect-Versuch nach einem Abbruch
    pub reconnect_verzoegerung: Duration,
    /// Beim Start sofort verbinden
    pub auto_verbinden: bool,
    /// Datei fuer `PLAY_AUDIO` ohne `url` und `path`
    pub standard_audio: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/gateway".into(),
            heartbeat_intervall: Duration::from_secs(30),
            reconnect_verzoegerung: Duration::from_secs(5),
            auto_verbinden: true,
            standard_audio: None,
        }
    }
}
