//! Gateway-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Gateway ohne Konfigurationsdatei
//! lauffaehig ist.

use std::path::PathBuf;
use std::time::Duration;

use callgate_audio::helper::STANDARD_KANDIDATEN;
use callgate_gateway::GatewayConfig;
use callgate_telephony::DtmfTakt;
use serde::{Deserialize, Serialize};

/// Vollstaendige Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Befehlskanal und Controller
    pub gateway: GatewayEinstellungen,
    /// Audio-Erkennung und -Einspielung
    pub audio: AudioEinstellungen,
    /// Telefonie-Anbindung
    pub telefonie: TelefonieEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Befehlskanal-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayEinstellungen {
    /// WebSocket-Adresse des Controllers (`ws://` oder `wss://`)
    pub url: String,
    pub heartbeat_intervall_sek: u64,
    pub reconnect_verzoegerung_sek: u64,
    /// Beim Start sofort verbinden
    pub auto_verbinden: bool,
    pub verbindungs_timeout_sek: u64,
}

impl Default for GatewayEinstellungen {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/gateway".into(),
            heartbeat_intervall_sek: 30,
            reconnect_verzoegerung_sek: 5,
            auto_verbinden: true,
            verbindungs_timeout_sek: 15,
        }
    }
}

/// Audio-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Persistierte Geraete-Zuordnung (JSON)
    pub konfig_pfad: PathBuf,
    /// Kandidaten fuer das Wiedergabe-Hilfsprogramm, erster Treffer gewinnt
    pub helfer_pfade: Vec<PathBuf>,
    /// Ablage fuer heruntergeladene Audio-Quellen
    pub medien_verzeichnis: PathBuf,
    pub download_timeout_sek: u64,
    /// Datei fuer `PLAY_AUDIO` ohne Quelle (optional)
    pub standard_audio: Option<PathBuf>,
    /// Programm fuer privilegierte Befehle (`su`, auf Entwicklungs-Hosts `sh`)
    pub su_programm: String,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            konfig_pfad: PathBuf::from("/data/local/tmp/callgate/audio_device.json"),
            helfer_pfade: STANDARD_KANDIDATEN.iter().map(PathBuf::from).collect(),
            medien_verzeichnis: PathBuf::from("/data/local/tmp/callgate/medien"),
            download_timeout_sek: 60,
            standard_audio: None,
            su_programm: "su".into(),
        }
    }
}

/// Telefonie-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelefonieEinstellungen {
    pub dtmf_ton_ms: u64,
    pub dtmf_pause_ms: u64,
    /// Nach dieser Zeit gilt ein IDLE beim Aufbau wieder als Anrufende
    pub wahl_timeout_sek: u64,
    /// Abfrageintervall des Telefonie-Registers
    pub poll_intervall_ms: u64,
}

impl Default for TelefonieEinstellungen {
    fn default() -> Self {
        Self {
            dtmf_ton_ms: 250,
            dtmf_pause_ms: 150,
            wahl_timeout_sek: 60,
            poll_intervall_ms: 500,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Direktive
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Laufzeit-Konfiguration des Controllers
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.gateway.url.clone(),
            heartbeat_intervall: Duration::from_secs(self.gateway.heartbeat_intervall_sek.max(1)),
            reconnect_verzoegerung: Duration::from_secs(self.gateway.reconnect_verzoegerung_sek),
            auto_verbinden: self.gateway.auto_verbinden,
            standard_audio: self.audio.standard_audio.clone(),
        }
    }

    pub fn dtmf_takt(&self) -> DtmfTakt {
        DtmfTakt {
            ton: Duration::from_millis(self.telefonie.dtmf_ton_ms),
            pause: Duration::from_millis(self.telefonie.dtmf_pause_ms),
        }
    }

    pub fn wahl_timeout(&self) -> Duration {
        Duration::from_secs(self.telefonie.wahl_timeout_sek)
    }

    pub fn poll_intervall(&self) -> Duration {
        Duration::from_millis(self.telefonie.poll_intervall_ms.max(50))
    }
}
