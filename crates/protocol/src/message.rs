//! Ausgehende Nachrichten (Gateway -> Controller)
//!
//! ## Design
//! - Tagged Enum ueber das Feld `type` (`response`, `event`, `heartbeat`)
//! - Events tragen zusaetzlich das Feld `event` und den aktuellen `status`
//! - Optionale Felder werden weggelassen statt als `null` gesendet

use callgate_core::types::GatewayStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Ergebnis-Codes
// ---------------------------------------------------------------------------

/// Maschinenlesbares Ergebnis einer Antwort (`result`-Feld)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    // Allgemein
    Pong,
    Unrecognized,
    Unsupported,
    // Waehlen
    CallInitiated,
    InvalidNumber,
    DialFailed,
    CallInProgress,
    // Audio
    Playing,
    PlayFailed,
    NotInCall,
    NoSource,
    DownloadFailed,
    // Anrufsteuerung
    HangupRequested,
    NoActiveCall,
    Held,
    HoldFailed,
    Unheld,
    UnholdFailed,
    Answered,
    Rejected,
    NoRingingCall,
    DtmfSent,
    InvalidDtmf,
    // SMS
    SmsSent,
    SmsFailed,
    // Geraete-Zuordnung
    DeviceConfigured,
    DeviceReset,
    DeviceConfigFailed,
}

// ---------------------------------------------------------------------------
// Antwort
// ---------------------------------------------------------------------------

/// Antwort auf genau einen eingehenden Befehl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Antwort {
    /// Gespiegelte `id` des Befehls
    pub id: Value,
    pub result: ResultCode,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_duration_ms: Option<u64>,
}

impl Antwort {
    /// Erfolgreiche Antwort ohne Zusatzfelder
    pub fn erfolg(id: Value, result: ResultCode) -> Self {
        Self {
            id,
            result,
            success: true,
            message: None,
            call_state: None,
            call_duration_ms: None,
        }
    }

    /// Fehler-Antwort mit Begruendung
    pub fn fehler(id: Value, result: ResultCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result,
            success: false,
            message: Some(message.into()),
            call_state: None,
            call_duration_ms: None,
        }
    }

    /// Haengt den aktuellen Anrufzustand an
    pub fn mit_anruf(mut self, call_state: impl Into<String>, dauer_ms: Option<u64>) -> Self {
        self.call_state = Some(call_state.into());
        self.call_duration_ms = dauer_ms;
        self
    }

    pub fn mit_nachricht(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Asynchrone Zustandsmeldungen ohne zugehoerigen Befehl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEreignis {
    CallConnected,
    CallEnded,
    CallError {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    IncomingCall {
        number: String,
    },
    CallStateChanged {
        #[serde(rename = "callState")]
        call_state: String,
        #[serde(rename = "callDurationMs")]
        call_duration_ms: u64,
    },
}

/// Event-Umschlag mit dem Gateway-Status zum Zeitpunkt des Events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EreignisNachricht {
    #[serde(flatten)]
    pub ereignis: GatewayEreignis,
    pub status: GatewayStatus,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Periodischer Status-Schnappschuss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub status: GatewayStatus,
    pub audio_playing: bool,
    pub call_state: String,
    pub call_duration_ms: u64,
    pub active_calls: usize,
}

// ---------------------------------------------------------------------------
// Umschlag
// ---------------------------------------------------------------------------

/// Alle Nachrichten, die das Gateway an den Controller sendet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AusgehendeNachricht {
    Response(Antwort),
    Event(EreignisNachricht),
    Heartbeat(Heartbeat),
}

impl AusgehendeNachricht {
    pub fn event(ereignis: GatewayEreignis, status: GatewayStatus) -> Self {
        Self::Event(EreignisNachricht { ereignis, status })
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Antwort> for AusgehendeNachricht {
    fn from(antwort: Antwort) -> Self {
        Self::Response(antwort)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
