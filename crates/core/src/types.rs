//! Gemeinsame Zustands- und Identifikationstypen fuer Callgate
//!
//! Alle Enums serialisieren im `SCREAMING_SNAKE_CASE`-Format des
//! Befehlskanals (`"IN_CALL"`, `"OFFHOOK"`, ...).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CallId
// ---------------------------------------------------------------------------

/// Eindeutige ID eines registrierten Anruf-Handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Erstellt eine neue zufaellige CallId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ChipsetFamily
// ---------------------------------------------------------------------------

/// SoC-Familie des Geraets (bestimmt die PCM-Topologie)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChipsetFamily {
    Exynos,
    Qualcomm,
    Mediatek,
    #[default]
    Unknown,
}

impl ChipsetFamily {
    /// Alle bekannten Hersteller-Familien (ohne `Unknown`)
    pub const HERSTELLER: [ChipsetFamily; 3] = [
        ChipsetFamily::Exynos,
        ChipsetFamily::Qualcomm,
        ChipsetFamily::Mediatek,
    ];

    /// Name im Persistenz- und Wire-Format
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Exynos => "EXYNOS",
            Self::Qualcomm => "QUALCOMM",
            Self::Mediatek => "MEDIATEK",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parst einen gespeicherten Namen; unbekannte Werte ergeben `Unknown`
    pub fn aus_str(wert: &str) -> Self {
        match wert.trim().to_ascii_uppercase().as_str() {
            "EXYNOS" => Self::Exynos,
            "QUALCOMM" => Self::Qualcomm,
            "MEDIATEK" => Self::Mediatek,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ChipsetFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// CallState (grob, aus dem Hardware-Signal)
// ---------------------------------------------------------------------------

/// Grober Telefoniezustand, abgeleitet aus dem rohen Hardware-Signalstrom
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    #[default]
    Idle,
    Dialing,
    Ringing,
    Offhook,
    Error,
}

impl CallState {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Dialing => "DIALING",
            Self::Ringing => "RINGING",
            Self::Offhook => "OFFHOOK",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// CallDetailState (fein, aus dem Anruf-Objekt)
// ---------------------------------------------------------------------------

/// Detaillierter Zustand eines registrierten Anruf-Objekts
///
/// Faehigkeitspruefungen (Annehmen, Halten, ...) haengen am Zustand und
/// nicht an einem Hersteller-Typ des Anruf-Objekts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallDetailState {
    New,
    Dialing,
    Ringing,
    Holding,
    Active,
    Connecting,
    Disconnecting,
    Disconnected,
    Pulling,
    SelectAccount,
    #[default]
    Unknown,
}

impl CallDetailState {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Dialing => "DIALING",
            Self::Ringing => "RINGING",
            Self::Holding => "HOLDING",
            Self::Active => "ACTIVE",
            Self::Connecting => "CONNECTING",
            Self::Disconnecting => "DISCONNECTING",
            Self::Disconnected => "DISCONNECTED",
            Self::Pulling => "PULLING",
            Self::SelectAccount => "SELECT_ACCOUNT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Endzustand – das Handle zaehlt nicht mehr als aktiver Anruf
    pub fn ist_beendet(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Annehmen und Ablehnen sind nur fuer klingelnde Anrufe gueltig
    pub fn erlaubt_annehmen(&self) -> bool {
        matches!(self, Self::Ringing)
    }

    /// Halten setzt einen verbundenen Anruf voraus
    pub fn erlaubt_halten(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn erlaubt_fortsetzen(&self) -> bool {
        matches!(self, Self::Holding)
    }

    /// DTMF kann nur in einen laufenden Anruf gespielt werden
    pub fn erlaubt_dtmf(&self) -> bool {
        matches!(self, Self::Active | Self::Dialing | Self::Connecting)
    }
}

impl std::fmt::Display for CallDetailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Richtung eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

// ---------------------------------------------------------------------------
// GatewayStatus
// ---------------------------------------------------------------------------

/// Autoritativer Gateway-Status, wird in jedem Heartbeat gesendet
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Dialing,
    InCall,
    PlayingAudio,
    Disconnected,
    Error,
}

impl GatewayStatus {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Dialing => "DIALING",
            Self::InCall => "IN_CALL",
            Self::PlayingAudio => "PLAYING_AUDIO",
            Self::Disconnected => "DISCONNECTED",
            Self::Error => "ERROR",
        }
    }

    /// Ein Anruf ist verbunden (mit oder ohne laufende Einspielung)
    pub fn ist_im_anruf(&self) -> bool {
        matches!(self, Self::InCall | Self::PlayingAudio)
    }

    /// Ein Anruf wird aufgebaut oder laeuft bereits
    pub fn hat_anruf_aktivitaet(&self) -> bool {
        matches!(self, Self::Dialing | Self::InCall | Self::PlayingAudio)
    }
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}
