//! Eingehende Befehle (Controller -> Gateway)
//!
//! ## Format
//! ```text
//! {"command": "MAKE_CALL", "id": "42", "number": "+491701234567"}
//! ```
//!
//! Die `id` wird unveraendert in die Antwort gespiegelt, egal ob sie als
//! String oder Zahl gesendet wurde. Unbekannte Befehle und fehlende Felder
//! werden nicht verworfen, sondern als `Befehl::Unbekannt` bzw.
//! `Befehl::Fehlerhaft` zurueckgegeben, damit der Dispatcher explizit
//! antworten kann.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtokollFehler;

/// Quelle fuer eine Audio-Einspielung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioQuelle {
    /// Wird vor der Wiedergabe heruntergeladen
    Url(String),
    /// Lokale Datei auf dem Geraet
    Pfad(String),
    /// Weder `url` noch `path` – konfigurierte Standarddatei
    Standard,
}

/// Alle Befehle, die der Controller senden kann
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Befehl {
    MakeCall { number: String },
    PlayAudio { quelle: AudioQuelle },
    Hangup,
    Hold,
    Unhold,
    Answer,
    Reject,
    SendDtmf { digits: String },
    SendSms { number: String, message: String },
    SetAudioDevice { card: i32, tx: i32, rx: i32 },
    ResetAudioDevice,
    Ping,
    /// Parsbar, aber der Befehlsname ist unbekannt
    Unbekannt { name: String },
    /// Bekannter Befehl mit fehlenden oder falsch typisierten Feldern
    Fehlerhaft { name: String, grund: String },
}

impl Befehl {
    /// Befehlsname fuer Logs
    pub fn name(&self) -> &str {
        match self {
            Self::MakeCall { .. } => "MAKE_CALL",
            Self::PlayAudio { .. } => "PLAY_AUDIO",
            Self::Hangup => "HANGUP",
            Self::Hold => "HOLD",
            Self::Unhold => "UNHOLD",
            Self::Answer => "ANSWER",
            Self::Reject => "REJECT",
            Self::SendDtmf { .. } => "SEND_DTMF",
            Self::SendSms { .. } => "SEND_SMS",
            Self::SetAudioDevice { .. } => "SET_AUDIO_DEVICE",
            Self::ResetAudioDevice => "RESET_AUDIO_DEVICE",
            Self::Ping => "PING",
            Self::Unbekannt { name } | Self::Fehlerhaft { name, .. } => name,
        }
    }
}

/// Ein geparster Befehl mit seiner Korrelations-ID
#[derive(Debug, Clone, PartialEq)]
pub struct EingehenderBefehl {
    /// Originale `id` (String, Zahl oder `null` wenn nicht gesendet)
    pub id: Value,
    pub befehl: Befehl,
}

/// Wire-Form der Befehle, direkt am `command`-Tag unterschieden
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
enum Rohbefehl {
    MakeCall {
        #[serde(deserialize_with = "text")]
        number: String,
    },
    PlayAudio {
        #[serde(default, deserialize_with = "optionaler_text")]
        url: Option<String>,
        #[serde(default, deserialize_with = "optionaler_text")]
        path: Option<String>,
    },
    Hangup,
    Hold,
    Unhold,
    Answer,
    Reject,
    SendDtmf {
        #[serde(deserialize_with = "text")]
        digits: String,
    },
    SendSms {
        #[serde(deserialize_with = "text")]
        number: String,
        #[serde(deserialize_with = "text")]
        message: String,
    },
    SetAudioDevice {
        #[serde(deserialize_with = "zahl")]
        card: i32,
        #[serde(deserialize_with = "zahl")]
        tx: i32,
        #[serde(default = "ohne_rx", deserialize_with = "optionale_rx")]
        rx: i32,
    },
    ResetAudioDevice,
    Ping,
}

/// Namen, die `Rohbefehl` kennt
const BEFEHLSNAMEN: &[&str] = &[
    "MAKE_CALL",
    "PLAY_AUDIO",
    "HANGUP",
    "HOLD",
    "UNHOLD",
    "ANSWER",
    "REJECT",
    "SEND_DTMF",
    "SEND_SMS",
    "SET_AUDIO_DEVICE",
    "RESET_AUDIO_DEVICE",
    "PING",
];

impl From<Rohbefehl> for Befehl {
    fn from(roh: Rohbefehl) -> Self {
        match roh {
            Rohbefehl::MakeCall { number } => Self::MakeCall { number },
            Rohbefehl::PlayAudio { url, path } => {
                let quelle = match (url, path) {
                    (Some(url), _) => AudioQuelle::Url(url),
                    (None, Some(pfad)) => AudioQuelle::Pfad(pfad),
                    (None, None) => AudioQuelle::Standard,
                };
                Self::PlayAudio { quelle }
            }
            Rohbefehl::Hangup => Self::Hangup,
            Rohbefehl::Hold => Self::Hold,
            Rohbefehl::Unhold => Self::Unhold,
            Rohbefehl::Answer => Self::Answer,
            Rohbefehl::Reject => Self::Reject,
            Rohbefehl::SendDtmf { digits } => Self::SendDtmf { digits },
            Rohbefehl::SendSms { number, message } => Self::SendSms { number, message },
            Rohbefehl::SetAudioDevice { card, tx, rx } => Self::SetAudioDevice { card, tx, rx },
            Rohbefehl::ResetAudioDevice => Self::ResetAudioDevice,
            Rohbefehl::Ping => Self::Ping,
        }
    }
}

/// Parst eine rohe Textnachricht vom Befehlskanal
///
/// Gibt nur dann einen Fehler zurueck, wenn die Nachricht kein JSON-Objekt
/// ist. Alles andere wird zu einem beantwortbaren `EingehenderBefehl`.
pub fn befehl_parsen(text: &str) -> Result<EingehenderBefehl, ProtokollFehler> {
    let wert: Value = serde_json::from_str(text)?;
    let Value::Object(mut felder) = wert else {
        return Err(ProtokollFehler::KeinObjekt);
    };

    let id = felder.remove("id").unwrap_or(Value::Null);
    let name = match felder.get("command") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };

    let befehl = match Rohbefehl::deserialize(Value::Object(felder)) {
        Ok(roh) => roh.into(),
        Err(e) if BEFEHLSNAMEN.contains(&name.as_str()) => Befehl::Fehlerhaft {
            name,
            grund: e.to_string(),
        },
        Err(_) => Befehl::Unbekannt { name },
    };
    Ok(EingehenderBefehl { id, befehl })
}

/// Textfeld; Zahlen werden als Text akzeptiert, leere Strings nicht
fn text_aus(wert: &Value) -> Option<String> {
    match wert {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn zahl_aus(wert: &Value) -> Option<i32> {
    match wert {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let wert = Value::deserialize(d)?;
    text_aus(&wert).ok_or_else(|| de::Error::custom(format!("kein gueltiger Text: {wert}")))
}

fn optionaler_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(text_aus(&Value::deserialize(d)?))
}

fn zahl<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    let wert = Value::deserialize(d)?;
    zahl_aus(&wert).ok_or_else(|| de::Error::custom(format!("keine gueltige Zahl: {wert}")))
}

fn optionale_rx<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    Ok(zahl_aus(&Value::deserialize(d)?).unwrap_or_else(ohne_rx))
}

/// `rx` fehlt: Standardroute beibehalten
fn ohne_rx() -> i32 {
    -1
}
