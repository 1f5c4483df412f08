//! callgate-gateway – Befehlskanal und Gateway-Controller
//!
//! Der `GatewayController` ist ein einzelner Actor: Befehle vom Kanal,
//! Telefonie-Signale, Anruf-Meldungen, Wiedergabe-Abschluesse und Timer
//! landen als Nachrichten in seiner Inbox und werden strikt nacheinander
//! verarbeitet. Nur der Actor veraendert den `GatewayStatus`.

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod media;
pub mod sms;

pub use channel::{KanalEreignis, KanalVerbinder, KanalVerbindung, WebSocketVerbinder};
pub use config::GatewayConfig;
pub use controller::{GatewayController, GatewayHandle, Kollaborateure};
pub use error::{KanalFehler, MedienFehler};
pub use media::{HttpMedienLader, MedienLader};
pub use sms::SmsVersender;
