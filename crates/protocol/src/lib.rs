//! callgate-protocol – Wire-Vertrag des Befehlskanals
//!
//! Definiert die eingehenden Befehle des entfernten Controllers und die
//! ausgehenden Antworten, Events und Heartbeats. Alle Nachrichten sind
//! JSON-Objekte; die Feldnamen sind Teil des dokumentierten Vertrags und
//! duerfen nicht veraendert werden.

pub mod command;
pub mod error;
pub mod message;

pub use command::{befehl_parsen, AudioQuelle, Befehl, EingehenderBefehl};
pub use error::ProtokollFehler;
pub use message::{
    Antwort, AusgehendeNachricht, EreignisNachricht, GatewayEreignis, Heartbeat, ResultCode,
};
