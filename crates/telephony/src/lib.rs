//! callgate-telephony – Anrufzustand und Anrufsteuerung
//!
//! - `CallStateTracker`: grober Zustandsautomat ueber dem rohen
//!   Hardware-Signal, inklusive Filter fuer das unechte IDLE beim Aufbau
//! - `CallControlBridge`: Register der lebenden Anruf-Handles mit Halten,
//!   Annehmen, Auflegen und zeitgesteuertem DTMF
//! - `Waehler`: Grenze zum Telefonie-Subsystem des Betriebssystems

pub mod bridge;
pub mod dialer;
pub mod dtmf;
pub mod error;
pub mod tracker;

pub use bridge::{BridgeEreignis, CallControlBridge, CallHandleInfo, CallObject};
pub use dialer::{nummer_bereinigen, Waehler};
pub use dtmf::{DtmfTakt, DTMF_PAUSE, DTMF_TON};
pub use error::TelephonyError;
pub use tracker::{CallStateTracker, RawCallSignal, TrackerUebergang};
