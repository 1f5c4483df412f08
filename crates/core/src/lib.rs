//! callgate-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Callgate-Crates gemeinsam genutzt werden: Zustands-Enums fuer
//! Chipsatz, Anrufe und Gateway sowie die Anruf-ID.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{
    CallDetailState, CallDirection, CallId, CallState, ChipsetFamily, GatewayStatus,
};
