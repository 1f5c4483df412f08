//! # callgate-observability
//!
//! Structured Logging via tracing-subscriber (Text oder JSON), gesteuert
//! ueber die Konfiguration und die Umgebungsvariablen `CG_LOG_LEVEL` und
//! `CG_LOG_FORMAT`.

pub mod logging;

pub use logging::{logging_initialisieren, LogFormat};
