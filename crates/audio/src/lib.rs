//! callgate-audio – Audio-Erkennung und -Einspielung
//!
//! Findet zur Laufzeit den Hardware-PCM-Pfad, ueber den Audio in die
//! Uplink-Seite eines Mobilfunkanrufs eingespielt werden kann, und steuert
//! den Wiedergabe-Prozess:
//! - Chipsatz-Erkennung (Exynos, Qualcomm, MediaTek) ueber mehrere Heuristiken
//! - PCM-Enumeration ueber einen privilegierten Befehl
//! - Persistente Geraete-Zuordnung mit manuellem Override
//! - Einspielung ueber ein externes Hilfsprogramm (hoechstens eine Sitzung)

pub mod chipset;
pub mod device_config;
pub mod error;
pub mod executor;
pub mod helper;
pub mod injector;
pub mod pcm;
pub mod prober;

// Bequeme Re-Exporte der wichtigsten Typen
pub use chipset::{ChipsetDetector, PlattformQuelle, SystemPlattform};
pub use device_config::{DeviceConfig, DeviceConfigStore};
pub use error::{AudioError, AudioResult};
pub use executor::{BefehlsAusgabe, PrivilegierterAusfuehrer, SuAusfuehrer};
pub use helper::HelferAufloeser;
pub use injector::{Abschluss, AudioInjector};
pub use pcm::PcmEndpoint;
pub use prober::DeviceProber;
