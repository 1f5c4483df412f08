//! Chipsatz-Erkennung
//!
//! Drei Strategien in fester Reihenfolge, die erste Uebereinstimmung gewinnt:
//! 1. Hersteller-spezifische Markerpfade im Dateisystem
//! 2. Board-/Hardware-Kennungen gegen Teilstring-Listen
//! 3. Freitext-Hardwarebeschreibung gegen Herstellernamen
//!
//! Ohne Treffer ist das Ergebnis `Unknown`, niemals ein Fehler. Das Ergebnis
//! wird im `ChipsetDetector` zwischengespeichert; der Cache gehoert dem
//! Aufrufer und kann explizit invalidiert werden. Die Heuristiken lesen
//! Dateien und rufen `getprop` auf und laufen deshalb auf dem
//! Blocking-Pool.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use callgate_core::types::ChipsetFamily;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Heuristik-Tabellen
// ---------------------------------------------------------------------------

/// Markerpfade der Audio-Subsysteme je Hersteller
const MARKER_PFADE: &[(ChipsetFamily, &[&str])] = &[
    (
        ChipsetFamily::Exynos,
        &[
            "/sys/devices/platform/abox",
            "/proc/asound/abox",
            "/vendor/etc/abox_debug",
        ],
    ),
    (
        ChipsetFamily::Qualcomm,
        &[
            "/sys/devices/platform/soc/soc:qcom,msm-audio-apr",
            "/vendor/etc/audio_platform_info.xml",
            "/sys/module/q6_notifier_dlkm",
        ],
    ),
    (
        ChipsetFamily::Mediatek,
        &[
            "/proc/mtk_audio",
            "/sys/bus/platform/drivers/mtk-soc-afe",
            "/vendor/etc/audio_param",
        ],
    ),
];

/// Teilstrings in Board-/Plattform-Kennungen (Kleinschreibung)
const BOARD_TEILSTRINGS: &[(ChipsetFamily, &[&str])] = &[
    (ChipsetFamily::Exynos, &["exynos", "universal", "s5e"]),
    (
        ChipsetFamily::Qualcomm,
        &["msm", "qcom", "sdm", "sm8", "sm7", "sm6", "lahaina", "kona", "taro", "kalama"],
    ),
    (ChipsetFamily::Mediatek, &["mt6", "mt8", "mediatek", "mtk"]),
];

/// Herstellernamen in der Freitext-Beschreibung (Kleinschreibung)
const BESCHREIBUNG_FRAGMENTE: &[(ChipsetFamily, &[&str])] = &[
    (ChipsetFamily::Exynos, &["exynos", "samsung"]),
    (ChipsetFamily::Qualcomm, &["qualcomm", "snapdragon"]),
    (ChipsetFamily::Mediatek, &["mediatek", "dimensity", "helio"]),
];

// ---------------------------------------------------------------------------
// PlattformQuelle
// ---------------------------------------------------------------------------

/// Zugriff auf die Plattform-Informationen, die die Heuristiken auswerten
pub trait PlattformQuelle: Send + Sync {
    fn pfad_existiert(&self, pfad: &Path) -> bool;

    /// Board-, Plattform- und Hardware-Kennungen (z.B. `ro.board.platform`)
    fn board_kennungen(&self) -> Vec<String>;

    /// Freitext-Beschreibung der Hardware (z.B. `Hardware` aus `/proc/cpuinfo`)
    fn hardware_beschreibung(&self) -> Option<String>;
}

/// Liest die echte Plattform: Dateisystem, `getprop` und `/proc/cpuinfo`
#[derive(Debug, Clone, Default)]
pub struct SystemPlattform;

impl SystemPlattform {
    const EIGENSCHAFTEN: [&'static str; 5] = [
        "ro.board.platform",
        "ro.hardware",
        "ro.product.board",
        "ro.soc.model",
        "ro.chipname",
    ];

    fn getprop(name: &str) -> Option<String> {
        let ausgabe = Command::new("getprop").arg(name).output().ok()?;
        if !ausgabe.status.success() {
            return None;
        }
        let wert = String::from_utf8_lossy(&ausgabe.stdout).trim().to_string();
        (!wert.is_empty()).then_some(wert)
    }
}

impl PlattformQuelle for SystemPlattform {
    fn pfad_existiert(&self, pfad: &Path) -> bool {
        pfad.exists()
    }

    fn board_kennungen(&self) -> Vec<String> {
        Self::EIGENSCHAFTEN
            .iter()
            .filter_map(|name| Self::getprop(name))
            .collect()
    }

    fn hardware_beschreibung(&self) -> Option<String> {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        cpuinfo
            .lines()
            .filter_map(|zeile| zeile.split_once(':'))
            .find(|(schluessel, _)| schluessel.trim().eq_ignore_ascii_case("hardware"))
            .map(|(_, wert)| wert.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// ChipsetDetector
// ---------------------------------------------------------------------------

/// Erkennt die SoC-Familie und merkt sich das erste eindeutige Ergebnis
pub struct ChipsetDetector {
    quelle: Arc<dyn PlattformQuelle>,
    cache: Mutex<Option<ChipsetFamily>>,
}

impl ChipsetDetector {
    pub fn neu(quelle: Arc<dyn PlattformQuelle>) -> Self {
        Self {
            quelle,
            cache: Mutex::new(None),
        }
    }

    /// Detector fuer das laufende System
    pub fn system() -> Self {
        Self::neu(Arc::new(SystemPlattform))
    }

    /// Liefert die Chipsatz-Familie
    ///
    /// Nur eindeutige Treffer werden gecacht; `Unknown` wird beim naechsten
    /// Aufruf erneut ermittelt. Die Cache-Sperre wird waehrend der
    /// Erkennung nicht gehalten.
    pub async fn erkennen(&self) -> ChipsetFamily {
        if let Some(familie) = *self.cache.lock() {
            return familie;
        }

        let quelle = self.quelle.clone();
        let familie = match tokio::task::spawn_blocking(move || heuristiken(quelle.as_ref())).await {
            Ok(familie) => familie,
            Err(e) => {
                tracing::warn!(fehler = %e, "Chipsatz-Erkennung abgebrochen");
                ChipsetFamily::Unknown
            }
        };

        if familie != ChipsetFamily::Unknown {
            tracing::info!(chipset = %familie, "Chipsatz erkannt");
            *self.cache.lock() = Some(familie);
        } else {
            tracing::warn!("Chipsatz nicht erkannt");
        }
        familie
    }

    /// Verwirft das gecachte Ergebnis
    pub fn invalidieren(&self) {
        *self.cache.lock() = None;
    }
}

/// Alle drei Strategien in fester Reihenfolge; blockiert
fn heuristiken(quelle: &dyn PlattformQuelle) -> ChipsetFamily {
    per_markerpfad(quelle)
        .or_else(|| per_board_kennung(quelle))
        .or_else(|| per_beschreibung(quelle))
        .unwrap_or(ChipsetFamily::Unknown)
}

fn per_markerpfad(quelle: &dyn PlattformQuelle) -> Option<ChipsetFamily> {
    MARKER_PFADE.iter().find_map(|(familie, pfade)| {
        pfade
            .iter()
            .any(|p| quelle.pfad_existiert(Path::new(p)))
            .then_some(*familie)
    })
}

fn per_board_kennung(quelle: &dyn PlattformQuelle) -> Option<ChipsetFamily> {
    let kennungen: Vec<String> = quelle
        .board_kennungen()
        .into_iter()
        .map(|k| k.to_ascii_lowercase())
        .collect();
    suche_teilstring(BOARD_TEILSTRINGS, &kennungen)
}

fn per_beschreibung(quelle: &dyn PlattformQuelle) -> Option<ChipsetFamily> {
    let beschreibung = quelle.hardware_beschreibung()?.to_ascii_lowercase();
    suche_teilstring(BESCHREIBUNG_FRAGMENTE, std::slice::from_ref(&beschreibung))
}

fn suche_teilstring(
    tabelle: &[(ChipsetFamily, &[&str])],
    texte: &[String],
) -> Option<ChipsetFamily> {
    tabelle.iter().find_map(|(familie, teile)| {
        texte
            .iter()
            .any(|text| teile.iter().any(|teil| text.contains(teil)))
            .then_some(*familie)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
