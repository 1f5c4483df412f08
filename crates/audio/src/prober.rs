//! DeviceProber – findet die Voice-Uplink/Downlink-Pfade
//!
//! Die PCM-Liste wird ueber den privilegierten Ausfuehrer gelesen. Danach
//! filtern chipsatz-spezifische Namensmuster die Kandidaten; der erste
//! Treffer in Aufzaehlungsreihenfolge gewinnt.

use std::sync::Arc;

use callgate_core::types::ChipsetFamily;

use crate::chipset::ChipsetDetector;
use crate::device_config::DeviceConfig;
use crate::executor::PrivilegierterAusfuehrer;
use crate::pcm::{self, PcmEndpoint};

/// Befehl zur Enumeration der PCM-Knoten
pub const PCM_LISTE_BEFEHL: &str = "cat /proc/asound/pcm";

/// Bekannter Exynos-Uplink (card 0, device 8)
///
/// Auf einem einzelnen Geraet ermittelt, auf anderen Exynos-Varianten nicht
/// verifiziert.
pub const EXYNOS_TX_RUECKFALL: (u32, u32) = (0, 8);

// ---------------------------------------------------------------------------
// Namensmuster (Grossschreibung)
// ---------------------------------------------------------------------------

const EXYNOS_TX: &[&str] = &["RDMA8", "VOICE TX", "VOICE_TX", "INCALL"];
const EXYNOS_RX: &[&str] = &["WDMA5", "VOICE RX", "VOICE_RX", "CALL RECORD"];
const QUALCOMM_TX: &[&str] = &["INCALL_MUSIC", "INCALL MUSIC", "INCALLMUSIC"];
const QUALCOMM_RX: &[&str] = &["INCALL_RECORD", "INCALL RECORD", "INCALLRECORD"];
const MEDIATEK_TX: &[&str] = &["VOICE_UL", "VOICE UL", "SPEECH_PLAYBACK"];
const MEDIATEK_RX: &[&str] = &["VOICE_DL", "VOICE DL", "CAPTURE_VOICE"];

fn tx_muster(chipset: ChipsetFamily) -> &'static [&'static str] {
    match chipset {
        ChipsetFamily::Exynos => EXYNOS_TX,
        ChipsetFamily::Qualcomm => QUALCOMM_TX,
        ChipsetFamily::Mediatek => MEDIATEK_TX,
        ChipsetFamily::Unknown => &[],
    }
}

fn rx_muster(chipset: ChipsetFamily) -> &'static [&'static str] {
    match chipset {
        ChipsetFamily::Exynos => EXYNOS_RX,
        ChipsetFamily::Qualcomm => QUALCOMM_RX,
        ChipsetFamily::Mediatek => MEDIATEK_RX,
        ChipsetFamily::Unknown => &[],
    }
}

/// Muster fuer einen Chipsatz; `Unknown` erhaelt die Vereinigung aller Hersteller
fn muster_fuer(
    chipset: ChipsetFamily,
    tabelle: fn(ChipsetFamily) -> &'static [&'static str],
) -> Vec<&'static str> {
    match chipset {
        ChipsetFamily::Unknown => ChipsetFamily::HERSTELLER
            .iter()
            .flat_map(|f| tabelle(*f).iter().copied())
            .collect(),
        bekannt => tabelle(bekannt).to_vec(),
    }
}

// ---------------------------------------------------------------------------
// Kandidatensuche (rein)
// ---------------------------------------------------------------------------

/// Bester Uplink-Kandidat (playback-faehig)
pub fn tx_kandidat(chipset: ChipsetFamily, endpunkte: &[PcmEndpoint]) -> Option<PcmEndpoint> {
    let muster = muster_fuer(chipset, tx_muster);
    let treffer = endpunkte
        .iter()
        .find(|e| e.playback && e.name_passt(&muster))
        .cloned();

    if treffer.is_some() || chipset != ChipsetFamily::Exynos {
        return treffer;
    }

    let (card, device) = EXYNOS_TX_RUECKFALL;
    endpunkte
        .iter()
        .find(|e| e.playback && e.card == card && e.device == device)
        .cloned()
}

/// Bester Downlink-Kandidat (capture-faehig)
pub fn rx_kandidat(chipset: ChipsetFamily, endpunkte: &[PcmEndpoint]) -> Option<PcmEndpoint> {
    let muster = muster_fuer(chipset, rx_muster);
    endpunkte
        .iter()
        .find(|e| e.capture && e.name_passt(&muster))
        .cloned()
}

/// Fuehrt Defaults und gefundene Kandidaten zusammen
pub fn konfiguration_ableiten(chipset: ChipsetFamily, endpunkte: &[PcmEndpoint]) -> DeviceConfig {
    let mut config = DeviceConfig::standard_fuer(chipset);

    if let Some(tx) = tx_kandidat(chipset, endpunkte) {
        config.card = tx.card as i32;
        config.tx = tx.device as i32;
        config.probed = true;
    }

    // RX nur uebernehmen, wenn er auf derselben Karte liegt
    if let Some(rx) = rx_kandidat(chipset, endpunkte) {
        if rx.card as i32 == config.card {
            config.rx = rx.device as i32;
        } else {
            tracing::debug!(rx_card = rx.card, card = config.card, "RX auf anderer Karte ignoriert");
        }
    }

    config
}

// ---------------------------------------------------------------------------
// DeviceProber
// ---------------------------------------------------------------------------

pub struct DeviceProber {
    ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
    detector: Arc<ChipsetDetector>,
}

impl DeviceProber {
    pub fn neu(ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>, detector: Arc<ChipsetDetector>) -> Self {
        Self {
            ausfuehrer,
            detector,
        }
    }

    pub fn detector(&self) -> &ChipsetDetector {
        &self.detector
    }

    /// Listet alle PCM-Endpunkte; bei jedem Fehler eine leere Liste
    pub async fn endpunkte_auflisten(&self) -> Vec<PcmEndpoint> {
        match self.ausfuehrer.ausfuehren(PCM_LISTE_BEFEHL).await {
            Ok(ausgabe) if ausgabe.erfolgreich() => pcm::liste_parsen(&ausgabe.stdout),
            Ok(ausgabe) => {
                tracing::warn!(
                    exit_code = ?ausgabe.exit_code,
                    stderr = %ausgabe.stderr.trim(),
                    "PCM-Enumeration fehlgeschlagen"
                );
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "PCM-Enumeration nicht ausfuehrbar");
                Vec::new()
            }
        }
    }

    pub async fn voice_tx_finden(&self, chipset: ChipsetFamily) -> Option<PcmEndpoint> {
        tx_kandidat(chipset, &self.endpunkte_auflisten().await)
    }

    pub async fn voice_rx_finden(&self, chipset: ChipsetFamily) -> Option<PcmEndpoint> {
        rx_kandidat(chipset, &self.endpunkte_auflisten().await)
    }

    /// Erkennung + Defaults + Kandidatensuche; schlaegt nie fehl
    pub async fn auto_probe(&self) -> DeviceConfig {
        let chipset = self.detector.erkennen().await;
        let endpunkte = self.endpunkte_auflisten().await;
        let config = konfiguration_ableiten(chipset, &endpunkte);
        tracing::info!(
            chipset = %config.chipset,
            card = config.card,
            tx = config.tx,
            rx = config.rx,
            probed = config.probed,
            endpunkte = endpunkte.len(),
            "Auto-Probe abgeschlossen"
        );
        config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chipset::PlattformQuelle;
    use crate::error::{AudioError, AudioResult};
    use crate::executor::BefehlsAusgabe;
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::process::Child;

    fn ep(card: u32, device: u32, name: &str, playback: bool, capture: bool) -> PcmEndpoint {
        PcmEndpoint::neu(card, device, name, playback, capture)
    }

    #[test]
    fn exynos_rdma8_als_tx() {
        let liste = [ep(0, 8, "RDMA8", true, false)];
        let tx = tx_kandidat(ChipsetFamily::Exynos, &liste).unwrap();
        assert_eq!((tx.card, tx.device), (0, 8));
    }

    #[test]
    fn exynos_rueckfall_auf_device_8() {
        let liste = [ep(0, 0, "Primary", true, false), ep(0, 8, "Unbenannt", true, false)];
        let tx = tx_kandidat(ChipsetFamily::Exynos, &liste).unwrap();
        assert_eq!((tx.card, tx.device), (0, 8));
    }

    #[test]
    fn kein_rueckfall_fuer_andere_hersteller() {
        let liste = [ep(0, 8, "Unbenannt", true, false)];
        assert!(tx_kandidat(ChipsetFamily::Qualcomm, &liste).is_none());
    }

    #[test]
    fn erster_treffer_in_aufzaehlungsreihenfolge() {
        let liste = [
            ep(0, 3, "Incall_Music 1", true, false),
            ep(0, 5, "Incall_Music 2", true, false),
        ];
        let tx = tx_kandidat(ChipsetFamily::Qualcomm, &liste).unwrap();
        assert_eq!(tx.device, 3);
    }

    #[test]
    fn tx_braucht_playback() {
        let liste = [ep(0, 8, "RDMA8", false, true)];
        assert!(tx_kandidat(ChipsetFamily::Exynos, &liste).is_none());
    }

    #[test]
    fn unknown_nutzt_alle_muster() {
        let liste = [
            ep(1, 2, "Primary", true, true),
            ep(1, 4, "VOICE_UL", true, false),
            ep(1, 6, "Incall_Record", false, true),
        ];
        let tx = tx_kandidat(ChipsetFamily::Unknown, &liste).unwrap();
        let rx = rx_kandidat(ChipsetFamily::Unknown, &liste).unwrap();
        assert_eq!(tx.device, 4);
        assert_eq!(rx.device, 6);
    }

    #[test]
    fn leere_liste_liefert_exynos_defaults() {
        let config = konfiguration_ableiten(ChipsetFamily::Exynos, &[]);
        assert_eq!((config.card, config.tx), (0, 8));
        assert!(!config.probed);
        assert!(!config.manual_override);
    }

    #[test]
    fn gefundene_werte_ueberschreiben_defaults() {
        let liste = [
            ep(0, 5, "Incall_Music 2", true, false),
            ep(0, 7, "Incall_Record", false, true),
        ];
        let config = konfiguration_ableiten(ChipsetFamily::Qualcomm, &liste);
        assert_eq!((config.card, config.tx, config.rx), (0, 5, 7));
        assert!(config.probed);
    }

    // -- Prober mit Test-Doubles -------------------------------------------

    struct FesteAusgabe(Option<&'static str>);

    #[async_trait]
    impl PrivilegierterAusfuehrer for FesteAusgabe {
        async fn ausfuehren(&self, _befehl: &str) -> AudioResult<BefehlsAusgabe> {
            match self.0 {
                Some(text) => Ok(BefehlsAusgabe {
                    stdout: text.to_string(),
                    stderr: String::new(),
                    exit_code: Some(0),
                }),
                None => Err(AudioError::Ausfuehrung("kein root".into())),
            }
        }

        fn starten(&self, _befehl: &str) -> AudioResult<Child> {
            Err(AudioError::Start("nicht unterstuetzt".into()))
        }
    }

    struct Exynos;

    impl PlattformQuelle for Exynos {
        fn pfad_existiert(&self, pfad: &Path) -> bool {
            pfad == Path::new("/proc/asound/abox")
        }
        fn board_kennungen(&self) -> Vec<String> {
            Vec::new()
        }
        fn hardware_beschreibung(&self) -> Option<String> {
            None
        }
    }

    fn prober(ausgabe: Option<&'static str>) -> DeviceProber {
        DeviceProber::neu(
            Arc::new(FesteAusgabe(ausgabe)),
            Arc::new(ChipsetDetector::neu(Arc::new(Exynos))),
        )
    }

    #[tokio::test]
    async fn ohne_root_leere_liste() {
        let p = prober(None);
        assert!(p.endpunkte_auflisten().await.is_empty());
        let config = p.auto_probe().await;
        assert_eq!(config.chipset, ChipsetFamily::Exynos);
        assert_eq!((config.card, config.tx), (0, 8));
        assert!(!config.probed);
    }

    #[tokio::test]
    async fn auto_probe_mit_pcm_liste() {
        let p = prober(Some(
            "00-00: Primary : : playback 1 : capture 1\n\
             00-08: RDMA8 (*) : : playback 1\n\
             00-09: WDMA5 Call Record : : capture 1\n",
        ));
        let config = p.auto_probe().await;
        assert_eq!((config.card, config.tx, config.rx), (0, 8, 9));
        assert!(config.probed);
        assert_eq!(p.voice_tx_finden(ChipsetFamily::Exynos).await.unwrap().device, 8);
        assert_eq!(p.voice_rx_finden(ChipsetFamily::Exynos).await.unwrap().device, 9);
    }
}
