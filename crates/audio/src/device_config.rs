//! DeviceConfig – aufgeloeste Audio-Zuordnung und ihre Persistenz
//!
//! Genau ein Datensatz pro Geraet, als JSON-Datei:
//! ```json
//! {"chipset":"EXYNOS","card":0,"tx":8,"rx":-1,"probed":true,"manualOverride":false}
//! ```
//! Beim Laden wird jedes Feld einzeln toleriert: fehlende oder kaputte
//! Werte fallen auf ihren Default zurueck.

use std::path::{Path, PathBuf};

use callgate_core::types::ChipsetFamily;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::AudioResult;
use crate::prober::DeviceProber;

/// Nicht zugeordneter Geraete-Index
pub const NICHT_ZUGEORDNET: i32 = -1;

// ---------------------------------------------------------------------------
// DeviceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub chipset: ChipsetFamily,
    pub card: i32,
    pub tx: i32,
    pub rx: i32,
    /// Stammt aus einer echten Enumeration statt aus Defaults
    pub probed: bool,
    /// Vom Benutzer gesetzt, hat Vorrang vor jeder automatischen Erkennung
    pub manual_override: bool,
}

impl DeviceConfig {
    /// Fest hinterlegte Defaults je Chipsatz
    pub fn standard_fuer(chipset: ChipsetFamily) -> Self {
        let (card, tx) = match chipset {
            ChipsetFamily::Exynos => (0, 8),
            _ => (0, NICHT_ZUGEORDNET),
        };
        Self {
            chipset,
            card,
            tx,
            rx: NICHT_ZUGEORDNET,
            probed: false,
            manual_override: false,
        }
    }

    pub fn hat_tx(&self) -> bool {
        self.tx >= 0
    }

    /// Feldweise tolerantes Einlesen aus einem JSON-Objekt
    fn aus_map(map: &Map<String, Value>) -> Self {
        let zahl = |schluessel: &str| {
            map.get(schluessel)
                .and_then(Value::as_i64)
                .and_then(|n| i32::try_from(n).ok())
        };
        let flag = |schluessel: &str| map.get(schluessel).and_then(Value::as_bool).unwrap_or(false);

        let chipset = map
            .get("chipset")
            .and_then(Value::as_str)
            .map(ChipsetFamily::aus_str)
            .unwrap_or_default();

        Self {
            chipset,
            card: zahl("card").unwrap_or(0),
            tx: zahl("tx").unwrap_or(NICHT_ZUGEORDNET),
            rx: zahl("rx").unwrap_or(NICHT_ZUGEORDNET),
            probed: flag("probed"),
            manual_override: flag("manualOverride"),
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceConfigStore
// ---------------------------------------------------------------------------

/// Persistenter Speicher fuer genau eine `DeviceConfig`
pub struct DeviceConfigStore {
    pfad: PathBuf,
    /// Serialisiert Lese-Pruefe-Schreibe-Folgen (resolve, Override)
    sperre: Mutex<()>,
}

impl DeviceConfigStore {
    pub fn neu(pfad: impl Into<PathBuf>) -> Self {
        Self {
            pfad: pfad.into(),
            sperre: Mutex::new(()),
        }
    }

    pub fn pfad(&self) -> &Path {
        &self.pfad
    }

    /// Laedt den gespeicherten Datensatz; `None` wenn keiner (lesbar) existiert
    pub async fn laden(&self) -> Option<DeviceConfig> {
        let inhalt = match tokio::fs::read_to_string(&self.pfad).await {
            Ok(inhalt) => inhalt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(pfad = %self.pfad.display(), fehler = %e, "Geraete-Konfiguration nicht lesbar");
                return None;
            }
        };

        match serde_json::from_str::<Value>(&inhalt) {
            Ok(Value::Object(map)) => Some(DeviceConfig::aus_map(&map)),
            Ok(_) | Err(_) => {
                tracing::warn!(pfad = %self.pfad.display(), "Geraete-Konfiguration beschaedigt");
                None
            }
        }
    }

    /// Schreibt den Datensatz atomar (temporaere Datei + Umbenennen)
    pub async fn speichern(&self, config: &DeviceConfig) -> AudioResult<()> {
        if let Some(verzeichnis) = self.pfad.parent() {
            if !verzeichnis.as_os_str().is_empty() {
                tokio::fs::create_dir_all(verzeichnis).await?;
            }
        }
        let json = serde_json::to_vec_pretty(config)?;
        let tmp = self.pfad.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.pfad).await?;
        tracing::debug!(pfad = %self.pfad.display(), "Geraete-Konfiguration gespeichert");
        Ok(())
    }

    /// Entfernt den Datensatz; kein Fehler wenn keiner existiert
    pub async fn loeschen(&self) -> AudioResult<()> {
        let _sperre = self.sperre.lock().await;
        match tokio::fs::remove_file(&self.pfad).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Bestimmt die Zuordnung fuer die naechste Einspielung
    ///
    /// Reihenfolge: manueller Override, dann passende geprobte Konfiguration,
    /// sonst Auto-Probe mit anschliessendem Speichern.
    pub async fn aufloesen(&self, prober: &DeviceProber) -> DeviceConfig {
        let _sperre = self.sperre.lock().await;

        if let Some(gespeichert) = self.laden().await {
            if gespeichert.manual_override {
                return gespeichert;
            }
            if gespeichert.probed && gespeichert.chipset == prober.detector().erkennen().await {
                return gespeichert;
            }
        }

        let config = prober.auto_probe().await;
        if let Err(e) = self.speichern(&config).await {
            tracing::warn!(fehler = %e, "Probe-Ergebnis nicht gespeichert");
        }
        config
    }

    /// Setzt eine manuelle Zuordnung und speichert sie sofort
    pub async fn manuell_setzen(
        &self,
        chipset: ChipsetFamily,
        card: i32,
        tx: i32,
        rx: i32,
    ) -> AudioResult<DeviceConfig> {
        let _sperre = self.sperre.lock().await;
        let config = DeviceConfig {
            chipset,
            card,
            tx,
            rx,
            probed: false,
            manual_override: true,
        };
        self.speichern(&config).await?;
        tracing::info!(card, tx, rx, "Manuelle Geraete-Zuordnung gesetzt");
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chipset::{ChipsetDetector, PlattformQuelle};
    use crate::error::AudioResult;
    use crate::executor::{BefehlsAusgabe, PrivilegierterAusfuehrer};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::process::Child;

    struct Pcm {
        text: &'static str,
        aufrufe: AtomicUsize,
    }

    #[async_trait]
    impl PrivilegierterAusfuehrer for Pcm {
        async fn ausfuehren(&self, _befehl: &str) -> AudioResult<BefehlsAusgabe> {
            self.aufrufe.fetch_add(1, Ordering::SeqCst);
            Ok(BefehlsAusgabe {
                stdout: self.text.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }

        fn starten(&self, _befehl: &str) -> AudioResult<Child> {
            Err(crate::error::AudioError::Start("nicht unterstuetzt".into()))
        }
    }

    struct Qualcomm;

    impl PlattformQuelle for Qualcomm {
        fn pfad_existiert(&self, _pfad: &Path) -> bool {
            false
        }
        fn board_kennungen(&self) -> Vec<String> {
            vec!["kona".into()]
        }
        fn hardware_beschreibung(&self) -> Option<String> {
            None
        }
    }

    fn aufbau() -> (tempfile::TempDir, DeviceConfigStore, DeviceProber, Arc<Pcm>) {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceConfigStore::neu(dir.path().join("geraet.json"));
        let pcm = Arc::new(Pcm {
            text: "00-05: Incall_Music 2 : : playback 1\n00-07: Incall_Record : : capture 1\n",
            aufrufe: AtomicUsize::new(0),
        });
        let prober = DeviceProber::neu(
            pcm.clone(),
            Arc::new(ChipsetDetector::neu(Arc::new(Qualcomm))),
        );
        (dir, store, prober, pcm)
    }

    #[test]
    fn defaults_je_chipsatz() {
        let e = DeviceConfig::standard_fuer(ChipsetFamily::Exynos);
        assert_eq!((e.card, e.tx, e.rx), (0, 8, -1));
        assert!(e.hat_tx());
        let m = DeviceConfig::standard_fuer(ChipsetFamily::Mediatek);
        assert!(!m.hat_tx());
    }

    #[tokio::test]
    async fn fehlende_datei_ist_none() {
        let (_dir, store, _, _) = aufbau();
        assert!(store.laden().await.is_none());
        store.loeschen().await.unwrap();
    }

    #[tokio::test]
    async fn speichern_und_laden() {
        let (_dir, store, _, _) = aufbau();
        let config = DeviceConfig {
            chipset: ChipsetFamily::Mediatek,
            card: 1,
            tx: 3,
            rx: 4,
            probed: true,
            manual_override: false,
        };
        store.speichern(&config).await.unwrap();
        assert_eq!(store.laden().await, Some(config));

        let roh = std::fs::read_to_string(store.pfad()).unwrap();
        assert!(roh.contains("\"manualOverride\""));
    }

    #[tokio::test]
    async fn kaputte_felder_fallen_auf_defaults() {
        let (_dir, store, _, _) = aufbau();
        std::fs::write(
            store.pfad(),
            r#"{"chipset":"PENTIUM","card":"null","tx":8,"probed":"ja"}"#,
        )
        .unwrap();
        let config = store.laden().await.unwrap();
        assert_eq!(config.chipset, ChipsetFamily::Unknown);
        assert_eq!(config.card, 0);
        assert_eq!(config.tx, 8);
        assert_eq!(config.rx, -1);
        assert!(!config.probed);
        assert!(!config.manual_override);
    }

    #[tokio::test]
    async fn kein_json_objekt_ist_none() {
        let (_dir, store, _, _) = aufbau();
        std::fs::write(store.pfad(), "[1,2,3]").unwrap();
        assert!(store.laden().await.is_none());
        std::fs::write(store.pfad(), "{kaputt").unwrap();
        assert!(store.laden().await.is_none());
    }

    #[tokio::test]
    async fn aufloesen_probt_und_speichert() {
        let (_dir, store, prober, pcm) = aufbau();
        let config = store.aufloesen(&prober).await;
        assert_eq!(config.chipset, ChipsetFamily::Qualcomm);
        assert_eq!((config.card, config.tx, config.rx), (0, 5, 7));
        assert!(config.probed);
        assert_eq!(store.laden().await, Some(config.clone()));

        // Zweiter Aufruf nutzt den gespeicherten, geprobten Datensatz
        let erneut = store.aufloesen(&prober).await;
        assert_eq!(erneut, config);
        assert_eq!(pcm.aufrufe.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn anderer_chipsatz_erzwingt_neue_probe() {
        let (_dir, store, prober, pcm) = aufbau();
        let mut alt = DeviceConfig::standard_fuer(ChipsetFamily::Exynos);
        alt.probed = true;
        store.speichern(&alt).await.unwrap();

        let config = store.aufloesen(&prober).await;
        assert_eq!(config.chipset, ChipsetFamily::Qualcomm);
        assert_eq!(pcm.aufrufe.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn override_bleibt_bis_zum_loeschen() {
        let (_dir, store, prober, pcm) = aufbau();
        let gesetzt = store
            .manuell_setzen(ChipsetFamily::Qualcomm, 2, 11, -1)
            .await
            .unwrap();
        assert!(gesetzt.manual_override);
        assert!(!gesetzt.probed);

        for _ in 0..3 {
            assert_eq!(store.aufloesen(&prober).await, gesetzt);
        }
        assert_eq!(pcm.aufrufe.load(Ordering::SeqCst), 0);

        store.loeschen().await.unwrap();
        let neu = store.aufloesen(&prober).await;
        assert!(!neu.manual_override);
        assert_eq!(neu.tx, 5);
    }
}
