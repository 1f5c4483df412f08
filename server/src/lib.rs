//! callgate-server – Bibliotheks-Root
//!
//! Setzt Audio, Telefonie und Controller aus der Konfiguration zusammen
//! und stellt den oeffentlichen Einstiegspunkt fuer Tests bereit.

pub mod config;
pub mod telefonie;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use callgate_audio::{
    AudioInjector, ChipsetDetector, DeviceConfigStore, DeviceProber, HelferAufloeser,
    PrivilegierterAusfuehrer, SuAusfuehrer,
};
use callgate_gateway::{
    GatewayController, GatewayHandle, HttpMedienLader, Kollaborateure, WebSocketVerbinder,
};
use callgate_telephony::{CallControlBridge, CallStateTracker};
use config::ServerConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::telefonie::{ShellTelefonie, TelefonieBeobachter};

/// Haelt das laufende Gateway zusammen
pub struct Server {
    pub config: ServerConfig,
}

/// Laufende Subsysteme
pub struct Laufzeit {
    pub handle: GatewayHandle,
    controller: JoinHandle<()>,
    beobachter: JoinHandle<()>,
    abbruch: CancellationToken,
}

impl Laufzeit {
    /// Stoppt Beobachter und Controller und wartet auf beide
    pub async fn beenden(self) {
        self.abbruch.cancel();
        self.handle.stoppen();
        let _ = self.beobachter.await;
        if let Err(e) = self.controller.await {
            tracing::warn!(fehler = %e, "Controller-Task abgebrochen");
        }
    }
}

impl Server {
    /// Erstellt ein Gateway aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Baut alle Subsysteme auf und startet Controller und Beobachter
    ///
    /// Reihenfolge:
    /// 1. Privilegierter Ausfuehrer, Chipsatz-Erkennung, Prober
    /// 2. Geraete-Speicher und AudioInjector
    /// 3. Bridge, Tracker und Controller
    /// 4. Telefonie-Beobachter
    pub fn aufbauen(&self) -> Result<Laufzeit> {
        let cfg = &self.config;

        let ausfuehrer: Arc<dyn PrivilegierterAusfuehrer> =
            Arc::new(SuAusfuehrer::mit_programm(cfg.audio.su_programm.as_str(), "-c"));
        let detector = Arc::new(ChipsetDetector::system());
        let prober = Arc::new(DeviceProber::neu(ausfuehrer.clone(), detector));
        let speicher = Arc::new(DeviceConfigStore::neu(cfg.audio.konfig_pfad.clone()));
        let injector = Arc::new(AudioInjector::neu(
            ausfuehrer.clone(),
            prober,
            speicher,
            HelferAufloeser::neu(cfg.audio.helfer_pfade.clone()),
        ));

        let medien = HttpMedienLader::neu(
            cfg.audio.medien_verzeichnis.clone(),
            Duration::from_secs(cfg.audio.download_timeout_sek),
        )?;
        let (bridge, bridge_ereignisse) = CallControlBridge::neu(cfg.dtmf_takt());

        let (handle, controller) = GatewayController::starten(
            cfg.gateway_config(),
            Kollaborateure {
                verbinder: Arc::new(WebSocketVerbinder::neu(Duration::from_secs(
                    cfg.gateway.verbindungs_timeout_sek,
                ))),
                waehler: Arc::new(ShellTelefonie::neu(ausfuehrer.clone())),
                injector,
                bridge: bridge.clone(),
                bridge_ereignisse,
                medien: Arc::new(medien),
                sms: None,
                tracker: CallStateTracker::neu(cfg.wahl_timeout()),
            },
        );

        let abbruch = CancellationToken::new();
        let beobachter =
            TelefonieBeobachter::neu(ausfuehrer, handle.clone(), bridge, cfg.poll_intervall())
                .starten(abbruch.clone());

        Ok(Laufzeit {
            handle,
            controller,
            beobachter,
            abbruch,
        })
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            url = %self.config.gateway.url,
            konfig = %self.config.audio.konfig_pfad.display(),
            su = %self.config.audio.su_programm,
            "Gateway startet"
        );

        let laufzeit = self.aufbauen()?;

        tracing::info!("Gateway laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Gateway wird beendet");

        laufzeit.beenden().await;
        Ok(())
    }
}
