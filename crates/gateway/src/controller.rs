//! GatewayController – serialisierter Actor ueber Kanal, Telefonie und Audio
//!
//! ## Status
//! ```text
//! IDLE -> CONNECTING -> CONNECTED -> {DIALING, PLAYING_AUDIO} <-> IN_CALL
//!              ^             |
//!              +-- DISCONNECTED (genau ein Reconnect nach fester Wartezeit)
//! ```
//! Der Status wird nach jedem verarbeiteten Ereignis aus Verbindungs-,
//! Telefonie- und Wiedergabezustand abgeleitet. ERROR ist ein kurzer
//! Zwischenzustand, der nur mit einem `CALL_ERROR`-Event gemeldet wird.
//!
//! ## Nebenlaeufigkeit
//! Verbindungsaufbau, Heartbeat, Reconnect, Download, Waehlen und SMS laufen
//! als eigene Tasks und melden sich ausschliesslich ueber die Inbox zurueck.
//! Alles, was den AudioInjector oder die Geraete-Zuordnung beruehrt, geht
//! ueber genau einen Audio-Task und wird dort strikt in Reihenfolge
//! abgearbeitet. Nachrichten veralteter Verbindungen werden ueber eine
//! Generationsnummer verworfen.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use callgate_audio::{Abschluss, AudioInjector};
use callgate_core::types::{CallState, GatewayStatus};
use callgate_protocol::{
    befehl_parsen, Antwort, AudioQuelle, AusgehendeNachricht, Befehl, GatewayEreignis, Heartbeat,
    ResultCode,
};
use callgate_telephony::{
    BridgeEreignis, CallControlBridge, CallStateTracker, RawCallSignal, TelephonyError,
    TrackerUebergang, Waehler,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channel::{KanalEreignis, KanalVerbinder};
use crate::config::GatewayConfig;
use crate::media::MedienLader;
use crate::sms::SmsVersender;

// ---------------------------------------------------------------------------
// Kollaborateure
// ---------------------------------------------------------------------------

/// Alles, was der Controller von aussen braucht
pub struct Kollaborateure {
    pub verbinder: Arc<dyn KanalVerbinder>,
    pub waehler: Arc<dyn Waehler>,
    pub injector: Arc<AudioInjector>,
    pub bridge: CallControlBridge,
    pub bridge_ereignisse: mpsc::UnboundedReceiver<BridgeEreignis>,
    pub medien: Arc<dyn MedienLader>,
    /// `None`: `SEND_SMS` wird mit `UNSUPPORTED` beantwortet
    pub sms: Option<Arc<dyn SmsVersender>>,
    pub tracker: CallStateTracker,
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

enum Eingang {
    Verbinden,
    Stoppen,
    Verbunden {
        generation: u64,
        ausgang: mpsc::UnboundedSender<String>,
    },
    VerbindungFehlgeschlagen {
        generation: u64,
        fehler: String,
    },
    KanalNachricht {
        generation: u64,
        text: String,
    },
    KanalGeschlossen {
        generation: u64,
        grund: Option<String>,
    },
    ReconnectFaellig {
        nummer: u64,
    },
    Heartbeat {
        generation: u64,
    },
    Telefonie(RawCallSignal),
    TelefonieFehler(String),
    MedienGeladen {
        id: Value,
        ergebnis: Result<PathBuf, String>,
    },
    WiedergabeGestartet {
        id: Value,
        sitzung: u64,
        gestartet: bool,
    },
    WiedergabeBeendet {
        sitzung: u64,
        erfolg: bool,
    },
    WahlErgebnis {
        id: Value,
        nummer: String,
        ergebnis: Result<(), TelephonyError>,
    },
    AuflegenErgebnis {
        id: Value,
        ergebnis: Result<(), TelephonyError>,
    },
    /// Fertige Antwort eines Hintergrund-Tasks
    Antwort(Antwort),
}

/// Auftraege an den Audio-Task, strikt in Eingangsreihenfolge
enum AudioAuftrag {
    Abspielen {
        id: Value,
        sitzung: u64,
        pfad: PathBuf,
    },
    Stoppen,
    GeraetSetzen {
        id: Value,
        card: i32,
        tx: i32,
        rx: i32,
    },
    GeraetZuruecksetzen {
        id: Value,
    },
}

/// Zustand des Befehlskanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbindung {
    /// Noch nie verbunden oder explizit gestoppt
    Leerlauf,
    Verbindet,
    Verbunden,
    /// Abgebrochen, Reconnect steht aus
    Getrennt,
}

// ---------------------------------------------------------------------------
// GatewayHandle
// ---------------------------------------------------------------------------

/// Steuerzugriff auf einen laufenden Controller
#[derive(Clone)]
pub struct GatewayHandle {
    eingang: mpsc::UnboundedSender<Eingang>,
    status: watch::Receiver<GatewayStatus>,
}

impl GatewayHandle {
    /// Startet einen Verbindungsversuch (bricht einen geplanten Reconnect ab)
    pub fn verbinden(&self) {
        self.senden(Eingang::Verbinden);
    }

    /// Trennt, bricht alle Timer ab und beendet den Actor
    pub fn stoppen(&self) {
        self.senden(Eingang::Stoppen);
    }

    /// Rohes Signal des Telefonie-Subsystems einspeisen
    pub fn telefonie_signal(&self, signal: RawCallSignal) {
        self.senden(Eingang::Telefonie(signal));
    }

    /// Berechtigungs- oder Systemfehler der Telefonie melden
    pub fn telefonie_fehler(&self, grund: impl Into<String>) {
        self.senden(Eingang::TelefonieFehler(grund.into()));
    }

    pub fn status(&self) -> GatewayStatus {
        *self.status.borrow()
    }

    pub fn status_beobachten(&self) -> watch::Receiver<GatewayStatus> {
        self.status.clone()
    }

    fn senden(&self, eingang: Eingang) {
        if self.eingang.send(eingang).is_err() {
            tracing::debug!("Gateway-Controller bereits beendet");
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayController
// ---------------------------------------------------------------------------

pub struct GatewayController {
    config: GatewayConfig,
    verbinder: Arc<dyn KanalVerbinder>,
    waehler: Arc<dyn Waehler>,
    injector: Arc<AudioInjector>,
    bridge: CallControlBridge,
    medien: Arc<dyn MedienLader>,
    sms: Option<Arc<dyn SmsVersender>>,
    tracker: CallStateTracker,

    eingang_tx: mpsc::UnboundedSender<Eingang>,
    audio: mpsc::UnboundedSender<AudioAuftrag>,
    audio_task: JoinHandle<()>,
    status: GatewayStatus,
    status_tx: watch::Sender<GatewayStatus>,

    verbindung: Verbindung,
    generation: u64,
    ausgang: Option<mpsc::UnboundedSender<String>>,
    /// Bricht Verbindungs-Task und Heartbeat der aktuellen Generation ab
    verbindung_abbruch: Option<CancellationToken>,
    reconnect: Option<(u64, CancellationToken)>,
    reconnect_zaehler: u64,

    /// Laufende Wiedergabe-Sitzung (controller-seitige Nummer)
    wiedergabe: Option<u64>,
    naechste_sitzung: u64,
    /// Hoechste bereits beendete Sitzung
    beendet_bis: u64,
    /// Heruntergeladene Dateien je Sitzung, werden nach dem Ende verworfen
    medien_dateien: HashMap<u64, PathBuf>,
}

impl GatewayController {
    /// Startet den Actor und gibt Handle und Task zurueck
    pub fn starten(
        config: GatewayConfig,
        kollaborateure: Kollaborateure,
    ) -> (GatewayHandle, JoinHandle<()>) {
        let (eingang_tx, eingang_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(GatewayStatus::Idle);

        let Kollaborateure {
            verbinder,
            waehler,
            injector,
            bridge,
            bridge_ereignisse,
            medien,
            sms,
            tracker,
        } = kollaborateure;

        let (audio, audio_rx) = mpsc::unbounded_channel();
        let audio_task = tokio::spawn(audio_task(injector.clone(), audio_rx, eingang_tx.clone()));

        let controller = Self {
            config,
            verbinder,
            waehler,
            injector,
            bridge,
            medien,
            sms,
            tracker,
            eingang_tx: eingang_tx.clone(),
            audio,
            audio_task,
            status: GatewayStatus::Idle,
            status_tx,
            verbindung: Verbindung::Leerlauf,
            generation: 0,
            ausgang: None,
            verbindung_abbruch: None,
            reconnect: None,
            reconnect_zaehler: 0,
            wiedergabe: None,
            naechste_sitzung: 0,
            beendet_bis: 0,
            medien_dateien: HashMap::new(),
        };

        let task = tokio::spawn(controller.laufen(eingang_rx, bridge_ereignisse));
        let handle = GatewayHandle {
            eingang: eingang_tx,
            status: status_rx,
        };
        (handle, task)
    }

    async fn laufen(
        mut self,
        mut eingang: mpsc::UnboundedReceiver<Eingang>,
        mut bridge_ereignisse: mpsc::UnboundedReceiver<BridgeEreignis>,
    ) {
        tracing::info!(url = %self.config.url, "Gateway-Controller gestartet");
        if self.config.auto_verbinden {
            self.verbinden();
        }

        loop {
            tokio::select! {
                Some(e) = eingang.recv() => {
                    if !self.verarbeiten(e) {
                        break;
                    }
                }
                Some(e) = bridge_ereignisse.recv() => self.bridge_ereignis(e),
                else => break,
            }
        }

        // Audio-Task arbeitet die Warteschlange ab und stoppt die Wiedergabe
        let Self {
            audio,
            audio_task,
            medien,
            medien_dateien,
            ..
        } = self;
        drop(audio);
        if let Err(e) = audio_task.await {
            tracing::warn!(fehler = %e, "Audio-Task abgebrochen");
        }
        for pfad in medien_dateien.into_values() {
            medien.verwerfen(&pfad).await;
        }
        tracing::info!("Gateway-Controller beendet");
    }

    /// Verarbeitet eine Inbox-Nachricht; `false` beendet den Actor
    fn verarbeiten(&mut self, eingang: Eingang) -> bool {
        match eingang {
            Eingang::Verbinden => self.verbinden(),
            Eingang::Stoppen => {
                self.stoppen();
                return false;
            }
            Eingang::Verbunden {
                generation,
                ausgang,
            } => self.verbunden(generation, ausgang),
            Eingang::VerbindungFehlgeschlagen { generation, fehler } => {
                if generation == self.generation && self.verbindung == Verbindung::Verbindet {
                    tracing::warn!(fehler = %fehler, url = %self.config.url, "Verbindung fehlgeschlagen");
                    self.verbindung_verloren();
                }
            }
            Eingang::KanalGeschlossen { generation, grund } => {
                if generation == self.generation && self.verbindung == Verbindung::Verbunden {
                    tracing::warn!(grund = ?grund, "Befehlskanal geschlossen");
                    self.verbindung_verloren();
                }
            }
            Eingang::KanalNachricht { generation, text } => {
                if generation == self.generation {
                    self.befehl_verarbeiten(&text);
                }
            }
            Eingang::ReconnectFaellig { nummer } => {
                if matches!(&self.reconnect, Some((n, _)) if *n == nummer) {
                    self.reconnect = None;
                    tracing::info!("Reconnect-Versuch");
                    self.verbinden();
                }
            }
            Eingang::Heartbeat { generation } => {
                if generation == self.generation && self.verbindung == Verbindung::Verbunden {
                    self.heartbeat_senden();
                }
            }
            Eingang::Telefonie(signal) => self.telefonie_signal(signal),
            Eingang::TelefonieFehler(grund) => {
                let TrackerUebergang::Fehler { grund } = self.tracker.fehler(grund) else {
                    return true;
                };
                self.fehler_melden(grund);
            }
            Eingang::MedienGeladen { id, ergebnis } => self.medien_geladen(id, ergebnis),
            Eingang::WiedergabeGestartet {
                id,
                sitzung,
                gestartet,
            } => self.wiedergabe_gestartet(id, sitzung, gestartet),
            Eingang::WiedergabeBeendet { sitzung, erfolg } => {
                tracing::info!(sitzung, erfolg, "Wiedergabe beendet");
                self.beendet_bis = self.beendet_bis.max(sitzung);
                if let Some(pfad) = self.medien_dateien.remove(&sitzung) {
                    self.medien_verwerfen(pfad);
                }
                if self.wiedergabe == Some(sitzung) {
                    self.wiedergabe = None;
                    self.status_aktualisieren();
                }
            }
            Eingang::WahlErgebnis {
                id,
                nummer,
                ergebnis,
            } => self.wahl_ergebnis(id, nummer, ergebnis),
            Eingang::AuflegenErgebnis { id, ergebnis } => {
                let antwort = match ergebnis {
                    Ok(()) => Antwort::erfolg(id, ResultCode::HangupRequested),
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Auflegen ohne Anruf-Handle fehlgeschlagen");
                        self.abgelehnt(id, ResultCode::NoActiveCall, "Kein aktiver Anruf")
                    }
                };
                self.antworten(antwort);
            }
            Eingang::Antwort(antwort) => self.antworten(antwort),
        }
        true
    }

    // -----------------------------------------------------------------------
    // Verbindung
    // -----------------------------------------------------------------------

    fn verbinden(&mut self) {
        if let Some((_, token)) = self.reconnect.take() {
            token.cancel();
        }
        if matches!(self.verbindung, Verbindung::Verbindet | Verbindung::Verbunden) {
            tracing::debug!(verbindung = ?self.verbindung, "Verbindung besteht bereits");
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.verbindung = Verbindung::Verbindet;
        self.status_aktualisieren();

        let abbruch = CancellationToken::new();
        self.verbindung_abbruch = Some(abbruch.clone());

        let verbinder = self.verbinder.clone();
        let url = self.config.url.clone();
        let tx = self.eingang_tx.clone();

        tokio::spawn(async move {
            let ergebnis = tokio::select! {
                _ = abbruch.cancelled() => return,
                ergebnis = verbinder.verbinden(&url) => ergebnis,
            };
            let mut verbindung = match ergebnis {
                Ok(v) => v,
                Err(e) => {
                    let _ = tx.send(Eingang::VerbindungFehlgeschlagen {
                        generation,
                        fehler: e.to_string(),
                    });
                    return;
                }
            };
            if tx
                .send(Eingang::Verbunden {
                    generation,
                    ausgang: verbindung.ausgang,
                })
                .is_err()
            {
                return;
            }

            loop {
                let ereignis = tokio::select! {
                    _ = abbruch.cancelled() => return,
                    ereignis = verbindung.eingang.recv() => ereignis,
                };
                let weiter = match ereignis {
                    Some(KanalEreignis::Nachricht(text)) => tx
                        .send(Eingang::KanalNachricht { generation, text })
                        .is_ok(),
                    Some(KanalEreignis::Geschlossen(grund)) => {
                        let _ = tx.send(Eingang::KanalGeschlossen { generation, grund });
                        false
                    }
                    None => {
                        let _ = tx.send(Eingang::KanalGeschlossen {
                            generation,
                            grund: None,
                        });
                        false
                    }
                };
                if !weiter {
                    return;
                }
            }
        });
    }

    fn verbunden(&mut self, generation: u64, ausgang: mpsc::UnboundedSender<String>) {
        if generation != self.generation || self.verbindung != Verbindung::Verbindet {
            tracing::debug!(generation, "Veraltete Verbindung verworfen");
            return;
        }
        self.ausgang = Some(ausgang);
        self.verbindung = Verbindung::Verbunden;
        self.status_aktualisieren();
        tracing::info!(url = %self.config.url, "Befehlskanal verbunden");

        if let Some(abbruch) = &self.verbindung_abbruch {
            self.heartbeat_starten(generation, abbruch.clone());
        }
    }

    fn heartbeat_starten(&self, generation: u64, abbruch: CancellationToken) {
        let intervall = self.config.heartbeat_intervall;
        let tx = self.eingang_tx.clone();
        tokio::spawn(async move {
            let mut takt = tokio::time::interval_at(tokio::time::Instant::now() + intervall, intervall);
            takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = abbruch.cancelled() => break,
                    _ = takt.tick() => {
                        if tx.send(Eingang::Heartbeat { generation }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn verbindung_verloren(&mut self) {
        if let Some(abbruch) = self.verbindung_abbruch.take() {
            abbruch.cancel();
        }
        self.ausgang = None;
        self.verbindung = Verbindung::Getrennt;
        self.status_aktualisieren();
        self.reconnect_planen();
    }

    /// Plant genau einen Reconnect; ein bereits geplanter bleibt bestehen
    fn reconnect_planen(&mut self) {
        if self.reconnect.is_some() {
            tracing::debug!("Reconnect bereits geplant");
            return;
        }
        self.reconnect_zaehler += 1;
        let nummer = self.reconnect_zaehler;
        let token = CancellationToken::new();
        self.reconnect = Some((nummer, token.clone()));

        let verzoegerung = self.config.reconnect_verzoegerung;
        let tx = self.eingang_tx.clone();
        tracing::info!(verzoegerung_ms = verzoegerung.as_millis() as u64, "Reconnect geplant");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(verzoegerung) => {
                    let _ = tx.send(Eingang::ReconnectFaellig { nummer });
                }
            }
        });
    }

    fn stoppen(&mut self) {
        tracing::info!("Gateway-Controller wird gestoppt");
        if let Some((_, token)) = self.reconnect.take() {
            token.cancel();
        }
        if let Some(abbruch) = self.verbindung_abbruch.take() {
            abbruch.cancel();
        }
        self.ausgang = None;
        self.wiedergabe_beenden();
        self.verbindung = Verbindung::Leerlauf;
        self.status_aktualisieren();
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    fn status_ableiten(&self) -> GatewayStatus {
        match self.verbindung {
            Verbindung::Leerlauf => GatewayStatus::Idle,
            Verbindung::Verbindet => GatewayStatus::Connecting,
            Verbindung::Getrennt => GatewayStatus::Disconnected,
            Verbindung::Verbunden => match self.tracker.zustand() {
                CallState::Dialing => GatewayStatus::Dialing,
                CallState::Offhook if self.wiedergabe.is_some() => GatewayStatus::PlayingAudio,
                CallState::Offhook => GatewayStatus::InCall,
                CallState::Idle | CallState::Ringing | CallState::Error => GatewayStatus::Connected,
            },
        }
    }

    fn status_aktualisieren(&mut self) {
        let neu = self.status_ableiten();
        self.status_setzen(neu);
    }

    fn status_setzen(&mut self, neu: GatewayStatus) {
        if self.status != neu {
            tracing::debug!(von = %self.status, nach = %neu, "Gateway-Status");
            self.status = neu;
            self.status_tx.send_replace(neu);
        }
    }

    /// Reicher Zustand des aktiven Handles, sonst der grobe Tracker-Zustand
    fn call_state(&self) -> String {
        match self.bridge.aktiver_anruf() {
            Some(info) => info.zustand.als_str().to_string(),
            None => self.tracker.zustand().als_str().to_string(),
        }
    }

    fn dauer_ms(&self) -> u64 {
        u64::try_from(self.bridge.dauer().as_millis()).unwrap_or(u64::MAX)
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    fn senden(&self, nachricht: AusgehendeNachricht) {
        let Some(ausgang) = &self.ausgang else {
            tracing::debug!("Nicht verbunden, Nachricht verworfen");
            return;
        };
        match nachricht.to_json() {
            Ok(json) => {
                if ausgang.send(json).is_err() {
                    tracing::debug!("Befehlskanal geschlossen, Nachricht verworfen");
                }
            }
            Err(e) => tracing::warn!(fehler = %e, "Nachricht nicht serialisierbar"),
        }
    }

    fn antworten(&self, antwort: Antwort) {
        self.senden(antwort.into());
    }

    fn event(&self, ereignis: GatewayEreignis) {
        self.senden(AusgehendeNachricht::event(ereignis, self.status));
    }

    fn heartbeat_senden(&self) {
        self.senden(AusgehendeNachricht::Heartbeat(Heartbeat {
            status: self.status,
            audio_playing: self.injector.spielt(),
            call_state: self.call_state(),
            call_duration_ms: self.dauer_ms(),
            active_calls: self.bridge.anzahl_aktiv(),
        }));
    }

    /// Fehler-Antwort mit aktuellem Anrufzustand
    fn abgelehnt(&self, id: Value, result: ResultCode, nachricht: impl Into<String>) -> Antwort {
        Antwort::fehler(id, result, nachricht).mit_anruf(self.call_state(), Some(self.dauer_ms()))
    }

    /// Meldet ERROR ueber `CALL_ERROR` und kehrt danach zum abgeleiteten Status zurueck
    fn fehler_melden(&mut self, grund: String) {
        self.status_setzen(GatewayStatus::Error);
        self.event(GatewayEreignis::CallError {
            message: Some(grund),
        });
        self.tracker.zuruecksetzen();
        self.status_aktualisieren();
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    fn befehl_verarbeiten(&mut self, text: &str) {
        let eingehend = match befehl_parsen(text) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(fehler = %e, "Unlesbare Nachricht ignoriert");
                return;
            }
        };
        let id = eingehend.id;
        tracing::debug!(befehl = eingehend.befehl.name(), id = %id, "Befehl empfangen");

        match eingehend.befehl {
            Befehl::Ping => {
                let antwort = Antwort::erfolg(id, ResultCode::Pong)
                    .mit_anruf(self.call_state(), Some(self.dauer_ms()));
                self.antworten(antwort);
            }
            Befehl::MakeCall { number } => self.anrufen(id, &number),
            Befehl::PlayAudio { quelle } => self.audio_abspielen(id, quelle),
            Befehl::Hangup => self.auflegen(id),
            Befehl::Hold => {
                let antwort = if self.bridge.halten() {
                    Antwort::erfolg(id, ResultCode::Held)
                } else {
                    self.abgelehnt(id, ResultCode::HoldFailed, "Kein haltbarer Anruf")
                };
                self.antworten(antwort);
            }
            Befehl::Unhold => {
                let antwort = if self.bridge.fortsetzen() {
                    Antwort::erfolg(id, ResultCode::Unheld)
                } else {
                    self.abgelehnt(id, ResultCode::UnholdFailed, "Kein gehaltener Anruf")
                };
                self.antworten(antwort);
            }
            Befehl::Answer => {
                let antwort = if self.bridge.annehmen() {
                    Antwort::erfolg(id, ResultCode::Answered)
                } else {
                    self.abgelehnt(id, ResultCode::NoRingingCall, "Kein klingelnder Anruf")
                };
                self.antworten(antwort);
            }
            Befehl::Reject => {
                let antwort = if self.bridge.ablehnen() {
                    Antwort::erfolg(id, ResultCode::Rejected)
                } else {
                    self.abgelehnt(id, ResultCode::NoRingingCall, "Kein klingelnder Anruf")
                };
                self.antworten(antwort);
            }
            Befehl::SendDtmf { digits } => {
                let antwort = if self.bridge.aktiver_anruf().is_none() {
                    self.abgelehnt(id, ResultCode::NoActiveCall, "Kein aktiver Anruf")
                } else if self.bridge.dtmf_folge_senden(&digits) {
                    Antwort::erfolg(id, ResultCode::DtmfSent)
                } else {
                    self.abgelehnt(id, ResultCode::InvalidDtmf, "Keine sendbaren DTMF-Ziffern")
                };
                self.antworten(antwort);
            }
            Befehl::SendSms { number, message } => self.sms_senden(id, number, message),
            Befehl::SetAudioDevice { card, tx, rx } => {
                if card < 0 || tx < 0 {
                    self.antworten(Antwort::fehler(
                        id,
                        ResultCode::DeviceConfigFailed,
                        "card und tx muessen >= 0 sein",
                    ));
                } else {
                    self.audio_auftrag(AudioAuftrag::GeraetSetzen { id, card, tx, rx });
                }
            }
            Befehl::ResetAudioDevice => self.audio_auftrag(AudioAuftrag::GeraetZuruecksetzen { id }),
            Befehl::Unbekannt { name } => {
                self.antworten(Antwort::fehler(
                    id,
                    ResultCode::Unrecognized,
                    format!("Unbekannter Befehl: {name:?}"),
                ));
            }
            Befehl::Fehlerhaft { name, grund } => {
                self.antworten(Antwort::fehler(
                    id,
                    ResultCode::Unrecognized,
                    format!("{name}: {grund}"),
                ));
            }
        }
    }

    fn anrufen(&mut self, id: Value, nummer: &str) {
        if self.status.hat_anruf_aktivitaet() || self.tracker.zustand() != CallState::Idle {
            let antwort = self.abgelehnt(id, ResultCode::CallInProgress, "Anruf bereits aktiv");
            self.antworten(antwort);
            return;
        }

        let bereinigt = match self.tracker.wahl_vorbereiten(nummer) {
            Ok(bereinigt) => bereinigt,
            Err(_) => {
                let antwort = Antwort::fehler(id, ResultCode::InvalidNumber, "Ungueltige Rufnummer");
                self.antworten(antwort);
                return;
            }
        };
        self.status_aktualisieren();

        let waehler = self.waehler.clone();
        let tx = self.eingang_tx.clone();
        tokio::spawn(async move {
            let ergebnis = waehler.waehlen(&bereinigt).await;
            let _ = tx.send(Eingang::WahlErgebnis {
                id,
                nummer: bereinigt,
                ergebnis,
            });
        });
    }

    fn wahl_ergebnis(&mut self, id: Value, nummer: String, ergebnis: Result<(), TelephonyError>) {
        match self.tracker.wahl_abschliessen(nummer, ergebnis) {
            Ok(_) => {
                self.status_aktualisieren();
                let antwort = Antwort::erfolg(id, ResultCode::CallInitiated)
                    .mit_anruf(self.call_state(), None);
                self.antworten(antwort);
            }
            Err(e) => {
                self.antworten(Antwort::fehler(id, ResultCode::DialFailed, e.to_string()));
                self.fehler_melden(e.to_string());
            }
        }
    }

    fn auflegen(&mut self, id: Value) {
        if self.bridge.auflegen() {
            self.antworten(Antwort::erfolg(id, ResultCode::HangupRequested));
            return;
        }
        if self.tracker.zustand() == CallState::Idle {
            let antwort = self.abgelehnt(id, ResultCode::NoActiveCall, "Kein aktiver Anruf");
            self.antworten(antwort);
            return;
        }

        // Ohne Handle: Telefonie-Subsystem direkt auflegen lassen
        let waehler = self.waehler.clone();
        let tx = self.eingang_tx.clone();
        tokio::spawn(async move {
            let ergebnis = waehler.auflegen().await;
            let _ = tx.send(Eingang::AuflegenErgebnis { id, ergebnis });
        });
    }

    fn sms_senden(&mut self, id: Value, nummer: String, text: String) {
        let Some(sms) = self.sms.clone() else {
            self.antworten(Antwort::fehler(
                id,
                ResultCode::Unsupported,
                "SMS-Versand nicht verfuegbar",
            ));
            return;
        };
        let tx = self.eingang_tx.clone();
        tokio::spawn(async move {
            let antwort = match sms.senden(&nummer, &text).await {
                Ok(()) => Antwort::erfolg(id, ResultCode::SmsSent),
                Err(e) => Antwort::fehler(id, ResultCode::SmsFailed, e),
            };
            let _ = tx.send(Eingang::Antwort(antwort));
        });
    }

    // -----------------------------------------------------------------------
    // Audio
    // -----------------------------------------------------------------------

    fn audio_abspielen(&mut self, id: Value, quelle: AudioQuelle) {
        if !self.status.ist_im_anruf() {
            let antwort = self.abgelehnt(id, ResultCode::NotInCall, "Kein verbundener Anruf");
            self.antworten(antwort);
            return;
        }

        match quelle {
            AudioQuelle::Pfad(pfad) => self.wiedergabe_starten(id, PathBuf::from(pfad), false),
            AudioQuelle::Standard => match self.config.standard_audio.clone() {
                Some(pfad) => self.wiedergabe_starten(id, pfad, false),
                None => self.antworten(Antwort::fehler(
                    id,
                    ResultCode::NoSource,
                    "Weder url noch path angegeben",
                )),
            },
            AudioQuelle::Url(url) => {
                let medien = self.medien.clone();
                let tx = self.eingang_tx.clone();
                tokio::spawn(async move {
                    let ergebnis = medien.laden(&url).await.map_err(|e| {
                        tracing::warn!(url = %url, fehler = %e, "Download fehlgeschlagen");
                        e.to_string()
                    });
                    let _ = tx.send(Eingang::MedienGeladen { id, ergebnis });
                });
            }
        }
    }

    fn medien_geladen(&mut self, id: Value, ergebnis: Result<PathBuf, String>) {
        match ergebnis {
            Err(e) => self.antworten(Antwort::fehler(id, ResultCode::DownloadFailed, e)),
            // Der Anruf kann waehrend des Downloads geendet haben
            Ok(pfad) if !self.status.ist_im_anruf() => {
                self.medien_verwerfen(pfad);
                let antwort = self.abgelehnt(id, ResultCode::NotInCall, "Anruf waehrend des Downloads beendet");
                self.antworten(antwort);
            }
            Ok(pfad) => self.wiedergabe_starten(id, pfad, true),
        }
    }

    /// Reiht den Start in die Audio-Warteschlange ein; die Antwort folgt mit
    /// `WiedergabeGestartet`
    fn wiedergabe_starten(&mut self, id: Value, pfad: PathBuf, heruntergeladen: bool) {
        self.naechste_sitzung += 1;
        let sitzung = self.naechste_sitzung;
        if heruntergeladen {
            self.medien_dateien.insert(sitzung, pfad.clone());
        }
        self.audio_auftrag(AudioAuftrag::Abspielen { id, sitzung, pfad });
    }

    fn wiedergabe_gestartet(&mut self, id: Value, sitzung: u64, gestartet: bool) {
        if !gestartet {
            self.antworten(Antwort::fehler(
                id,
                ResultCode::PlayFailed,
                "Wiedergabe konnte nicht gestartet werden",
            ));
            return;
        }

        if !self.status.ist_im_anruf() {
            // Anruf waehrend des Starts beendet
            self.audio_auftrag(AudioAuftrag::Stoppen);
            let antwort = self.abgelehnt(id, ResultCode::NotInCall, "Anruf waehrend des Starts beendet");
            self.antworten(antwort);
            return;
        }
        if sitzung > self.beendet_bis {
            self.wiedergabe = Some(sitzung);
            self.status_aktualisieren();
        }
        let antwort =
            Antwort::erfolg(id, ResultCode::Playing).mit_anruf(self.call_state(), Some(self.dauer_ms()));
        self.antworten(antwort);
    }

    fn wiedergabe_beenden(&mut self) {
        self.wiedergabe = None;
        self.audio_auftrag(AudioAuftrag::Stoppen);
    }

    fn audio_auftrag(&self, auftrag: AudioAuftrag) {
        if self.audio.send(auftrag).is_err() {
            tracing::warn!("Audio-Task beendet, Auftrag verworfen");
        }
    }

    fn medien_verwerfen(&self, pfad: PathBuf) {
        let medien = self.medien.clone();
        tokio::spawn(async move { medien.verwerfen(&pfad).await });
    }

    // -----------------------------------------------------------------------
    // Telefonie
    // -----------------------------------------------------------------------

    fn telefonie_signal(&mut self, signal: RawCallSignal) {
        let uebergang = self.tracker.signal(signal);
        match uebergang {
            Some(TrackerUebergang::Klingelt { nummer }) => {
                self.status_aktualisieren();
                self.event(GatewayEreignis::IncomingCall {
                    number: nummer.unwrap_or_default(),
                });
            }
            Some(TrackerUebergang::Verbunden) => {
                self.status_aktualisieren();
                self.event(GatewayEreignis::CallConnected);
            }
            Some(TrackerUebergang::Beendet) => {
                self.wiedergabe_beenden();
                self.status_aktualisieren();
                self.event(GatewayEreignis::CallEnded);
            }
            Some(TrackerUebergang::Waehlt { .. }) | Some(TrackerUebergang::Fehler { .. }) | None => {
                self.status_aktualisieren();
            }
        }
    }

    fn bridge_ereignis(&mut self, ereignis: BridgeEreignis) {
        match ereignis {
            BridgeEreignis::Hinzugefuegt { id, richtung, zustand } => {
                tracing::debug!(call_id = %id, ?richtung, zustand = %zustand, "Anruf-Handle hinzugefuegt");
                self.event(GatewayEreignis::CallStateChanged {
                    call_state: zustand.als_str().to_string(),
                    call_duration_ms: 0,
                });
            }
            BridgeEreignis::ZustandGeaendert {
                zustand, dauer_ms, ..
            } => {
                self.event(GatewayEreignis::CallStateChanged {
                    call_state: zustand.als_str().to_string(),
                    call_duration_ms: dauer_ms,
                });
            }
            BridgeEreignis::Entfernt { id, dauer_ms, grund } => {
                tracing::debug!(call_id = %id, dauer_ms, grund = ?grund, "Anruf-Handle entfernt");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Audio-Task
// ---------------------------------------------------------------------------

/// Arbeitet die Audio-Auftraege nacheinander ab
///
/// Ein Start beginnt erst, wenn der vorige Auftrag vollstaendig erledigt ist;
/// damit gewinnt immer der zuletzt angeforderte Start. Endet die
/// Warteschlange, wird eine laufende Wiedergabe gestoppt.
async fn audio_task(
    injector: Arc<AudioInjector>,
    mut auftraege: mpsc::UnboundedReceiver<AudioAuftrag>,
    eingang: mpsc::UnboundedSender<Eingang>,
) {
    while let Some(auftrag) = auftraege.recv().await {
        match auftrag {
            AudioAuftrag::Abspielen { id, sitzung, pfad } => {
                let tx_ende = eingang.clone();
                let abschluss: Abschluss = Box::new(move |erfolg| {
                    let _ = tx_ende.send(Eingang::WiedergabeBeendet { sitzung, erfolg });
                });
                let gestartet = injector.abspielen(&pfad, abschluss).await;
                let _ = eingang.send(Eingang::WiedergabeGestartet {
                    id,
                    sitzung,
                    gestartet,
                });
            }
            AudioAuftrag::Stoppen => injector.stoppen().await,
            AudioAuftrag::GeraetSetzen { id, card, tx, rx } => {
                let chipset = injector.prober().detector().erkennen().await;
                let antwort = match injector.speicher().manuell_setzen(chipset, card, tx, rx).await {
                    Ok(_) => Antwort::erfolg(id, ResultCode::DeviceConfigured),
                    Err(e) => Antwort::fehler(id, ResultCode::DeviceConfigFailed, e.to_string()),
                };
                let _ = eingang.send(Eingang::Antwort(antwort));
            }
            AudioAuftrag::GeraetZuruecksetzen { id } => {
                injector.prober().detector().invalidieren();
                let antwort = match injector.speicher().loeschen().await {
                    Ok(()) => Antwort::erfolg(id, ResultCode::DeviceReset),
                    Err(e) => Antwort::fehler(id, ResultCode::DeviceConfigFailed, e.to_string()),
                };
                let _ = eingang.send(Eingang::Antwort(antwort));
            }
        }
    }
    injector.stoppen().await;
}

// ---------------------------------------------------------------------------
// Hilfen fuer Tests und Einbettung
// ---------------------------------------------------------------------------

impl GatewayHandle {
    /// Wartet, bis der Status `ziel` erreicht; `false` wenn der Controller endet
    pub async fn warten_auf(&self, ziel: GatewayStatus, zeitlimit: Duration) -> bool {
        let mut rx = self.status.clone();
        tokio::time::timeout(zeitlimit, rx.wait_for(|s| *s == ziel))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}
