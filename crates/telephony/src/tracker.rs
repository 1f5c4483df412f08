//! CallStateTracker – grober Anrufzustand aus dem rohen Signalstrom
//!
//! Uebergaenge:
//! - IDLE -> DIALING (lokal gewaehlt)
//! - * -> OFFHOOK (verbunden), * -> RINGING (eingehend)
//! - * -> IDLE (beendet), * -> ERROR (Berechtigung/System)
//!
//! Manche Hardware meldet beim Aufbau kurz DIALING -> IDLE -> OFFHOOK. Ein
//! IDLE zaehlt deshalb erst als Ende, wenn seit dem letzten Waehlen OFFHOOK
//! erreicht wurde, kein Waehlen mehr aussteht oder das Wahl-Zeitlimit
//! abgelaufen ist.

use std::time::Duration;

use callgate_core::types::CallState;
use tokio::time::Instant;

use crate::dialer::{nummer_bereinigen, Waehler};
use crate::error::TelephonyError;

/// Rohes Signal des Telefonie-Subsystems
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCallSignal {
    Idle,
    Ringing { nummer: Option<String> },
    Offhook,
}

/// Nach aussen relevante Zustandswechsel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUebergang {
    Waehlt { nummer: String },
    Klingelt { nummer: Option<String> },
    Verbunden,
    Beendet,
    Fehler { grund: String },
}

/// Ausstehender lokaler Waehlvorgang
#[derive(Debug, Clone, Copy)]
struct Wahl {
    seit: Instant,
    offhook_erreicht: bool,
}

pub struct CallStateTracker {
    zustand: CallState,
    wahl: Option<Wahl>,
    wahl_timeout: Duration,
}

impl CallStateTracker {
    pub fn neu(wahl_timeout: Duration) -> Self {
        Self {
            zustand: CallState::Idle,
            wahl: None,
            wahl_timeout,
        }
    }

    pub fn zustand(&self) -> CallState {
        self.zustand
    }

    /// Steht ein lokales Waehlen aus, das OFFHOOK noch nicht erreicht hat?
    pub fn wahl_ausstehend(&self) -> bool {
        self.wahl
            .map(|w| !w.offhook_erreicht && w.seit.elapsed() < self.wahl_timeout)
            .unwrap_or(false)
    }

    /// Bereinigt die Nummer und waehlt ueber das Betriebssystem
    ///
    /// Eine leere Nummer nach der Bereinigung ist ein Fehler ohne
    /// Plattform-Aufruf. Schlaegt der Plattform-Aufruf fehl, wechselt der
    /// Tracker nach ERROR.
    pub async fn waehlen(
        &mut self,
        waehler: &dyn Waehler,
        nummer: &str,
    ) -> Result<TrackerUebergang, TelephonyError> {
        let bereinigt = self.wahl_vorbereiten(nummer)?;
        let ergebnis = waehler.waehlen(&bereinigt).await;
        self.wahl_abschliessen(bereinigt, ergebnis)
    }

    /// Erster Teil von `waehlen`: Nummer pruefen und nach DIALING wechseln
    ///
    /// Gibt die bereinigte Nummer fuer den Plattform-Aufruf zurueck.
    pub fn wahl_vorbereiten(&mut self, nummer: &str) -> Result<String, TelephonyError> {
        let bereinigt = nummer_bereinigen(nummer);
        if bereinigt.is_empty() {
            return Err(TelephonyError::UngueltigeNummer(nummer.to_string()));
        }

        tracing::debug!(vorher = %self.zustand, "Waehlen vorbereitet");
        self.zustand = CallState::Dialing;
        self.wahl = Some(Wahl {
            seit: Instant::now(),
            offhook_erreicht: false,
        });
        Ok(bereinigt)
    }

    /// Zweiter Teil von `waehlen`: Ergebnis des Plattform-Aufrufs uebernehmen
    pub fn wahl_abschliessen(
        &mut self,
        nummer: String,
        ergebnis: Result<(), TelephonyError>,
    ) -> Result<TrackerUebergang, TelephonyError> {
        match ergebnis {
            Ok(()) => {
                tracing::info!(nummer = %nummer, "Waehlen gestartet");
                Ok(TrackerUebergang::Waehlt { nummer })
            }
            Err(e) => {
                self.fehler(e.to_string());
                Err(e)
            }
        }
    }

    /// Verarbeitet ein rohes Signal; `None` wenn nichts nach aussen zu melden ist
    pub fn signal(&mut self, signal: RawCallSignal) -> Option<TrackerUebergang> {
        match signal {
            RawCallSignal::Offhook => {
                if let Some(wahl) = self.wahl.as_mut() {
                    wahl.offhook_erreicht = true;
                }
                self.wechseln(CallState::Offhook)
                    .then_some(TrackerUebergang::Verbunden)
            }
            RawCallSignal::Ringing { nummer } => self
                .wechseln(CallState::Ringing)
                .then_some(TrackerUebergang::Klingelt { nummer }),
            RawCallSignal::Idle => self.idle(),
        }
    }

    /// Beliebiger Zustand -> ERROR
    pub fn fehler(&mut self, grund: impl Into<String>) -> TrackerUebergang {
        let grund = grund.into();
        tracing::warn!(grund = %grund, vorher = %self.zustand, "Telefonie-Fehler");
        self.zustand = CallState::Error;
        self.wahl = None;
        TrackerUebergang::Fehler { grund }
    }

    /// ERROR nach dem Melden verlassen
    pub fn zuruecksetzen(&mut self) {
        if self.zustand == CallState::Error {
            self.zustand = CallState::Idle;
        }
    }

    fn idle(&mut self) -> Option<TrackerUebergang> {
        if self.zustand == CallState::Idle {
            return None;
        }

        if self.zustand == CallState::Dialing && self.wahl_ausstehend() {
            tracing::info!("IDLE waehrend des Verbindungsaufbaus ignoriert");
            return None;
        }

        let vorher = self.zustand;
        self.zustand = CallState::Idle;
        self.wahl = None;
        // Aus ERROR heraus gibt es keinen Anruf, der enden koennte
        (vorher != CallState::Error).then_some(TrackerUebergang::Beendet)
    }

    fn wechseln(&mut self, neu: CallState) -> bool {
        if self.zustand == neu {
            return false;
        }
        tracing::debug!(von = %self.zustand, nach = %neu, "Anrufzustand");
        self.zustand = neu;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
