//! CallControlBridge – Register der lebenden Anruf-Handles
//!
//! Jedes Handle meldet Hinzufuegen, Zustandswechsel und Entfernen. Der
//! aktive Anruf ist das zuletzt registrierte Handle, das nicht
//! DISCONNECTED ist. Alle Steueroperationen liefern `bool`: `false` heisst
//! "kein passender Anruf oder Faehigkeit fehlt".
//!
//! Thread-safe durch DashMap; Steueroperationen laufen zusaetzlich unter
//! einer gemeinsamen Sperre, damit hoechstens eine Anruf-Mutation
//! gleichzeitig stattfindet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callgate_core::types::{CallDetailState, CallDirection, CallId};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dtmf::{gueltige_ziffern, ist_dtmf_zeichen, DtmfTakt};

// ---------------------------------------------------------------------------
// CallObject
// ---------------------------------------------------------------------------

/// Steuerbares Anruf-Objekt des Betriebssystems
///
/// Die Methoden stossen die Aktion nur an; das Ergebnis kommt als
/// Zustandswechsel ueber `CallControlBridge::zustand_aendern` zurueck.
pub trait CallObject: Send + Sync {
    fn trennen(&self);
    fn halten(&self);
    fn fortsetzen(&self);
    fn annehmen(&self);
    fn ablehnen(&self);
    fn dtmf_starten(&self, ziffer: char);
    fn dtmf_stoppen(&self);

    /// Unterstuetzt das Netz/Objekt Halten?
    fn kann_halten(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// CallHandleInfo
// ---------------------------------------------------------------------------

/// Schnappschuss eines registrierten Anrufs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandleInfo {
    pub id: CallId,
    /// Gegenstelle (Rufnummer), falls bekannt
    pub adresse: Option<String>,
    pub richtung: CallDirection,
    pub zustand: CallDetailState,
    /// Zeitpunkt des ersten ACTIVE
    pub verbunden_seit: Option<Instant>,
    pub trennungsgrund: Option<String>,
    pub trennungscode: Option<i32>,
}

impl CallHandleInfo {
    pub fn dauer(&self) -> Duration {
        self.verbunden_seit
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

/// Meldungen an den Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEreignis {
    Hinzugefuegt {
        id: CallId,
        richtung: CallDirection,
        zustand: CallDetailState,
    },
    ZustandGeaendert {
        id: CallId,
        zustand: CallDetailState,
        dauer_ms: u64,
    },
    Entfernt {
        id: CallId,
        dauer_ms: u64,
        grund: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// CallControlBridge
// ---------------------------------------------------------------------------

struct AnrufEintrag {
    /// Registrierungsreihenfolge
    seq: u64,
    info: CallHandleInfo,
    objekt: Arc<dyn CallObject>,
    /// Bricht alle geplanten DTMF-Aktionen dieses Anrufs ab
    dtmf_abbruch: CancellationToken,
    /// Ab hier ist das DTMF-Raster wieder frei
    dtmf_frei_ab: Instant,
}

struct BridgeInner {
    anrufe: DashMap<CallId, AnrufEintrag>,
    naechste_seq: AtomicU64,
    steuerung: Mutex<()>,
    letzte_dauer: Mutex<Option<Duration>>,
    ereignisse: mpsc::UnboundedSender<BridgeEreignis>,
    takt: DtmfTakt,
}

#[derive(Clone)]
pub struct CallControlBridge {
    inner: Arc<BridgeInner>,
}

impl CallControlBridge {
    /// Erstellt ein leeres Register und den Empfaenger seiner Meldungen
    pub fn neu(takt: DtmfTakt) -> (Self, mpsc::UnboundedReceiver<BridgeEreignis>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            inner: Arc::new(BridgeInner {
                anrufe: DashMap::new(),
                naechste_seq: AtomicU64::new(1),
                steuerung: Mutex::new(()),
                letzte_dauer: Mutex::new(None),
                ereignisse: tx,
                takt,
            }),
        };
        (bridge, rx)
    }

    // -- Registrierung ----------------------------------------------------

    /// Registriert ein neues Anruf-Objekt
    pub fn anruf_hinzufuegen(
        &self,
        objekt: Arc<dyn CallObject>,
        adresse: Option<String>,
        richtung: CallDirection,
        zustand: CallDetailState,
    ) -> CallId {
        let id = CallId::new();
        let seq = self.inner.naechste_seq.fetch_add(1, Ordering::SeqCst);
        let verbunden_seit = (zustand == CallDetailState::Active).then(Instant::now);

        // Ein neuer Anruf ersetzt die gemerkte Dauer des vorherigen
        *self.inner.letzte_dauer.lock() = None;

        self.inner.anrufe.insert(
            id,
            AnrufEintrag {
                seq,
                info: CallHandleInfo {
                    id,
                    adresse,
                    richtung,
                    zustand,
                    verbunden_seit,
                    trennungsgrund: None,
                    trennungscode: None,
                },
                objekt,
                dtmf_abbruch: CancellationToken::new(),
                dtmf_frei_ab: Instant::now(),
            },
        );
        tracing::info!(call_id = %id, ?richtung, zustand = %zustand, "Anruf registriert");
        self.melden(BridgeEreignis::Hinzugefuegt {
            id,
            richtung,
            zustand,
        });
        id
    }

    /// Uebernimmt einen Zustandswechsel des Anruf-Objekts
    pub fn zustand_aendern(&self, id: CallId, zustand: CallDetailState) -> bool {
        let ereignis = {
            let Some(mut eintrag) = self.inner.anrufe.get_mut(&id) else {
                return false;
            };
            if eintrag.info.zustand == zustand {
                return true;
            }
            eintrag.info.zustand = zustand;
            if zustand == CallDetailState::Active && eintrag.info.verbunden_seit.is_none() {
                eintrag.info.verbunden_seit = Some(Instant::now());
            }
            if zustand.ist_beendet() {
                eintrag.dtmf_abbruch.cancel();
            }
            BridgeEreignis::ZustandGeaendert {
                id,
                zustand,
                dauer_ms: millis(eintrag.info.dauer()),
            }
        };
        tracing::debug!(call_id = %id, zustand = %zustand, "Anrufzustand geaendert");
        self.melden(ereignis);
        true
    }

    /// Merkt sich Ursache und Code der Trennung
    pub fn trennung_melden(&self, id: CallId, grund: impl Into<String>, code: i32) {
        if let Some(mut eintrag) = self.inner.anrufe.get_mut(&id) {
            eintrag.info.trennungsgrund = Some(grund.into());
            eintrag.info.trennungscode = Some(code);
        }
    }

    /// Entfernt ein Handle und bricht seine geplanten DTMF-Aktionen ab
    pub fn anruf_entfernen(&self, id: CallId) -> Option<CallHandleInfo> {
        let (_, eintrag) = self.inner.anrufe.remove(&id)?;
        eintrag.dtmf_abbruch.cancel();

        let dauer = eintrag.info.dauer();
        *self.inner.letzte_dauer.lock() = Some(dauer);

        tracing::info!(
            call_id = %id,
            dauer_ms = millis(dauer),
            grund = ?eintrag.info.trennungsgrund,
            code = ?eintrag.info.trennungscode,
            "Anruf entfernt"
        );
        self.melden(BridgeEreignis::Entfernt {
            id,
            dauer_ms: millis(dauer),
            grund: eintrag.info.trennungsgrund.clone(),
        });
        Some(eintrag.info)
    }

    // -- Abfragen ---------------------------------------------------------

    /// Zuletzt registriertes Handle, das nicht DISCONNECTED ist
    pub fn aktiver_anruf(&self) -> Option<CallHandleInfo> {
        self.aktiver_eintrag().map(|(info, _)| info)
    }

    pub fn anruf(&self, id: CallId) -> Option<CallHandleInfo> {
        self.inner.anrufe.get(&id).map(|e| e.info.clone())
    }

    /// Anzahl der nicht beendeten Anrufe
    pub fn anzahl_aktiv(&self) -> usize {
        self.inner
            .anrufe
            .iter()
            .filter(|e| !e.info.zustand.ist_beendet())
            .count()
    }

    /// Dauer des aktiven Anrufs oder die zuletzt bekannte Dauer
    pub fn dauer(&self) -> Duration {
        match self.aktiver_anruf() {
            Some(info) => info.dauer(),
            None => self.inner.letzte_dauer.lock().unwrap_or_default(),
        }
    }

    // -- Steuerung --------------------------------------------------------

    pub fn auflegen(&self) -> bool {
        let _sperre = self.inner.steuerung.lock();
        let Some((info, objekt)) = self.aktiver_eintrag() else {
            return false;
        };
        tracing::info!(call_id = %info.id, "Auflegen");
        objekt.trennen();
        true
    }

    pub fn halten(&self) -> bool {
        let _sperre = self.inner.steuerung.lock();
        let Some((info, objekt)) = self.aktiver_eintrag() else {
            return false;
        };
        if !info.zustand.erlaubt_halten() || !objekt.kann_halten() {
            tracing::debug!(call_id = %info.id, zustand = %info.zustand, "Halten nicht moeglich");
            return false;
        }
        objekt.halten();
        true
    }

    pub fn fortsetzen(&self) -> bool {
        let _sperre = self.inner.steuerung.lock();
        let Some((info, objekt)) = self.aktiver_eintrag() else {
            return false;
        };
        if !info.zustand.erlaubt_fortsetzen() {
            return false;
        }
        objekt.fortsetzen();
        true
    }

    /// Nimmt den zuletzt registrierten klingelnden Anruf an
    pub fn annehmen(&self) -> bool {
        let _sperre = self.inner.steuerung.lock();
        let Some((info, objekt)) = self.klingelnder_eintrag() else {
            return false;
        };
        tracing::info!(call_id = %info.id, "Anruf annehmen");
        objekt.annehmen();
        true
    }

    pub fn ablehnen(&self) -> bool {
        let _sperre = self.inner.steuerung.lock();
        let Some((info, objekt)) = self.klingelnder_eintrag() else {
            return false;
        };
        tracing::info!(call_id = %info.id, "Anruf ablehnen");
        objekt.ablehnen();
        true
    }

    pub fn dtmf_senden(&self, ziffer: char) -> bool {
        ist_dtmf_zeichen(ziffer) && self.dtmf_folge_senden(ziffer.encode_utf8(&mut [0; 4]))
    }

    /// Plant eine DTMF-Folge auf dem aktiven Anruf
    ///
    /// Ungueltige Zeichen werden uebersprungen, ohne eine Luecke im Raster zu
    /// erzeugen. Folgen reihen sich hinter noch laufende Folgen ein.
    pub fn dtmf_folge_senden(&self, folge: &str) -> bool {
        let ziffern = gueltige_ziffern(folge);
        if ziffern.is_empty() {
            tracing::debug!(folge, "Keine gueltigen DTMF-Ziffern");
            return false;
        }

        let _sperre = self.inner.steuerung.lock();
        let Some((info, _)) = self.aktiver_eintrag() else {
            return false;
        };
        let takt = self.inner.takt;

        let (objekt, abbruch, start) = {
            let Some(mut eintrag) = self.inner.anrufe.get_mut(&info.id) else {
                return false;
            };
            if !eintrag.info.zustand.erlaubt_dtmf() {
                tracing::debug!(call_id = %info.id, zustand = %eintrag.info.zustand, "DTMF nicht moeglich");
                return false;
            }
            let start = eintrag.dtmf_frei_ab.max(Instant::now());
            eintrag.dtmf_frei_ab = start + takt.dauer(ziffern.len());
            (eintrag.objekt.clone(), eintrag.dtmf_abbruch.clone(), start)
        };

        tracing::info!(call_id = %info.id, anzahl = ziffern.len(), "DTMF-Folge geplant");
        tokio::spawn(dtmf_abspielen(objekt, abbruch, ziffern, start, takt));
        true
    }

    // -- Intern -----------------------------------------------------------

    fn aktiver_eintrag(&self) -> Option<(CallHandleInfo, Arc<dyn CallObject>)> {
        self.neuester(|z| !z.ist_beendet())
    }

    fn klingelnder_eintrag(&self) -> Option<(CallHandleInfo, Arc<dyn CallObject>)> {
        self.neuester(|z| z.erlaubt_annehmen())
    }

    fn neuester(
        &self,
        filter: impl Fn(&CallDetailState) -> bool,
    ) -> Option<(CallHandleInfo, Arc<dyn CallObject>)> {
        self.inner
            .anrufe
            .iter()
            .filter(|e| filter(&e.info.zustand))
            .max_by_key(|e| e.seq)
            .map(|e| (e.info.clone(), e.objekt.clone()))
    }

    fn melden(&self, ereignis: BridgeEreignis) {
        if self.inner.ereignisse.send(ereignis).is_err() {
            tracing::trace!("Kein Empfaenger fuer Anruf-Meldungen");
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Spielt jede Ziffer als Ton-Start/Ton-Stopp-Paar im festen Raster
async fn dtmf_abspielen(
    objekt: Arc<dyn CallObject>,
    abbruch: CancellationToken,
    ziffern: Vec<char>,
    start: Instant,
    takt: DtmfTakt,
) {
    for (k, ziffer) in ziffern.into_iter().enumerate() {
        let beginn = start + takt.versatz(k);
        tokio::select! {
            _ = abbruch.cancelled() => return,
            _ = tokio::time::sleep_until(beginn) => {}
        }
        objekt.dtmf_starten(ziffer);

        tokio::select! {
            _ = abbruch.cancelled() => return,
            _ = tokio::time::sleep_until(beginn + takt.ton) => {}
        }
        objekt.dtmf_stoppen();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
