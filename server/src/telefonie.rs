//! Shell-Anbindung an das Android-Telefonie-Subsystem
//!
//! Ohne eigene App-Rechte laeuft alles ueber privilegierte Shell-Befehle:
//! - Waehlen: `am start -a android.intent.action.CALL -d tel:<nummer>`
//! - Auflegen/Annehmen/DTMF: `input keyevent <code>`
//! - Zustand: periodisches `dumpsys telephony.registry`
//!
//! Der Beobachter speist die rohen Signale in den Controller ein und haelt
//! fuer den laufenden Anruf ein Handle in der `CallControlBridge`, damit
//! ANSWER, REJECT, HANGUP und SEND_DTMF ein Ziel haben.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callgate_audio::executor::shell_quote;
use callgate_audio::PrivilegierterAusfuehrer;
use callgate_core::types::{CallDetailState, CallDirection, CallId};
use callgate_gateway::GatewayHandle;
use callgate_telephony::{CallControlBridge, CallObject, RawCallSignal, TelephonyError, Waehler};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const REGISTRY_BEFEHL: &str = "dumpsys telephony.registry";

const KEYCODE_CALL: u32 = 5;
const KEYCODE_ENDCALL: u32 = 6;
const KEYCODE_0: u32 = 7;
const KEYCODE_STAR: u32 = 17;
const KEYCODE_POUND: u32 = 18;

// ---------------------------------------------------------------------------
// Waehlen
// ---------------------------------------------------------------------------

/// Waehlt und legt ueber Shell-Befehle auf
pub struct ShellTelefonie {
    ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
}

impl ShellTelefonie {
    pub fn neu(ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>) -> Self {
        Self { ausfuehrer }
    }
}

/// `tel:`-URI mit kodiertem `#`
fn waehl_befehl(nummer: &str) -> String {
    let uri = format!("tel:{}", nummer.replace('#', "%23"));
    format!("am start -a android.intent.action.CALL -d {}", shell_quote(&uri))
}

#[async_trait]
impl Waehler for ShellTelefonie {
    async fn waehlen(&self, nummer: &str) -> Result<(), TelephonyError> {
        let ausgabe = self
            .ausfuehrer
            .ausfuehren(&waehl_befehl(nummer))
            .await
            .map_err(|e| TelephonyError::System(e.to_string()))?;

        let text = format!("{}{}", ausgabe.stdout, ausgabe.stderr);
        if text.contains("SecurityException") || text.contains("Permission Denial") {
            return Err(TelephonyError::System("Berechtigung zum Anrufen fehlt".into()));
        }
        if !ausgabe.erfolgreich() || text.contains("Error:") {
            return Err(TelephonyError::WahlFehlgeschlagen(text.trim().to_string()));
        }
        Ok(())
    }

    async fn auflegen(&self) -> Result<(), TelephonyError> {
        let ausgabe = self
            .ausfuehrer
            .ausfuehren(&format!("input keyevent {KEYCODE_ENDCALL}"))
            .await
            .map_err(|e| TelephonyError::System(e.to_string()))?;
        if ausgabe.erfolgreich() {
            Ok(())
        } else {
            Err(TelephonyError::System(ausgabe.stderr.trim().to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Anruf-Handle
// ---------------------------------------------------------------------------

/// Anruf-Objekt, das nur Tastenereignisse senden kann
struct ShellAnruf {
    ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
}

impl ShellAnruf {
    fn taste(&self, code: u32) {
        let ausfuehrer = self.ausfuehrer.clone();
        tokio::spawn(async move {
            match ausfuehrer.ausfuehren(&format!("input keyevent {code}")).await {
                Ok(ausgabe) if ausgabe.erfolgreich() => {}
                Ok(ausgabe) => {
                    tracing::warn!(code, stderr = %ausgabe.stderr.trim(), "Tastenereignis abgelehnt")
                }
                Err(e) => tracing::warn!(code, fehler = %e, "Tastenereignis fehlgeschlagen"),
            }
        });
    }
}

/// Keycode einer DTMF-Ziffer; A-D haben keine Taste
fn dtmf_keycode(ziffer: char) -> Option<u32> {
    match ziffer {
        '0'..='9' => ziffer.to_digit(10).map(|d| KEYCODE_0 + d),
        '*' => Some(KEYCODE_STAR),
        '#' => Some(KEYCODE_POUND),
        _ => None,
    }
}

impl CallObject for ShellAnruf {
    fn trennen(&self) {
        self.taste(KEYCODE_ENDCALL);
    }

    fn halten(&self) {
        tracing::debug!("Halten per Shell nicht moeglich");
    }

    fn fortsetzen(&self) {
        tracing::debug!("Fortsetzen per Shell nicht moeglich");
    }

    fn annehmen(&self) {
        self.taste(KEYCODE_CALL);
    }

    fn ablehnen(&self) {
        self.taste(KEYCODE_ENDCALL);
    }

    fn dtmf_starten(&self, ziffer: char) {
        match dtmf_keycode(ziffer) {
            Some(code) => self.taste(code),
            None => tracing::debug!(%ziffer, "DTMF-Ziffer ohne Taste"),
        }
    }

    // Ein Tastendruck ist bereits ein vollstaendiger Ton
    fn dtmf_stoppen(&self) {}

    fn kann_halten(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Register-Auswertung
// ---------------------------------------------------------------------------

/// Zustand aus `dumpsys telephony.registry`
///
/// Bei mehreren SIM-Eintraegen gewinnt OFFHOOK vor RINGING vor IDLE.
/// `None` wenn kein `mCallState` gefunden wurde.
pub fn registry_parsen(text: &str) -> Option<RawCallSignal> {
    let mut hoechster: Option<u8> = None;
    let mut nummer: Option<String> = None;

    for zeile in text.lines() {
        let zeile = zeile.trim();
        if let Some(wert) = zeile.strip_prefix("mCallState=") {
            if let Ok(zustand) = wert.trim().parse::<u8>() {
                if zustand <= 2 {
                    hoechster = Some(hoechster.map_or(zustand, |h| h.max(zustand)));
                }
            }
        } else if let Some(wert) = zeile.strip_prefix("mCallIncomingNumber=") {
            let wert = wert.trim();
            if nummer.is_none() && !wert.is_empty() {
                nummer = Some(wert.to_string());
            }
        }
    }

    match hoechster? {
        2 => Some(RawCallSignal::Offhook),
        1 => Some(RawCallSignal::Ringing { nummer }),
        _ => Some(RawCallSignal::Idle),
    }
}

// ---------------------------------------------------------------------------
// Beobachter
// ---------------------------------------------------------------------------

/// Empfaenger der beobachteten Signale
pub trait SignalEmpfaenger: Send + 'static {
    fn signal(&self, signal: RawCallSignal);
    fn fehler(&self, grund: String);
}

impl SignalEmpfaenger for GatewayHandle {
    fn signal(&self, signal: RawCallSignal) {
        self.telefonie_signal(signal);
    }

    fn fehler(&self, grund: String) {
        self.telefonie_fehler(grund);
    }
}

/// Fragt das Telefonie-Register ab und meldet Zustandswechsel
pub struct TelefonieBeobachter<E = GatewayHandle> {
    ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
    handle: E,
    bridge: CallControlBridge,
    intervall: Duration,
    letzter: Option<RawCallSignal>,
    anruf: Option<CallId>,
    fehler_gemeldet: bool,
}

impl<E: SignalEmpfaenger> TelefonieBeobachter<E> {
    pub fn neu(
        ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
        handle: E,
        bridge: CallControlBridge,
        intervall: Duration,
    ) -> Self {
        Self {
            ausfuehrer,
            handle,
            bridge,
            intervall,
            letzter: None,
            anruf: None,
            fehler_gemeldet: false,
        }
    }

    pub fn starten(mut self, abbruch: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut takt = tokio::time::interval(self.intervall);
            takt.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = abbruch.cancelled() => break,
                    _ = takt.tick() => self.abfragen().await,
                }
            }
            if let Some(id) = self.anruf.take() {
                self.bridge.anruf_entfernen(id);
            }
            tracing::debug!("Telefonie-Beobachter beendet");
        })
    }

    async fn abfragen(&mut self) {
        let ausgabe = match self.ausfuehrer.ausfuehren(REGISTRY_BEFEHL).await {
            Ok(a) => a,
            Err(e) => {
                self.fehler(format!("Telefonie-Register nicht lesbar: {e}"));
                return;
            }
        };
        if ausgabe.stdout.contains("Permission Denial") || ausgabe.stderr.contains("Permission Denial") {
            self.fehler("Keine Berechtigung fuer das Telefonie-Register".into());
            return;
        }
        match registry_parsen(&ausgabe.stdout) {
            Some(signal) => {
                self.fehler_gemeldet = false;
                self.verarbeiten(signal);
            }
            None => tracing::debug!("Kein mCallState im Telefonie-Register"),
        }
    }

    /// Meldet einen Fehler nur einmal bis zur naechsten erfolgreichen Abfrage
    fn fehler(&mut self, grund: String) {
        if !self.fehler_gemeldet {
            tracing::warn!(grund = %grund, "Telefonie-Beobachtung gestoert");
            self.handle.fehler(grund);
            self.fehler_gemeldet = true;
        }
    }

    fn verarbeiten(&mut self, signal: RawCallSignal) {
        if self.letzter.as_ref() == Some(&signal) {
            return;
        }
        self.letzter = Some(signal.clone());
        self.handle_nachfuehren(&signal);
        self.handle.signal(signal);
    }

    /// Haelt das Bridge-Handle passend zum groben Zustand
    fn handle_nachfuehren(&mut self, signal: &RawCallSignal) {
        match signal {
            RawCallSignal::Ringing { nummer } => {
                if self.anruf.is_none() {
                    let id = self.bridge.anruf_hinzufuegen(
                        self.anruf_objekt(),
                        nummer.clone(),
                        CallDirection::Incoming,
                        CallDetailState::Ringing,
                    );
                    self.anruf = Some(id);
                }
            }
            RawCallSignal::Offhook => match self.anruf {
                Some(id) => {
                    self.bridge.zustand_aendern(id, CallDetailState::Active);
                }
                None => {
                    let id = self.bridge.anruf_hinzufuegen(
                        self.anruf_objekt(),
                        None,
                        CallDirection::Outgoing,
                        CallDetailState::Active,
                    );
                    self.anruf = Some(id);
                }
            },
            RawCallSignal::Idle => {
                if let Some(id) = self.anruf.take() {
                    self.bridge.zustand_aendern(id, CallDetailState::Disconnected);
                    self.bridge.anruf_entfernen(id);
                }
            }
        }
    }

    fn anruf_objekt(&self) -> Arc<dyn CallObject> {
        Arc::new(ShellAnruf {
            ausfuehrer: self.ausfuehrer.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callgate_audio::{AudioError, AudioResult, BefehlsAusgabe};
    use callgate_telephony::{BridgeEreignis, DtmfTakt};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::process::Child;
    use tokio::sync::mpsc;

    const REGISTRY_KLINGELT: &str = "\
last known state:
  Phone Id=0
  mCallState=1
  mCallIncomingNumber=+4930123
  mServiceState=0
  Phone Id=1
  mCallState=0
  mCallIncomingNumber=
";

    #[test]
    fn registry_klingelnd_mit_nummer() {
        assert_eq!(
            registry_parsen(REGISTRY_KLINGELT),
            Some(RawCallSignal::Ringing {
                nummer: Some("+4930123".into())
            })
        );
    }

    #[test]
    fn registry_offhook_gewinnt() {
        let text = "  mCallState=1\n  mCallState=2\n";
        assert_eq!(registry_parsen(text), Some(RawCallSignal::Offhook));
    }

    #[test]
    fn registry_idle_und_muell() {
        assert_eq!(registry_parsen("  mCallState=0\n"), Some(RawCallSignal::Idle));
        assert_eq!(registry_parsen("nichts hier"), None);
        assert_eq!(registry_parsen("mCallState=x\nmCallState=9"), None);
    }

    #[test]
    fn waehlbefehl_kodiert_raute() {
        assert_eq!(
            waehl_befehl("*31#0800"),
            "am start -a android.intent.action.CALL -d 'tel:*31%230800'"
        );
    }

    #[test]
    fn dtmf_tasten() {
        assert_eq!(dtmf_keycode('0'), Some(7));
        assert_eq!(dtmf_keycode('9'), Some(16));
        assert_eq!(dtmf_keycode('*'), Some(17));
        assert_eq!(dtmf_keycode('#'), Some(18));
        assert_eq!(dtmf_keycode('A'), None);
    }

    struct Aufzeichner {
        befehle: Mutex<Vec<String>>,
        ausgabe: BefehlsAusgabe,
    }

    #[async_trait]
    impl PrivilegierterAusfuehrer for Aufzeichner {
        async fn ausfuehren(&self, befehl: &str) -> AudioResult<BefehlsAusgabe> {
            self.befehle.lock().push(befehl.to_string());
            Ok(self.ausgabe.clone())
        }

        fn starten(&self, _befehl: &str) -> AudioResult<Child> {
            Err(AudioError::Start("nicht unterstuetzt".into()))
        }
    }

    fn aufzeichner(stdout: &str, exit_code: i32) -> Arc<Aufzeichner> {
        Arc::new(Aufzeichner {
            befehle: Mutex::new(Vec::new()),
            ausgabe: BefehlsAusgabe {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: Some(exit_code),
            },
        })
    }

    #[tokio::test]
    async fn waehlen_ueber_am_start() {
        let a = aufzeichner("Starting: Intent { act=android.intent.action.CALL }", 0);
        let telefonie = ShellTelefonie::neu(a.clone());

        telefonie.waehlen("+4930123").await.unwrap();
        assert_eq!(
            a.befehle.lock().as_slice(),
            ["am start -a android.intent.action.CALL -d 'tel:+4930123'"]
        );
    }

    #[tokio::test]
    async fn fehlende_berechtigung_ist_systemfehler() {
        let a = aufzeichner("java.lang.SecurityException: Permission Denial", 0);
        let telefonie = ShellTelefonie::neu(a);
        assert!(matches!(
            telefonie.waehlen("110").await,
            Err(TelephonyError::System(_))
        ));
    }

    #[tokio::test]
    async fn auflegen_per_keyevent() {
        let a = aufzeichner("", 0);
        ShellTelefonie::neu(a.clone()).auflegen().await.unwrap();
        assert_eq!(a.befehle.lock().as_slice(), ["input keyevent 6"]);
    }

    // -----------------------------------------------------------------------
    // Beobachter
    // -----------------------------------------------------------------------

    /// Liefert pro Abfrage die naechste vorbereitete Ausgabe
    #[derive(Default)]
    struct Register {
        antworten: Mutex<VecDeque<AudioResult<BefehlsAusgabe>>>,
    }

    impl Register {
        fn zustand(&self, stdout: &str) {
            self.antworten.lock().push_back(Ok(BefehlsAusgabe {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: Some(0),
            }));
        }

        fn fehler(&self) {
            self.antworten
                .lock()
                .push_back(Err(AudioError::Ausfuehrung("su: not found".into())));
        }
    }

    #[async_trait]
    impl PrivilegierterAusfuehrer for Register {
        async fn ausfuehren(&self, befehl: &str) -> AudioResult<BefehlsAusgabe> {
            assert_eq!(befehl, REGISTRY_BEFEHL);
            self.antworten
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(BefehlsAusgabe::default()))
        }

        fn starten(&self, _befehl: &str) -> AudioResult<Child> {
            Err(AudioError::Start("nicht unterstuetzt".into()))
        }
    }

    #[derive(Clone, Default)]
    struct Mitschrift {
        signale: Arc<Mutex<Vec<RawCallSignal>>>,
        fehler: Arc<Mutex<Vec<String>>>,
    }

    impl SignalEmpfaenger for Mitschrift {
        fn signal(&self, signal: RawCallSignal) {
            self.signale.lock().push(signal);
        }

        fn fehler(&self, grund: String) {
            self.fehler.lock().push(grund);
        }
    }

    struct Beobachtung {
        register: Arc<Register>,
        mitschrift: Mitschrift,
        bridge: CallControlBridge,
        ereignisse: mpsc::UnboundedReceiver<BridgeEreignis>,
        beobachter: TelefonieBeobachter<Mitschrift>,
    }

    impl Beobachtung {
        fn neu() -> Self {
            let register = Arc::new(Register::default());
            let mitschrift = Mitschrift::default();
            let (bridge, ereignisse) = CallControlBridge::neu(DtmfTakt::default());
            let beobachter = TelefonieBeobachter::neu(
                register.clone(),
                mitschrift.clone(),
                bridge.clone(),
                Duration::from_secs(1),
            );
            Self {
                register,
                mitschrift,
                bridge,
                ereignisse,
                beobachter,
            }
        }

        async fn zustand(&mut self, stdout: &str) {
            self.register.zustand(stdout);
            self.beobachter.abfragen().await;
        }

        fn ereignisse(&mut self) -> Vec<BridgeEreignis> {
            let mut alle = Vec::new();
            while let Ok(e) = self.ereignisse.try_recv() {
                alle.push(e);
            }
            alle
        }
    }

    #[tokio::test]
    async fn klingeln_legt_eingehendes_handle_an() {
        let mut b = Beobachtung::neu();
        b.zustand(REGISTRY_KLINGELT).await;

        let anruf = b.bridge.aktiver_anruf().unwrap();
        assert_eq!(anruf.zustand, CallDetailState::Ringing);
        assert_eq!(anruf.richtung, CallDirection::Incoming);
        assert_eq!(anruf.adresse.as_deref(), Some("+4930123"));
        assert_eq!(
            b.mitschrift.signale.lock().as_slice(),
            [RawCallSignal::Ringing {
                nummer: Some("+4930123".into())
            }]
        );
        assert!(matches!(
            b.ereignisse().as_slice(),
            [BridgeEreignis::Hinzugefuegt {
                zustand: CallDetailState::Ringing,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn offhook_aktiviert_und_idle_entfernt() {
        let mut b = Beobachtung::neu();
        b.zustand(REGISTRY_KLINGELT).await;
        let id = b.bridge.aktiver_anruf().unwrap().id;

        b.zustand("  mCallState=2\n").await;
        let anruf = b.bridge.anruf(id).unwrap();
        assert_eq!(anruf.zustand, CallDetailState::Active);

        b.zustand("  mCallState=0\n").await;
        assert!(b.bridge.anruf(id).is_none());
        assert!(b.bridge.aktiver_anruf().is_none());

        let ereignisse = b.ereignisse();
        assert!(matches!(
            ereignisse.as_slice(),
            [
                BridgeEreignis::Hinzugefuegt { .. },
                BridgeEreignis::ZustandGeaendert {
                    zustand: CallDetailState::Active,
                    ..
                },
                BridgeEreignis::ZustandGeaendert {
                    zustand: CallDetailState::Disconnected,
                    ..
                },
                BridgeEreignis::Entfernt { .. },
            ]
        ));
        assert_eq!(
            b.mitschrift.signale.lock()[1..],
            [RawCallSignal::Offhook, RawCallSignal::Idle]
        );
    }

    #[tokio::test]
    async fn offhook_ohne_klingeln_ist_ausgehend() {
        let mut b = Beobachtung::neu();
        b.zustand("  mCallState=2\n").await;

        let anruf = b.bridge.aktiver_anruf().unwrap();
        assert_eq!(anruf.richtung, CallDirection::Outgoing);
        assert_eq!(anruf.zustand, CallDetailState::Active);
    }

    #[tokio::test]
    async fn wiederholter_zustand_ohne_doppelte_meldung() {
        let mut b = Beobachtung::neu();
        b.zustand(REGISTRY_KLINGELT).await;
        b.zustand(REGISTRY_KLINGELT).await;
        b.zustand("  mCallState=0\n").await;
        b.zustand("  mCallState=0\n").await;

        assert_eq!(b.mitschrift.signale.lock().len(), 2);
        assert_eq!(b.ereignisse().len(), 3);
    }

    #[tokio::test]
    async fn fehler_wird_einmal_gemeldet() {
        let mut b = Beobachtung::neu();
        b.register.fehler();
        b.beobachter.abfragen().await;
        b.register.fehler();
        b.beobachter.abfragen().await;
        b.zustand("Permission Denial: can't dump telephony.registry").await;
        assert_eq!(b.mitschrift.fehler.lock().len(), 1);

        // Nach einer gueltigen Abfrage wird ein neuer Fehler wieder gemeldet
        b.zustand("  mCallState=0\n").await;
        b.register.fehler();
        b.beobachter.abfragen().await;
        assert_eq!(b.mitschrift.fehler.lock().len(), 2);
        assert_eq!(b.mitschrift.signale.lock().len(), 1);
    }

    #[tokio::test]
    async fn ausgabe_ohne_zustand_wird_ignoriert() {
        let mut b = Beobachtung::neu();
        b.zustand("Can't find service: telephony.registry").await;
        assert!(b.mitschrift.signale.lock().is_empty());
        assert!(b.mitschrift.fehler.lock().is_empty());
    }
}
