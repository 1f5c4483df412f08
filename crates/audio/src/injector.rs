//! AudioInjector – genau eine Wiedergabe-Sitzung zur Zeit
//!
//! Jede Sitzung besteht aus dem Hilfsprozess, einem Abbruch-Token und einem
//! Waechter-Task, der auf das Prozessende wartet und den Abschluss-Callback
//! genau einmal aufruft. Ein neuer Start beendet die laufende Sitzung
//! vollstaendig, bevor der naechste Prozess gestartet wird.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device_config::DeviceConfigStore;
use crate::executor::{shell_quote, PrivilegierterAusfuehrer};
use crate::helper::HelferAufloeser;
use crate::prober::DeviceProber;

/// Abschluss-Callback: `true` genau dann, wenn der Prozess mit 0 endete
pub type Abschluss = Box<dyn FnOnce(bool) + Send + 'static>;

/// Maximale Wartezeit auf das Ende der stderr-Pipe nach Prozessende
const STDERR_NACHLAUF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Sitzung
// ---------------------------------------------------------------------------

struct Sitzung {
    id: u64,
    quelle: PathBuf,
    abbruch: CancellationToken,
    waechter: JoinHandle<()>,
}

#[derive(Default)]
struct Zustand {
    sitzung: Mutex<Option<Sitzung>>,
    spielt: AtomicBool,
}

impl Zustand {
    /// Nimmt die laufende Sitzung heraus und bricht sie ab
    ///
    /// `spielt` bleibt gesetzt, bis der Waechter den Prozess beendet hat.
    fn abbrechen(&self) -> Option<Sitzung> {
        let sitzung = self.sitzung.lock().take();
        if let Some(s) = &sitzung {
            s.abbruch.cancel();
            tracing::info!(sitzung = s.id, quelle = %s.quelle.display(), "Wiedergabe abgebrochen");
        }
        sitzung
    }

    /// Gibt die Sitzung frei, falls sie noch die aktuelle ist
    fn freigeben(&self, id: u64) {
        let mut sitzung = self.sitzung.lock();
        if sitzung.as_ref().map(|s| s.id) == Some(id) {
            *sitzung = None;
            self.spielt.store(false, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// AudioInjector
// ---------------------------------------------------------------------------

pub struct AudioInjector {
    ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
    prober: Arc<DeviceProber>,
    speicher: Arc<DeviceConfigStore>,
    helfer: HelferAufloeser,
    zustand: Arc<Zustand>,
    /// Serialisiert Starts und Stopps; ein Start beginnt erst, wenn der
    /// vorige Prozess beendet ist
    start_sperre: tokio::sync::Mutex<()>,
    naechste_id: AtomicU64,
}

impl AudioInjector {
    pub fn neu(
        ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
        prober: Arc<DeviceProber>,
        speicher: Arc<DeviceConfigStore>,
        helfer: HelferAufloeser,
    ) -> Self {
        Self {
            ausfuehrer,
            prober,
            speicher,
            helfer,
            zustand: Arc::new(Zustand::default()),
            start_sperre: tokio::sync::Mutex::new(()),
            naechste_id: AtomicU64::new(1),
        }
    }

    pub fn speicher(&self) -> &DeviceConfigStore {
        &self.speicher
    }

    pub fn prober(&self) -> &DeviceProber {
        &self.prober
    }

    /// Laeuft gerade ein Wiedergabe-Prozess?
    pub fn spielt(&self) -> bool {
        self.zustand.spielt.load(Ordering::SeqCst)
    }

    /// Startet die Einspielung von `quelle`
    ///
    /// Gibt zurueck, ob der Prozess gestartet wurde. Das Ergebnis der
    /// Wiedergabe kommt ueber `abschluss`; auch abgelehnte Starts rufen
    /// `abschluss(false)` auf.
    pub async fn abspielen(&self, quelle: &Path, abschluss: Abschluss) -> bool {
        let _start = self.start_sperre.lock().await;

        self.laufende_beenden().await;

        if !quelle.is_file() {
            tracing::warn!(quelle = %quelle.display(), "Audio-Quelle nicht gefunden");
            abschluss(false);
            return false;
        }

        let Some(helfer) = self.helfer.aufloesen() else {
            tracing::warn!("Wiedergabe-Hilfsprogramm nicht gefunden");
            abschluss(false);
            return false;
        };

        let config = self.speicher.aufloesen(&self.prober).await;
        if !config.hat_tx() {
            tracing::warn!(chipset = %config.chipset, "Kein TX-Geraet zugeordnet");
            abschluss(false);
            return false;
        }

        let befehl = wiedergabe_befehl(&helfer, quelle, config.card, config.tx);
        let mut kind = match self.ausfuehrer.starten(&befehl) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::error!(fehler = %e, "Wiedergabe-Prozess nicht gestartet");
                abschluss(false);
                return false;
            }
        };
        let stderr = kind.stderr.take();

        let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
        let abbruch = CancellationToken::new();
        let ueberwachung = Ueberwachung {
            id,
            abbruch: abbruch.clone(),
            zustand: self.zustand.clone(),
            ausfuehrer: self.ausfuehrer.clone(),
            befehlszeile: befehlszeile(&helfer, quelle, config.card, config.tx),
        };

        // Sitzung unter der Sperre eintragen, bevor der Waechter sie freigeben kann
        let mut sitzung = self.zustand.sitzung.lock();
        self.zustand.spielt.store(true, Ordering::SeqCst);
        let waechter = tokio::spawn(ueberwachung.laufen(kind, stderr, abschluss));
        *sitzung = Some(Sitzung {
            id,
            quelle: quelle.to_path_buf(),
            abbruch,
            waechter,
        });
        drop(sitzung);

        tracing::info!(
            sitzung = id,
            quelle = %quelle.display(),
            card = config.card,
            tx = config.tx,
            "Wiedergabe gestartet"
        );
        true
    }

    /// Bricht eine laufende Wiedergabe ab und wartet, bis der Prozess beendet
    /// ist; im Leerlauf ohne Wirkung
    pub async fn stoppen(&self) {
        let _start = self.start_sperre.lock().await;
        self.laufende_beenden().await;
    }

    /// Nur unter `start_sperre` aufrufen
    async fn laufende_beenden(&self) {
        let Some(alt) = self.zustand.abbrechen() else {
            return;
        };
        if let Err(e) = alt.waechter.await {
            tracing::warn!(sitzung = alt.id, fehler = %e, "Waechter-Task abgebrochen");
        }
        self.zustand.spielt.store(false, Ordering::SeqCst);
    }
}

impl Drop for AudioInjector {
    fn drop(&mut self) {
        // Der Waechter beendet den Prozess ohne Warten des Aufrufers
        self.zustand.abbrechen();
    }
}

/// `exec` ersetzt die Shell, damit ein Kill den Hilfsprozess selbst trifft
pub fn wiedergabe_befehl(helfer: &Path, quelle: &Path, card: i32, device: i32) -> String {
    format!(
        "exec {} {} -D {card} -d {device}",
        shell_quote(&helfer.to_string_lossy()),
        shell_quote(&quelle.to_string_lossy()),
    )
}

/// Kommandozeile des Hilfsprozesses, wie sie in der Prozessliste steht
fn befehlszeile(helfer: &Path, quelle: &Path, card: i32, device: i32) -> String {
    format!(
        "{} {} -D {card} -d {device}",
        helfer.to_string_lossy(),
        quelle.to_string_lossy()
    )
}

/// Maskiert Regex-Sonderzeichen fuer `pkill -f -x`
fn regex_maskieren(text: &str) -> String {
    let mut aus = String::with_capacity(text.len());
    for c in text.chars() {
        if r"\.^$*+?()[]{}|".contains(c) {
            aus.push('\\');
        }
        aus.push(c);
    }
    aus
}

/// Beendet genau die Prozesse mit der Kommandozeile dieser Sitzung
fn kill_befehl(befehlszeile: &str) -> String {
    format!("pkill -f -x {}", shell_quote(&regex_maskieren(befehlszeile)))
}

// ---------------------------------------------------------------------------
// Waechter
// ---------------------------------------------------------------------------

struct Ueberwachung {
    id: u64,
    abbruch: CancellationToken,
    zustand: Arc<Zustand>,
    ausfuehrer: Arc<dyn PrivilegierterAusfuehrer>,
    befehlszeile: String,
}

impl Ueberwachung {
    async fn laufen(self, mut kind: Child, stderr: Option<ChildStderr>, abschluss: Abschluss) {
        let stderr_task = stderr.map(|s| tokio::spawn(stderr_protokollieren(self.id, s)));

        let erfolg = tokio::select! {
            status = kind.wait() => match status {
                Ok(status) => {
                    tracing::debug!(sitzung = self.id, code = ?status.code(), "Wiedergabe-Prozess beendet");
                    status.success()
                }
                Err(e) => {
                    tracing::warn!(sitzung = self.id, fehler = %e, "Warten auf Wiedergabe-Prozess fehlgeschlagen");
                    false
                }
            },
            _ = self.abbruch.cancelled() => {
                self.beenden(&mut kind).await;
                false
            }
        };

        if let Some(task) = stderr_task {
            if tokio::time::timeout(STDERR_NACHLAUF, task).await.is_err() {
                tracing::debug!(sitzung = self.id, "stderr-Pipe nicht geschlossen");
            }
        }

        self.zustand.freigeben(self.id);
        abschluss(erfolg);
    }

    async fn beenden(&self, kind: &mut Child) {
        if let Err(e) = kind.start_kill() {
            tracing::debug!(sitzung = self.id, fehler = %e, "Kill nicht zugestellt");
        }
        let _ = kind.wait().await;

        // Der Hilfsprozess kann den su-Wrapper ueberleben
        if let Err(e) = self.ausfuehrer.ausfuehren(&kill_befehl(&self.befehlszeile)).await {
            tracing::debug!(sitzung = self.id, fehler = %e, "pkill fehlgeschlagen");
        }
    }
}

async fn stderr_protokollieren(sitzung: u64, stderr: ChildStderr) {
    let mut zeilen = BufReader::new(stderr).lines();
    while let Ok(Some(zeile)) = zeilen.next_line().await {
        let zeile = zeile.trim();
        if !zeile.is_empty() {
            tracing::warn!(sitzung, zeile, "Wiedergabe-Prozess meldet");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chipset::{ChipsetDetector, PlattformQuelle};
    use crate::error::{AudioError, AudioResult};
    use crate::executor::BefehlsAusgabe;
    use async_trait::async_trait;
    use callgate_core::types::ChipsetFamily;
    use std::process::Stdio;
    use tokio::process::Command;
    use tokio::sync::oneshot;

    /// Startet statt des echten Befehls ein festes Shell-Skript
    struct SkriptAusfuehrer {
        skript: Option<&'static str>,
        befehle: Mutex<Vec<String>>,
    }

    impl SkriptAusfuehrer {
        fn neu(skript: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                skript,
                befehle: Mutex::new(Vec::new()),
            })
        }

        fn befehle(&self) -> Vec<String> {
            self.befehle.lock().clone()
        }
    }

    #[async_trait]
    impl PrivilegierterAusfuehrer for SkriptAusfuehrer {
        async fn ausfuehren(&self, befehl: &str) -> AudioResult<BefehlsAusgabe> {
            self.befehle.lock().push(befehl.to_string());
            Ok(BefehlsAusgabe {
                exit_code: Some(0),
                ..Default::default()
            })
        }

        fn starten(&self, befehl: &str) -> AudioResult<Child> {
            self.befehle.lock().push(befehl.to_string());
            let skript = self
                .skript
                .ok_or_else(|| AudioError::Start("kein root".into()))?;
            Command::new("sh")
                .arg("-c")
                .arg(skript)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AudioError::Start(e.to_string()))
        }
    }

    struct Leer;

    impl PlattformQuelle for Leer {
        fn pfad_existiert(&self, _pfad: &Path) -> bool {
            false
        }
        fn board_kennungen(&self) -> Vec<String> {
            Vec::new()
        }
        fn hardware_beschreibung(&self) -> Option<String> {
            None
        }
    }

    struct Aufbau {
        dir: tempfile::TempDir,
        ausfuehrer: Arc<SkriptAusfuehrer>,
        injector: AudioInjector,
    }

    impl Aufbau {
        async fn neu(skript: Option<&'static str>, tx: i32) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("tinyplay"), b"").unwrap();
            std::fs::write(dir.path().join("ton.wav"), b"RIFF").unwrap();

            let ausfuehrer = SkriptAusfuehrer::neu(skript);
            let speicher = Arc::new(DeviceConfigStore::neu(dir.path().join("geraet.json")));
            speicher
                .manuell_setzen(ChipsetFamily::Exynos, 0, tx, -1)
                .await
                .unwrap();
            let prober = Arc::new(DeviceProber::neu(
                ausfuehrer.clone(),
                Arc::new(ChipsetDetector::neu(Arc::new(Leer))),
            ));
            let helfer = HelferAufloeser::neu(vec![dir.path().join("tinyplay")]);
            let injector = AudioInjector::neu(ausfuehrer.clone(), prober, speicher, helfer);
            Self {
                dir,
                ausfuehrer,
                injector,
            }
        }

        fn quelle(&self) -> PathBuf {
            self.dir.path().join("ton.wav")
        }
    }

    fn rueckmeldung() -> (Abschluss, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Box::new(move |ok| {
                let _ = tx.send(ok);
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn erfolgreiche_wiedergabe() {
        let a = Aufbau::neu(Some("exit 0"), 8).await;
        let (cb, rx) = rueckmeldung();
        assert!(a.injector.abspielen(&a.quelle(), cb).await);
        assert!(rx.await.unwrap());
        assert!(!a.injector.spielt());

        let erwartet = format!(
            "exec '{}' '{}' -D 0 -d 8",
            a.dir.path().join("tinyplay").display(),
            a.quelle().display()
        );
        assert_eq!(a.ausfuehrer.befehle(), vec![erwartet]);
    }

    #[tokio::test]
    async fn exit_code_ungleich_null_ist_fehlschlag() {
        let a = Aufbau::neu(Some("echo kaputt >&2; exit 3"), 8).await;
        let (cb, rx) = rueckmeldung();
        assert!(a.injector.abspielen(&a.quelle(), cb).await);
        assert!(!rx.await.unwrap());
        assert!(!a.injector.spielt());
    }

    #[tokio::test]
    async fn neue_wiedergabe_beendet_vorherige() {
        let a = Aufbau::neu(Some("exec sleep 5"), 8).await;

        let (cb_a, mut rx_a) = rueckmeldung();
        assert!(a.injector.abspielen(&a.quelle(), cb_a).await);
        assert!(a.injector.spielt());

        let (cb_b, rx_b) = rueckmeldung();
        assert!(a.injector.abspielen(&a.quelle(), cb_b).await);
        // Erste Sitzung ist vollstaendig beendet, bevor die zweite laeuft
        assert_eq!(rx_a.try_recv(), Ok(false));
        assert!(a.injector.spielt());

        a.injector.stoppen().await;
        assert!(!a.injector.spielt());
        assert!(!rx_b.await.unwrap());

        let erwartet = kill_befehl(&befehlszeile(
            &a.dir.path().join("tinyplay"),
            &a.quelle(),
            0,
            8,
        ));
        let pkills: Vec<String> = a
            .ausfuehrer
            .befehle()
            .into_iter()
            .filter(|b| b.starts_with("pkill"))
            .collect();
        assert_eq!(pkills, vec![erwartet.clone(), erwartet]);
    }

    #[tokio::test]
    async fn stoppen_wartet_auf_prozessende() {
        let a = Aufbau::neu(Some("exec sleep 5"), 8).await;
        let (cb, mut rx) = rueckmeldung();
        assert!(a.injector.abspielen(&a.quelle(), cb).await);

        a.injector.stoppen().await;
        // Abschluss ist bereits gelaufen, wenn stoppen zurueckkehrt
        assert_eq!(rx.try_recv(), Ok(false));
        assert!(!a.injector.spielt());
    }

    /// Echte Shell als Hilfsprogramm: die Quelle ist ein Skript, das lange laeuft
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn neue_wiedergabe_nach_stoppen_bleibt_am_leben() {
        let dir = tempfile::tempdir().unwrap();
        let helfer = dir.path().join("tinyplay");
        std::fs::copy("/bin/sh", &helfer).unwrap();
        let quelle = dir.path().join("ansage.wav");
        std::fs::write(&quelle, b"sleep 30\n").unwrap();

        let ausfuehrer: Arc<dyn PrivilegierterAusfuehrer> = Arc::new(crate::SuAusfuehrer::shell());
        let speicher = Arc::new(DeviceConfigStore::neu(dir.path().join("geraet.json")));
        speicher
            .manuell_setzen(ChipsetFamily::Qualcomm, 0, 5, -1)
            .await
            .unwrap();
        let prober = Arc::new(DeviceProber::neu(
            ausfuehrer.clone(),
            Arc::new(ChipsetDetector::neu(Arc::new(Leer))),
        ));
        let injector = AudioInjector::neu(
            ausfuehrer,
            prober,
            speicher,
            HelferAufloeser::neu(vec![helfer]),
        );

        let (cb_a, rx_a) = rueckmeldung();
        assert!(injector.abspielen(&quelle, cb_a).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        injector.stoppen().await;
        assert!(!rx_a.await.unwrap());

        let (cb_b, mut rx_b) = rueckmeldung();
        assert!(injector.abspielen(&quelle, cb_b).await);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(injector.spielt());
        assert_eq!(rx_b.try_recv(), Err(oneshot::error::TryRecvError::Empty));
        injector.stoppen().await;
    }

    #[tokio::test]
    async fn fehlende_quelle() {
        let a = Aufbau::neu(Some("exit 0"), 8).await;
        let (cb, rx) = rueckmeldung();
        let fehlt = a.dir.path().join("fehlt.wav");
        assert!(!a.injector.abspielen(&fehlt, cb).await);
        assert!(!rx.await.unwrap());
        assert!(a.ausfuehrer.befehle().is_empty());
    }

    #[tokio::test]
    async fn fehlender_helfer() {
        let a = Aufbau::neu(Some("exit 0"), 8).await;
        std::fs::remove_file(a.dir.path().join("tinyplay")).unwrap();
        let (cb, rx) = rueckmeldung();
        assert!(!a.injector.abspielen(&a.quelle(), cb).await);
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn ohne_tx_geraet() {
        let a = Aufbau::neu(Some("exit 0"), -1).await;
        let (cb, rx) = rueckmeldung();
        assert!(!a.injector.abspielen(&a.quelle(), cb).await);
        assert!(!rx.await.unwrap());
        assert!(a.ausfuehrer.befehle().is_empty());
    }

    #[tokio::test]
    async fn startfehler_meldet_false() {
        let a = Aufbau::neu(None, 8).await;
        let (cb, rx) = rueckmeldung();
        assert!(!a.injector.abspielen(&a.quelle(), cb).await);
        assert!(!rx.await.unwrap());
        assert!(!a.injector.spielt());
    }

    #[tokio::test]
    async fn stoppen_im_leerlauf() {
        let a = Aufbau::neu(Some("exit 0"), 8).await;
        a.injector.stoppen().await;
        a.injector.stoppen().await;
        assert!(!a.injector.spielt());
        assert!(a.ausfuehrer.befehle().is_empty());
    }

    #[test]
    fn befehl_mit_leerzeichen() {
        let b = wiedergabe_befehl(
            Path::new("/data/local/tmp/tinyplay"),
            Path::new("/sdcard/mein ton.wav"),
            1,
            5,
        );
        assert_eq!(b, "exec '/data/local/tmp/tinyplay' '/sdcard/mein ton.wav' -D 1 -d 5");
    }

    #[test]
    fn kill_trifft_nur_die_eigene_kommandozeile() {
        let zeile = befehlszeile(
            Path::new("/data/local/tmp/tinyplay"),
            Path::new("/sdcard/ton (1).wav"),
            0,
            8,
        );
        assert_eq!(zeile, "/data/local/tmp/tinyplay /sdcard/ton (1).wav -D 0 -d 8");
        assert_eq!(
            kill_befehl(&zeile),
            r"pkill -f -x '/data/local/tmp/tinyplay /sdcard/ton \(1\)\.wav -D 0 -d 8'"
        );
    }
}
