//! Privilegierte Befehlsausfuehrung
//!
//! Das Gateway braucht Root-Rechte fuer genau zwei Dinge: die PCM-Liste
//! lesen und das Wiedergabe-Hilfsprogramm starten. Beides laeuft ueber
//! `PrivilegierterAusfuehrer`, damit fehlendes Root ein normaler,
//! gemeldeter Fehlerfall bleibt.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::{AudioError, AudioResult};

/// Ergebnis eines abgeschlossenen Befehls
#[derive(Debug, Clone, Default)]
pub struct BefehlsAusgabe {
    pub stdout: String,
    pub stderr: String,
    /// `None` wenn der Prozess durch ein Signal beendet wurde
    pub exit_code: Option<i32>,
}

impl BefehlsAusgabe {
    pub fn erfolgreich(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Fuehrt Shell-Befehle mit erhoehten Rechten aus
#[async_trait]
pub trait PrivilegierterAusfuehrer: Send + Sync {
    /// Fuehrt einen Befehl aus und wartet auf sein Ende
    async fn ausfuehren(&self, befehl: &str) -> AudioResult<BefehlsAusgabe>;

    /// Startet einen lang laufenden Befehl
    ///
    /// stderr muss als Pipe verfuegbar sein, stdout wird verworfen.
    fn starten(&self, befehl: &str) -> AudioResult<Child>;
}

/// Standard-Ausfuehrer: `su -c <befehl>`
///
/// Mit `SuAusfuehrer::shell()` laeuft derselbe Pfad ohne Root ueber
/// `sh -c` (Entwicklung auf einem normalen Linux-Host).
#[derive(Debug, Clone)]
pub struct SuAusfuehrer {
    programm: String,
    schalter: String,
}

impl SuAusfuehrer {
    pub fn su() -> Self {
        Self::mit_programm("su", "-c")
    }

    pub fn shell() -> Self {
        Self::mit_programm("sh", "-c")
    }

    pub fn mit_programm(programm: impl Into<String>, schalter: impl Into<String>) -> Self {
        Self {
            programm: programm.into(),
            schalter: schalter.into(),
        }
    }

    fn befehl(&self, befehl: &str) -> Command {
        let mut cmd = Command::new(&self.programm);
        cmd.arg(&self.schalter).arg(befehl).stdin(Stdio::null());
        cmd
    }
}

impl Default for SuAusfuehrer {
    fn default() -> Self {
        Self::su()
    }
}

#[async_trait]
impl PrivilegierterAusfuehrer for SuAusfuehrer {
    async fn ausfuehren(&self, befehl: &str) -> AudioResult<BefehlsAusgabe> {
        let ausgabe = self
            .befehl(befehl)
            .output()
            .await
            .map_err(|e| AudioError::Ausfuehrung(format!("{}: {e}", self.programm)))?;

        Ok(BefehlsAusgabe {
            stdout: String::from_utf8_lossy(&ausgabe.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&ausgabe.stderr).into_owned(),
            exit_code: ausgabe.status.code(),
        })
    }

    fn starten(&self, befehl: &str) -> AudioResult<Child> {
        self.befehl(befehl)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AudioError::Start(format!("{}: {e}", self.programm)))
    }
}

/// Setzt einen Wert in einfache Anfuehrungszeichen fuer `sh -c`
pub fn shell_quote(wert: &str) -> String {
    format!("'{}'", wert.replace('\'', r"'\''"))
}
