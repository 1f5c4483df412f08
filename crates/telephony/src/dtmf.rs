//! DTMF-Alphabet und Zeitraster

use std::time::Duration;

/// Standard-Tondauer pro Ziffer
pub const DTMF_TON: Duration = Duration::from_millis(250);

/// Standard-Pause zwischen zwei Ziffern
pub const DTMF_PAUSE: Duration = Duration::from_millis(150);

/// Zeitraster fuer DTMF-Folgen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfTakt {
    pub ton: Duration,
    pub pause: Duration,
}

impl DtmfTakt {
    /// Abstand zwischen den Startzeitpunkten zweier Ziffern
    pub fn schritt(&self) -> Duration {
        self.ton + self.pause
    }

    /// Startversatz der k-ten gueltigen Ziffer
    pub fn versatz(&self, k: usize) -> Duration {
        self.schritt() * k as u32
    }

    /// Gesamtdauer einer Folge aus `anzahl` Ziffern (letzte Pause inklusive)
    pub fn dauer(&self, anzahl: usize) -> Duration {
        self.versatz(anzahl)
    }
}

impl Default for DtmfTakt {
    fn default() -> Self {
        Self {
            ton: DTMF_TON,
            pause: DTMF_PAUSE,
        }
    }
}

/// `[0-9*#A-D]`
pub fn ist_dtmf_zeichen(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D')
}

/// Filtert eine Folge auf gueltige Ziffern
pub fn gueltige_ziffern(folge: &str) -> Vec<char> {
    folge.chars().filter(|c| ist_dtmf_zeichen(*c)).collect()
}
