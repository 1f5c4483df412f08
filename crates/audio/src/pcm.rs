//! PCM-Endpunkte aus `/proc/asound/pcm`
//!
//! Zeilenformat:
//! ```text
//! 00-08: RDMA8 (*) :  : playback 1 : capture 1
//! ```

/// Ein Hardware-PCM-Knoten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmEndpoint {
    pub card: u32,
    pub device: u32,
    pub name: String,
    pub playback: bool,
    pub capture: bool,
    /// Originalzeile fuer Diagnose
    pub rohzeile: String,
}

impl PcmEndpoint {
    /// Kurzform ohne Rohzeile (vor allem fuer Tests)
    pub fn neu(card: u32, device: u32, name: &str, playback: bool, capture: bool) -> Self {
        Self {
            card,
            device,
            name: name.to_string(),
            playback,
            capture,
            rohzeile: String::new(),
        }
    }

    /// Prueft, ob der Name eines der Muster enthaelt (ohne Gross-/Kleinschreibung)
    pub fn name_passt(&self, muster: &[&str]) -> bool {
        let name = self.name.to_ascii_uppercase();
        muster.iter().any(|m| name.contains(m))
    }
}

/// Parst eine einzelne Zeile; `None` wenn kein `CC-DD`-Praefix lesbar ist
pub fn zeile_parsen(zeile: &str) -> Option<PcmEndpoint> {
    let mut teile = zeile.split(':');
    let (card, device) = teile.next()?.trim().split_once('-')?;
    let card = card.trim().parse().ok()?;
    let device = device.trim().parse().ok()?;
    let name = teile.next().unwrap_or_default().trim().to_string();

    let mut playback = false;
    let mut capture = false;
    for teil in teile {
        let teil = teil.trim();
        if let Some(n) = teil.strip_prefix("playback") {
            playback = anzahl(n) > 0;
        } else if let Some(n) = teil.strip_prefix("capture") {
            capture = anzahl(n) > 0;
        }
    }

    Some(PcmEndpoint {
        card,
        device,
        name,
        playback,
        capture,
        rohzeile: zeile.to_string(),
    })
}

fn anzahl(text: &str) -> u32 {
    text.trim().parse().unwrap_or(0)
}

/// Parst die komplette Ausgabe; unlesbare Zeilen werden uebersprungen
pub fn liste_parsen(text: &str) -> Vec<PcmEndpoint> {
    text.lines()
        .filter(|zeile| !zeile.trim().is_empty())
        .filter_map(|zeile| {
            let endpunkt = zeile_parsen(zeile);
            if endpunkt.is_none() {
                tracing::debug!(zeile, "PCM-Zeile uebersprungen");
            }
            endpunkt
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typische_zeile() {
        let e = zeile_parsen("00-08: RDMA8 (*) :  : playback 1 : capture 1").unwrap();
        assert_eq!((e.card, e.device), (0, 8));
        assert_eq!(e.name, "RDMA8 (*)");
        assert!(e.playback);
        assert!(e.capture);
    }

    #[test]
    fn nur_capture() {
        let e = zeile_parsen("01-05: Incall_Record : : capture 1").unwrap();
        assert_eq!((e.card, e.device), (1, 5));
        assert!(!e.playback);
        assert!(e.capture);
    }

    #[test]
    fn playback_null_ist_nicht_faehig() {
        let e = zeile_parsen("00-02: X : : playback 0 : capture 1").unwrap();
        assert!(!e.playback);
    }

    #[test]
    fn kaputte_zeilen_werden_uebersprungen() {
        let text = "\
00-00: Primary : : playback 1
Muell ohne Praefix
xx-yy: kaputt : : playback 1

00-08: RDMA8 : : playback 1
";
        let liste = liste_parsen(text);
        assert_eq!(liste.len(), 2);
        assert_eq!(liste[0].device, 0);
        assert_eq!(liste[1].device, 8);
    }

    #[test]
    fn mustervergleich_ohne_schreibweise() {
        let e = PcmEndpoint::neu(0, 5, "Incall_Music 2", true, false);
        assert!(e.name_passt(&["INCALL_MUSIC"]));
        assert!(!e.name_passt(&["VOICE_UL"]));
    }
}
