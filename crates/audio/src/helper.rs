//! Suche nach dem Wiedergabe-Hilfsprogramm (tinyplay)

use std::path::PathBuf;

/// Uebliche Installationsorte von `tinyplay`
pub const STANDARD_KANDIDATEN: [&str; 4] = [
    "/data/local/tmp/tinyplay",
    "/system/bin/tinyplay",
    "/system/xbin/tinyplay",
    "/vendor/bin/tinyplay",
];

/// Liefert den ersten existierenden Kandidaten
#[derive(Debug, Clone)]
pub struct HelferAufloeser {
    kandidaten: Vec<PathBuf>,
}

impl HelferAufloeser {
    pub fn neu(kandidaten: Vec<PathBuf>) -> Self {
        Self { kandidaten }
    }

    pub fn aufloesen(&self) -> Option<PathBuf> {
        self.kandidaten.iter().find(|p| p.is_file()).cloned()
    }
}

impl Default for HelferAufloeser {
    fn default() -> Self {
        Self::neu(STANDARD_KANDIDATEN.iter().map(PathBuf::from).collect())
    }
}
