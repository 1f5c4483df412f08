//! Fehlertypen fuer das Protokoll-Crate

use thiserror::Error;

/// Nachricht konnte nicht als Befehl gelesen werden
///
/// Diese Fehler werden nur geloggt: ohne lesbares Objekt gibt es keine
/// `id`, auf die geantwortet werden koennte.
#[derive(Debug, Error)]
pub enum ProtokollFehler {
    #[error("Ungueltiges JSON: {0}")]
    UngueltigesJson(#[from] serde_json::Error),

    #[error("Nachricht ist kein JSON-Objekt")]
    KeinObjekt,
}
