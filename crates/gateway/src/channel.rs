//! Befehlskanal – persistente Textverbindung zum Controller
//!
//! Eine Verbindung besteht aus zwei Queues:
//! - `ausgang`: JSON-Texte an den Controller (fire-and-forget)
//! - `eingang`: empfangene Texte und genau ein abschliessendes `Geschlossen`
//!
//! Wird `ausgang` fallen gelassen, schliesst die Pumpe die Verbindung
//! ohne `Geschlossen` zu melden.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::KanalFehler;

/// Ereignisse einer offenen Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KanalEreignis {
    Nachricht(String),
    /// Verbindung von der Gegenseite oder durch einen Fehler beendet
    Geschlossen(Option<String>),
}

/// Eine offene Verbindung
pub struct KanalVerbindung {
    pub ausgang: mpsc::UnboundedSender<String>,
    pub eingang: mpsc::UnboundedReceiver<KanalEreignis>,
}

/// Baut Verbindungen zum Controller auf
#[async_trait]
pub trait KanalVerbinder: Send + Sync {
    async fn verbinden(&self, url: &str) -> Result<KanalVerbindung, KanalFehler>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Befehlskanal ueber WebSocket (`ws://` oder `wss://`)
#[derive(Debug, Clone)]
pub struct WebSocketVerbinder {
    verbindungs_timeout: Duration,
}

impl WebSocketVerbinder {
    pub fn neu(verbindungs_timeout: Duration) -> Self {
        Self {
            verbindungs_timeout,
        }
    }
}

impl Default for WebSocketVerbinder {
    fn default() -> Self {
        Self::neu(Duration::from_secs(15))
    }
}

#[async_trait]
impl KanalVerbinder for WebSocketVerbinder {
    async fn verbinden(&self, url: &str) -> Result<KanalVerbindung, KanalFehler> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(KanalFehler::UngueltigeUrl(url.to_string()));
        }

        let (ws, _) = tokio::time::timeout(self.verbindungs_timeout, connect_async(url))
            .await
            .map_err(|_| KanalFehler::Verbindung("Zeitlimit beim Verbindungsaufbau".into()))?
            .map_err(|e| KanalFehler::Verbindung(e.to_string()))?;

        let (mut schreiber, mut leser) = ws.split();
        let (ausgang_tx, mut ausgang_rx) = mpsc::unbounded_channel::<String>();
        let (eingang_tx, eingang_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let grund = loop {
                tokio::select! {
                    empfangen = leser.next() => match empfangen {
                        Some(Ok(Message::Text(text))) => {
                            if eingang_tx.send(KanalEreignis::Nachricht(text)).is_err() {
                                break None;
                            }
                        }
                        Some(Ok(Message::Close(rahmen))) => {
                            break rahmen.map(|r| r.reason.to_string());
                        }
                        // Binary, Ping und Pong behandelt tungstenite selbst
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break None,
                    },
                    zu_senden = ausgang_rx.recv() => match zu_senden {
                        Some(text) => {
                            if let Err(e) = schreiber.send(Message::Text(text)).await {
                                break Some(e.to_string());
                            }
                        }
                        None => {
                            // Lokal geschlossen
                            let _ = schreiber.send(Message::Close(None)).await;
                            return;
                        }
                    },
                }
            };
            tracing::debug!(grund = ?grund, "WebSocket-Pumpe beendet");
            let _ = eingang_tx.send(KanalEreignis::Geschlossen(grund));
        });

        Ok(KanalVerbindung {
            ausgang: ausgang_tx,
            eingang: eingang_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_url_wird_abgelehnt() {
        let v = WebSocketVerbinder::default();
        assert!(matches!(
            v.verbinden("http://localhost:1").await,
            Err(KanalFehler::UngueltigeUrl(_))
        ));
    }

    #[tokio::test]
    async fn nicht_erreichbarer_server() {
        let v = WebSocketVerbinder::neu(Duration::from_secs(2));
        assert!(matches!(
            v.verbinden("ws://127.0.0.1:1/").await,
            Err(KanalFehler::Verbindung(_))
        ));
    }
}
