//! Medien-Download fuer `PLAY_AUDIO` mit URL-Quelle
//!
//! Geladene Dateien gehoeren dem Aufrufer: der Controller verwirft sie, sobald
//! die Wiedergabe endet. Abgebrochene Downloads hinterlassen keine Datei.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::MedienFehler;

/// Laedt eine entfernte Audio-Quelle in eine lokale Datei
#[async_trait]
pub trait MedienLader: Send + Sync {
    async fn laden(&self, url: &str) -> Result<PathBuf, MedienFehler>;

    /// Entfernt eine geladene Datei, die nicht mehr gebraucht wird
    async fn verwerfen(&self, pfad: &Path) {
        match tokio::fs::remove_file(pfad).await {
            Ok(()) => tracing::debug!(pfad = %pfad.display(), "Mediendatei entfernt"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(pfad = %pfad.display(), fehler = %e, "Mediendatei nicht entfernt"),
        }
    }
}

/// HTTP(S)-Download in ein Cache-Verzeichnis
pub struct HttpMedienLader {
    client: reqwest::Client,
    verzeichnis: PathBuf,
}

impl HttpMedienLader {
    pub fn neu(verzeichnis: impl Into<PathBuf>, timeout: Duration) -> Result<Self, MedienFehler> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            verzeichnis: verzeichnis.into(),
        })
    }

    pub fn verzeichnis(&self) -> &Path {
        &self.verzeichnis
    }
}

#[async_trait]
impl MedienLader for HttpMedienLader {
    async fn laden(&self, url: &str) -> Result<PathBuf, MedienFehler> {
        let mut antwort = self.client.get(url).send().await?;
        if !antwort.status().is_success() {
            return Err(MedienFehler::Status(antwort.status().as_u16()));
        }

        tokio::fs::create_dir_all(&self.verzeichnis).await?;
        let ziel = self.verzeichnis.join(dateiname(url));
        let teil = ziel.with_extension("part");

        let mut datei = tokio::fs::File::create(&teil).await?;
        let ergebnis = schreiben(&mut antwort, &mut datei).await;
        drop(datei);

        let groesse = match ergebnis {
            Ok(0) => Err(MedienFehler::Leer),
            Ok(groesse) => tokio::fs::rename(&teil, &ziel)
                .await
                .map(|()| groesse)
                .map_err(MedienFehler::from),
            Err(e) => Err(e),
        };
        let groesse = match groesse {
            Ok(groesse) => groesse,
            Err(e) => {
                let _ = tokio::fs::remove_file(&teil).await;
                return Err(e);
            }
        };

        tracing::info!(url, ziel = %ziel.display(), bytes = groesse, "Audio heruntergeladen");
        Ok(ziel)
    }
}

async fn schreiben(
    antwort: &mut reqwest::Response,
    datei: &mut tokio::fs::File,
) -> Result<usize, MedienFehler> {
    let mut groesse = 0usize;
    while let Some(stueck) = antwort.chunk().await? {
        datei.write_all(&stueck).await?;
        groesse += stueck.len();
    }
    datei.flush().await?;
    Ok(groesse)
}

/// Eindeutiger lokaler Dateiname, die Endung der URL bleibt erhalten
fn dateiname(url: &str) -> String {
    let pfad = url.split(['?', '#']).next().unwrap_or_default();
    let letzter = pfad.rsplit('/').next().unwrap_or_default();
    let bereinigt: String = letzter
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    let kennung = Uuid::new_v4().simple().to_string();
    if bereinigt.contains('.') && !bereinigt.starts_with('.') {
        format!("{kennung}-{bereinigt}")
    } else {
        format!("{kennung}.wav")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn dateiname_aus_url() {
        assert!(dateiname("https://x.de/audio/ansage.wav?token=1").ends_with("-ansage.wav"));
        assert!(dateiname("https://x.de/a b/../ton.mp3#frag").ends_with("-ton.mp3"));
        assert!(dateiname("https://x.de/stream").ends_with(".wav"));
        assert!(!dateiname("https://x.de/").contains('/'));
    }

    /// Minimaler HTTP-Server fuer genau eine Anfrage
    async fn http_server(antwort: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut puffer = [0u8; 1024];
            let _ = sock.read(&mut puffer).await;
            sock.write_all(antwort.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
        });
        format!("http://{adresse}/ansage.wav")
    }

    #[tokio::test]
    async fn download_in_verzeichnis() {
        let dir = tempfile::tempdir().unwrap();
        let url = http_server("HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nRIFF").await;
        let lader = HttpMedienLader::neu(dir.path(), Duration::from_secs(5)).unwrap();

        let pfad = lader.laden(&url).await.unwrap();
        assert!(pfad.starts_with(dir.path()));
        assert_eq!(std::fs::read(&pfad).unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn fehlerstatus_wird_gemeldet() {
        let dir = tempfile::tempdir().unwrap();
        let url = http_server("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let lader = HttpMedienLader::neu(dir.path(), Duration::from_secs(5)).unwrap();

        assert!(matches!(lader.laden(&url).await, Err(MedienFehler::Status(404))));
    }

    fn eintraege(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn abgebrochener_stream_hinterlaesst_keine_datei() {
        let dir = tempfile::tempdir().unwrap();
        // Content-Length verspricht mehr, als der Server liefert
        let url = http_server("HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nRIFF").await;
        let lader = HttpMedienLader::neu(dir.path(), Duration::from_secs(5)).unwrap();

        assert!(matches!(lader.laden(&url).await, Err(MedienFehler::Http(_))));
        assert_eq!(eintraege(dir.path()), 0);
    }

    #[tokio::test]
    async fn leere_antwort_hinterlaesst_keine_datei() {
        let dir = tempfile::tempdir().unwrap();
        let url = http_server("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let lader = HttpMedienLader::neu(dir.path(), Duration::from_secs(5)).unwrap();

        assert!(matches!(lader.laden(&url).await, Err(MedienFehler::Leer)));
        assert_eq!(eintraege(dir.path()), 0);
    }

    #[tokio::test]
    async fn verwerfen_entfernt_die_datei() {
        let dir = tempfile::tempdir().unwrap();
        let url = http_server("HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nRIFF").await;
        let lader = HttpMedienLader::neu(dir.path(), Duration::from_secs(5)).unwrap();

        let pfad = lader.laden(&url).await.unwrap();
        lader.verwerfen(&pfad).await;
        assert!(!pfad.exists());
        // Zweites Verwerfen ist ohne Wirkung
        lader.verwerfen(&pfad).await;
        assert_eq!(eintraege(dir.path()), 0);
    }
}
