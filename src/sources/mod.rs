pub mod soundcloud;
pub mod youtube;
pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use songbird::input::{AudioStreamError, Input};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::{audio::queue::Song, config::Config};

pub use soundcloud::SoundCloudProvider;
pub use youtube::YouTubeProvider;

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?((www|m|music)\.)?(youtube\.com/|youtu\.be/)")
        .expect("regex de YouTube válida")
});

static SOUNDCLOUD_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?((www|m|on)\.)?soundcloud\.com/").expect("regex de SoundCloud válida")
});

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("URL no soportada: {0}")]
    Unsupported(String),
    #[error("no hay proveedor registrado para {0}")]
    NoProvider(&'static str),
    #[error("no se pudo abrir el stream: {0}")]
    Stream(#[from] AudioStreamError),
    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SoundCloud: {0}")]
    SoundCloud(String),
    #[error("yt-dlp: {0}")]
    YtDlp(String),
    #[error("sin resultados para: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("respuesta inválida: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tipo de stream según la forma de la URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    YouTube,
    SoundCloud,
}

impl StreamKind {
    pub fn detect(url: &str) -> Option<Self> {
        if YOUTUBE_URL.is_match(url) {
            Some(StreamKind::YouTube)
        } else if SOUNDCLOUD_URL.is_match(url) {
            Some(StreamKind::SoundCloud)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::YouTube => "youtube",
            StreamKind::SoundCloud => "soundcloud",
        }
    }
}

/// Convierte la URL de una canción en un stream reproducible.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamProvider: Send + Sync {
    fn kind(&self) -> StreamKind;

    async fn open(&self, song: &Song) -> Result<Input, SourceError>;
}

/// Manager para todos los proveedores de streams
pub struct SourceManager {
    providers: Vec<Arc<dyn StreamProvider>>,
}

impl SourceManager {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self::with_providers(vec![
            Arc::new(YouTubeProvider::new(client.clone())),
            Arc::new(SoundCloudProvider::new(
                client,
                config.soundcloud_client_id.clone(),
            )),
        ])
    }

    pub fn with_providers(providers: Vec<Arc<dyn StreamProvider>>) -> Self {
        Self { providers }
    }

    /// Obtiene el stream de la canción con el proveedor de su tipo de URL.
    pub async fn open(&self, song: &Song) -> Result<Input, SourceError> {
        let kind = StreamKind::detect(&song.url)
            .ok_or_else(|| SourceError::Unsupported(song.url.clone()))?;

        let provider = self
            .providers
            .iter()
            .find(|p| p.kind() == kind)
            .ok_or(SourceError::NoProvider(kind.as_str()))?;

        debug!("🔗 Abriendo {} con proveedor {}", song.url, kind.as_str());
        let input = provider.open(song).await?;
        info!("✅ Stream listo para: {}", song.title);

        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::model::id::UserId;

    #[test]
    fn detects_youtube_urls() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=test",
            "http://m.youtube.com/watch?v=test",
            "youtube.com/watch?v=test",
        ] {
            assert_eq!(StreamKind::detect(url), Some(StreamKind::YouTube), "{url}");
        }
    }

    #[test]
    fn detects_soundcloud_urls() {
        for url in [
            "https://soundcloud.com/artist/track",
            "https://on.soundcloud.com/abc123",
            "https://m.soundcloud.com/artist/track",
        ] {
            assert_eq!(StreamKind::detect(url), Some(StreamKind::SoundCloud), "{url}");
        }
    }

    #[test]
    fn rejects_other_urls() {
        assert_eq!(StreamKind::detect("https://example.com/video"), None);
        assert_eq!(StreamKind::detect("https://notyoutube.com/watch"), None);
        assert_eq!(StreamKind::detect("https://example.com/?u=youtube.com/"), None);
    }

    #[tokio::test]
    async fn unsupported_url_never_reaches_a_provider() {
        let mut provider = MockStreamProvider::new();
        provider.expect_kind().return_const(StreamKind::YouTube);
        provider.expect_open().never();

        let manager = SourceManager::with_providers(vec![Arc::new(provider)]);
        let song = Song::new(
            "x".to_string(),
            "https://example.com/x.mp3".to_string(),
            UserId::new(1),
        );

        let err = manager.open(&song).await.err().unwrap();
        assert!(matches!(err, SourceError::Unsupported(_)));
    }

    #[tokio::test]
    async fn missing_provider_is_reported() {
        let mut provider = MockStreamProvider::new();
        provider.expect_kind().return_const(StreamKind::YouTube);

        let manager = SourceManager::with_providers(vec![Arc::new(provider)]);
        let song = Song::new(
            "x".to_string(),
            "https://soundcloud.com/a/b".to_string(),
            UserId::new(1),
        );

        let err = manager.open(&song).await.err().unwrap();
        assert!(matches!(err, SourceError::NoProvider("soundcloud")));
    }
}
