use async_trait::async_trait;
use serde::Deserialize;
use songbird::input::{HttpRequest, Input};
use tracing::{debug, info, warn};

use super::{youtube::probe_ytdl, SourceError, StreamKind, StreamProvider};
use crate::audio::queue::Song;

const API_BASE: &str = "https://api-v2.soundcloud.com";

/// Cliente de SoundCloud.
///
/// Con `client_id` usa la API v2 y prefiere la transcodificación Opus,
/// cayendo a MP3; sin credenciales delega en yt-dlp.
pub struct SoundCloudProvider {
    client: reqwest::Client,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolvedTrack {
    media: Media,
}

#[derive(Debug, Deserialize)]
struct Media {
    transcodings: Vec<Transcoding>,
}

#[derive(Debug, Clone, Deserialize)]
struct Transcoding {
    url: String,
    format: TranscodingFormat,
}

#[derive(Debug, Clone, Deserialize)]
struct TranscodingFormat {
    protocol: String,
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct StreamLocation {
    url: String,
}

impl Transcoding {
    fn is_progressive(&self) -> bool {
        self.format.protocol == "progressive"
    }

    fn is_opus(&self) -> bool {
        self.format.mime_type.contains("opus")
    }

    fn is_mp3(&self) -> bool {
        self.format.mime_type.starts_with("audio/mpeg")
    }
}

/// Opus primero, MP3 como respaldo; solo transcodificaciones progresivas.
fn pick_transcoding(transcodings: &[Transcoding]) -> Option<&Transcoding> {
    let progressive = || transcodings.iter().filter(|t| t.is_progressive());

    progressive()
        .find(|t| t.is_opus())
        .or_else(|| progressive().find(|t| t.is_mp3()))
}

impl SoundCloudProvider {
    pub fn new(client: reqwest::Client, client_id: Option<String>) -> Self {
        Self { client, client_id }
    }

    async fn resolve_stream_url(&self, url: &str, client_id: &str) -> Result<String, SourceError> {
        let track: ResolvedTrack = self
            .client
            .get(format!("{}/resolve", API_BASE))
            .query(&[("url", url), ("client_id", client_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let transcoding = pick_transcoding(&track.media.transcodings).ok_or_else(|| {
            SourceError::SoundCloud(format!("sin transcodificación progresiva para {}", url))
        })?;

        if !transcoding.is_opus() {
            warn!("⚠️ Opus no disponible para {}, usando MP3", url);
        }

        let location: StreamLocation = self
            .client
            .get(&transcoding.url)
            .query(&[("client_id", client_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(location.url)
    }
}

#[async_trait]
impl StreamProvider for SoundCloudProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::SoundCloud
    }

    async fn open(&self, song: &Song) -> Result<Input, SourceError> {
        let Some(client_id) = self.client_id.as_deref() else {
            debug!("☁️ Sin SOUNDCLOUD_CLIENT_ID, resolviendo {} con yt-dlp", song.url);
            return probe_ytdl(&self.client, &song.url).await;
        };

        let stream_url = self.resolve_stream_url(&song.url, client_id).await?;
        info!("☁️ Stream de SoundCloud obtenido para: {}", song.title);

        Ok(HttpRequest::new(self.client.clone(), stream_url).into())
    }
}
