use async_trait::async_trait;
use songbird::input::{Compose, Input, YoutubeDl};
use tracing::{debug, warn};

use super::{SourceError, StreamKind, StreamProvider};
use crate::audio::queue::Song;

/// Streams de YouTube vía yt-dlp.
pub struct YouTubeProvider {
    client: reqwest::Client,
}

impl YouTubeProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Crea un `YoutubeDl` y consulta su metadata para que un video caído
/// falle aquí y no a mitad de la reproducción.
pub(crate) async fn probe_ytdl(client: &reqwest::Client, url: &str) -> Result<Input, SourceError> {
    let mut source = YoutubeDl::new(client.clone(), url.to_string());

    match source.aux_metadata().await {
        Ok(meta) => {
            debug!(
                "🎵 yt-dlp resolvió {} ({:?})",
                meta.title.as_deref().unwrap_or("sin título"),
                meta.duration
            );
            Ok(source.into())
        }
        Err(e) => {
            warn!("❌ yt-dlp no pudo resolver {}: {}", url, e);
            Err(SourceError::Stream(e))
        }
    }
}

#[async_trait]
impl StreamProvider for YouTubeProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::YouTube
    }

    async fn open(&self, song: &Song) -> Result<Input, SourceError> {
        probe_ytdl(&self.client, &song.url).await
    }
}
