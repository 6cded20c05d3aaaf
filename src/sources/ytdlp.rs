use async_process::Command;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::time::Duration;
use tracing::{debug, info};

use super::SourceError;
use crate::audio::queue::Song;

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
}

fn is_url(query: &str) -> bool {
    url::Url::parse(query).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Resuelve una URL o búsqueda a una [`Song`] con título y duración.
pub async fn resolve_song(query: &str, requested_by: UserId) -> Result<Song, SourceError> {
    let target = if is_url(query) {
        query.to_string()
    } else {
        format!("ytsearch1:{}", query)
    };

    info!("🔍 Resolviendo con yt-dlp: {}", target);

    let output = Command::new("yt-dlp")
        .args([
            "--no-playlist",
            "--dump-json",
            "--skip-download",
            "--no-warnings",
            &target,
        ])
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::YtDlp(stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| SourceError::NotFound(query.to_string()))?;

    parse_song(line, query, requested_by)
}

fn parse_song(json: &str, query: &str, requested_by: UserId) -> Result<Song, SourceError> {
    let info: YtDlpInfo = serde_json::from_str(json)?;

    let url = info
        .webpage_url
        .or(info.original_url)
        .unwrap_or_else(|| query.to_string());
    let title = info.title.unwrap_or_else(|| url.clone());

    debug!("📊 Metadata: {} ({:?}s)", title, info.duration);

    let mut song = Song::new(title, url, requested_by);

    if let Some(secs) = info.duration.filter(|d| d.is_finite() && *d > 0.0) {
        song = song.with_duration(Duration::from_secs_f64(secs));
    }

    if let Some(thumbnail) = info.thumbnail {
        song = song.with_thumbnail(thumbnail);
    }

    Ok(song)
}

/// `true` si el binario responde a `--version`.
pub async fn is_available(binary: &str, version_flag: &str) -> bool {
    match Command::new(binary).arg(version_flag).output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}
