use async_trait::async_trait;
use regex::Regex;
use songbird::input::{Compose, Input, YoutubeDl};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{StreamProvider, TrackDescription};
use crate::error::FetchError;

/// Cliente para YouTube a través de yt-dlp (vía songbird)
pub struct YouTubeClient {
    http: reqwest::Client,
}

impl YouTubeClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        static YOUTUBE: OnceLock<Regex> = OnceLock::new();
        YOUTUBE
            .get_or_init(|| {
                Regex::new(
                    r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)",
                )
                .expect("regex de YouTube válida")
            })
            .is_match(url)
    }
}

#[async_trait]
impl StreamProvider<Input> for YouTubeClient {
    async fn resolve(&self, locator: &str) -> Result<Input, FetchError> {
        debug!("🎵 Abriendo stream de YouTube: {}", locator);

        let input: Input = YoutubeDl::new(self.http.clone(), locator.to_string()).into();

        // Forzar la creación del stream ahora para que el buffer tenga sentido
        match input.make_live_async().await {
            Ok(live) => {
                info!("✅ Stream de YouTube listo: {}", locator);
                Ok(live)
            }
            Err(e) => {
                warn!("❌ yt-dlp falló para {}: {}", locator, e);
                Err(FetchError::Resolve(e.to_string()))
            }
        }
    }

    async fn describe(&self, locator: &str) -> Result<TrackDescription, FetchError> {
        let mut ytdl = YoutubeDl::new(self.http.clone(), locator.to_string());
        let meta = ytdl
            .aux_metadata()
            .await
            .map_err(|e| FetchError::Resolve(e.to_string()))?;

        Ok(TrackDescription {
            title: meta.title.unwrap_or_else(|| locator.to_string()),
            duration: meta.duration,
        })
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Self::is_youtube_url(url)
    }

    fn source_name(&self) -> &'static str {
        "YouTube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_url_detection() {
        assert!(YouTubeClient::is_youtube_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(YouTubeClient::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url(
            "https://music.youtube.com/watch?v=test"
        ));
        assert!(YouTubeClient::is_youtube_url(
            "https://youtube.com/shorts/abc123"
        ));
        assert!(!YouTubeClient::is_youtube_url("https://example.com/video"));
    }
}
