use async_trait::async_trait;
use songbird::input::{HttpRequest, Input};
use tracing::{debug, warn};

use super::{StreamProvider, TrackDescription};
use crate::error::FetchError;

const AUDIO_EXTENSIONS: [&str; 5] = [".mp3", ".wav", ".ogg", ".flac", ".m4a"];

/// Cliente para URLs directas de archivos de audio
pub struct DirectUrlClient {
    http: reqwest::Client,
}

impl DirectUrlClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl StreamProvider<Input> for DirectUrlClient {
    async fn resolve(&self, locator: &str) -> Result<Input, FetchError> {
        debug!("🌐 Abriendo stream HTTP: {}", locator);

        let input: Input = HttpRequest::new(self.http.clone(), locator.to_string()).into();
        input.make_live_async().await.map_err(|e| {
            warn!("❌ Petición HTTP falló para {}: {}", locator, e);
            FetchError::Resolve(e.to_string())
        })
    }

    async fn describe(&self, locator: &str) -> Result<TrackDescription, FetchError> {
        // El último segmento de la ruta es lo más parecido a un título
        let title = url::Url::parse(locator)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| locator.to_string());

        Ok(TrackDescription {
            title,
            duration: None,
        })
    }

    fn is_valid_url(&self, url: &str) -> bool {
        let url_lower = url.to_lowercase();
        if !(url_lower.starts_with("http://") || url_lower.starts_with("https://")) {
            return false;
        }

        let path = url_lower.split(['?', '#']).next().unwrap_or_default();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_url_detection() {
        let client = DirectUrlClient::new(reqwest::Client::new());
        assert!(client.is_valid_url("https://cdn.example.com/song.mp3"));
        assert!(client.is_valid_url("http://example.com/a/b.FLAC?token=1"));
        assert!(!client.is_valid_url("https://example.com/page"));
        assert!(!client.is_valid_url("file:///tmp/song.mp3"));
    }

    #[tokio::test]
    async fn test_describe_uses_last_path_segment() {
        let client = DirectUrlClient::new(reqwest::Client::new());
        let description = client
            .describe("https://cdn.example.com/music/track%20one.mp3")
            .await
            .unwrap();
        assert_eq!(description.title, "track%20one.mp3");
        assert_eq!(description.duration, None);
    }
}
