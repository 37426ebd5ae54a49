pub mod direct_url;
pub mod youtube;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, sync::OnceLock, time::Duration};
use tracing::{debug, warn};

use crate::error::FetchError;

pub use direct_url::DirectUrlClient;
pub use youtube::YouTubeClient;

/// Plataforma de la que proviene un track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    YouTube,
    DirectUrl,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::DirectUrl => "direct",
        }
    }
}

/// Localizador de un track: plataforma + URL (o id) dentro de ella
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackSource {
    pub kind: SourceKind,
    pub locator: String,
}

impl TrackSource {
    pub fn new(kind: SourceKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.locator)
    }
}

/// Información visible de un track antes de encolarlo
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescription {
    pub title: String,
    pub duration: Option<Duration>,
}

/// Proveedor de streams de audio para una plataforma.
///
/// `S` es el tipo de stream que consume el sink (para songbird, `Input`).
#[async_trait]
pub trait StreamProvider<S: Send + 'static>: Send + Sync {
    /// Abre un stream reproducible para el localizador
    async fn resolve(&self, locator: &str) -> Result<S, FetchError>;

    /// Obtiene título y duración; por defecto usa el localizador como título
    async fn describe(&self, locator: &str) -> Result<TrackDescription, FetchError> {
        Ok(TrackDescription {
            title: locator.to_string(),
            duration: None,
        })
    }

    /// Verifica si la URL es válida para esta fuente
    fn is_valid_url(&self, url: &str) -> bool;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;
}

/// Registro de proveedores indexado por `SourceKind`.
///
/// El orden de registro define la prioridad de `detect`.
pub struct SourceRegistry<S> {
    providers: Vec<(SourceKind, Arc<dyn StreamProvider<S>>)>,
}

impl<S: Send + 'static> SourceRegistry<S> {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Registra (o reemplaza) el proveedor de una plataforma
    pub fn register(mut self, kind: SourceKind, provider: Arc<dyn StreamProvider<S>>) -> Self {
        self.providers.retain(|(k, _)| *k != kind);
        self.providers.push((kind, provider));
        self
    }

    pub fn provider(&self, kind: SourceKind) -> Option<Arc<dyn StreamProvider<S>>> {
        self.providers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
    }

    /// Detecta a qué plataforma pertenece una URL
    pub fn detect(&self, url: &str) -> Option<TrackSource> {
        self.providers
            .iter()
            .find(|(_, p)| p.is_valid_url(url))
            .map(|(kind, _)| TrackSource::new(*kind, url))
    }

    /// Resuelve un stream usando el proveedor de la fuente
    pub async fn resolve(&self, source: &TrackSource) -> Result<S, FetchError> {
        let provider = self.provider(source.kind).ok_or_else(|| {
            warn!("🚫 Sin proveedor para {}", source);
            FetchError::UnsupportedSource(source.kind)
        })?;

        debug!("🔗 Resolviendo stream con {}: {}", provider.source_name(), source.locator);
        provider.resolve(&source.locator).await
    }

    /// Obtiene la descripción de un track, con el título ya limpio
    pub async fn describe(&self, source: &TrackSource) -> Result<TrackDescription, FetchError> {
        let provider = self
            .provider(source.kind)
            .ok_or(FetchError::UnsupportedSource(source.kind))?;

        let mut description = provider.describe(&source.locator).await?;
        description.title = cleanup_title(&description.title);
        Ok(description)
    }
}

impl<S: Send + 'static> Default for SourceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Quita etiquetas entre corchetes al inicio/final del título y la marca "歌ってみた"
pub fn cleanup_title(title: &str) -> String {
    static BRACKETS: OnceLock<Regex> = OnceLock::new();
    static COVER_TAG: OnceLock<Regex> = OnceLock::new();

    let brackets = BRACKETS.get_or_init(|| {
        Regex::new(r"(^(?:【|「|\(|\[|（).*?(?:】|\)|\]|）))|((?:【|\(|\[|（).*?(?:】|」|\)|\]|）)$)")
            .expect("regex de corchetes válida")
    });
    let cover_tag = COVER_TAG.get_or_init(|| {
        Regex::new(r"(?:【|「|\(|\[|（)?歌ってみた(?:】|\)|\]|）)?").expect("regex de covers válida")
    });

    let stripped = brackets.replace_all(title, "");
    let cleaned = cover_tag.replace_all(stripped.trim(), "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        title.trim().to_string()
    } else {
        cleaned.to_string()
    }
}
