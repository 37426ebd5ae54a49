use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::sync::oneshot;

use crate::{error::FetchError, sources::TrackSource};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identificador estable de un track durante toda su vida en la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    pub fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Descripción inmutable de un elemento reproducible
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub id: TrackId,
    pub source: TrackSource,
    pub title: String,
    /// Solo para mostrar; no es autoritativa
    pub duration_hint: Option<Duration>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl TrackMetadata {
    pub fn new(source: TrackSource, title: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            id: TrackId::next(),
            source,
            title: title.into(),
            duration_hint: None,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration_hint = duration;
        self
    }
}

/// Estado de la descarga anticipada de un track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchState {
    #[default]
    Idle,
    InFlight,
}

/// Resultado de la descarga en curso de un track
pub type PendingFetch<S> = oneshot::Receiver<Result<S, FetchError>>;

/// Entrada de la cola: metadata + campos de ejecución.
///
/// El stream en caché es propiedad exclusiva del track hasta que `take_stream`
/// lo transfiere al sink.
pub struct Track<S> {
    pub meta: TrackMetadata,
    cached_stream: Option<S>,
    pending: Option<PendingFetch<S>>,
    last_error: Option<String>,
}

impl<S> Track<S> {
    pub fn new(meta: TrackMetadata) -> Self {
        Self {
            meta,
            cached_stream: None,
            pending: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.meta.id
    }

    pub fn title(&self) -> &str {
        &self.meta.title
    }

    pub fn is_cached(&self) -> bool {
        self.cached_stream.is_some()
    }

    pub fn fetch_state(&self) -> FetchState {
        match self.pending {
            Some(_) => FetchState::InFlight,
            None => FetchState::Idle,
        }
    }

    pub(crate) fn begin_fetch(&mut self, pending: PendingFetch<S>) {
        self.pending = Some(pending);
    }

    /// Saca la descarga en curso; el track vuelve a `FetchState::Idle`
    pub(crate) fn take_pending(&mut self) -> Option<PendingFetch<S>> {
        self.pending.take()
    }

    /// Guarda un stream pre-cargado. Devuelve `false` (y descarta el nuevo) si ya había uno.
    pub(crate) fn store_stream(&mut self, stream: S) -> bool {
        if self.cached_stream.is_some() {
            return false;
        }
        self.cached_stream = Some(stream);
        true
    }

    pub fn take_stream(&mut self) -> Option<S> {
        self.cached_stream.take()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
    }
}

impl<S> fmt::Debug for Track<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("meta", &self.meta)
            .field("cached", &self.cached_stream.is_some())
            .field("fetch", &self.fetch_state())
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Formatea una posición de reproducción como reloj: `m:ss`, `h:mm:ss` o `d:hh:mm:ss`
pub fn format_playback_time(position: Duration) -> String {
    let total = position.as_secs();
    let seconds = total % 60;
    let minutes = (total / 60) % 60;
    let hours = (total / 3600) % 24;
    let days = total / 86_400;

    if days > 0 {
        format!("{}:{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
