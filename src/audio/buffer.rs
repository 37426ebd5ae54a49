use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::track::{FetchState, PendingFetch, Track, TrackId};
use crate::{
    error::FetchError,
    sources::{SourceRegistry, TrackSource},
};

/// Aviso de que la descarga anticipada de un track terminó.
///
/// El resultado queda en el `PendingFetch` del track; si `play` ya lo tomó, el
/// aviso no tiene efecto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOutcome {
    pub id: TrackId,
}

pub type BufferSender = mpsc::UnboundedSender<BufferOutcome>;
pub type BufferReceiver = mpsc::UnboundedReceiver<BufferOutcome>;

/// Reintentos acotados con backoff exponencial
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Pre-carga los streams de los próximos tracks.
///
/// Como mucho hay una descarga en curso por track (`FetchState::InFlight`). El
/// resultado se entrega por un `oneshot` guardado en el track: lo aplica la sesión
/// con [`BufferPipeline::complete`] al recibir el aviso, o `play` lo espera si
/// necesita el track antes.
pub struct BufferPipeline<S> {
    sources: Arc<SourceRegistry<S>>,
    completions: BufferSender,
    retry: RetryPolicy,
    stream_timeout: Duration,
}

impl<S: Send + 'static> BufferPipeline<S> {
    pub fn new(
        sources: Arc<SourceRegistry<S>>,
        completions: BufferSender,
        retry: RetryPolicy,
        stream_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            completions,
            retry,
            stream_timeout,
        }
    }

    /// Lanza la descarga de `track` si no tiene caché ni descarga en curso.
    /// Devuelve `true` si se inició una descarga.
    pub fn prefetch(&self, track: &mut Track<S>) -> bool {
        if track.is_cached() || track.fetch_state() == FetchState::InFlight {
            return false;
        }

        let (result_tx, result_rx) = oneshot::channel();
        track.begin_fetch(result_rx);

        let id = track.id();
        let source = track.meta.source.clone();
        let title = track.meta.title.clone();
        let sources = self.sources.clone();
        let completions = self.completions.clone();
        let retry = self.retry;
        let timeout = self.stream_timeout;

        debug!("📥 Pre-cargando {} ({})", title, id);

        tokio::spawn(async move {
            let result = fetch_with_retry(&sources, &source, retry, timeout).await;
            match &result {
                Ok(_) => info!("📦 Buffer listo: {}", title),
                Err(e) => warn!("❌ Buffer falló definitivamente para {}: {}", title, e),
            }

            if result_tx.send(result).is_err() {
                debug!("Nadie espera ya el buffer de {}", id);
                return;
            }
            if completions.send(BufferOutcome { id }).is_err() {
                debug!("Sesión cerrada, se descarta el buffer de {}", id);
            }
        });

        true
    }

    /// Entrega el stream en caché, si lo hay
    pub fn consume(&self, track: &mut Track<S>) -> Option<S> {
        track.take_stream()
    }

    /// Stream para reproducir ya, cuando no hay caché.
    ///
    /// Si hay una descarga en curso se espera esa (acotada por `stream_timeout`) en
    /// lugar de abrir otra; si no, se resuelve una vez sin reintentos.
    pub async fn fetch_now(&self, source: &TrackSource, pending: Option<PendingFetch<S>>) -> Result<S, FetchError> {
        let Some(pending) = pending else {
            return resolve_with_timeout(&self.sources, source, self.stream_timeout).await;
        };

        debug!("⏳ Esperando la descarga en curso de {}", source);
        match tokio::time::timeout(self.stream_timeout, pending).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                debug!("La descarga de {} se perdió, resolviendo de nuevo", source);
                resolve_with_timeout(&self.sources, source, self.stream_timeout).await
            }
            Err(_) => Err(FetchError::Timeout(self.stream_timeout)),
        }
    }

    /// Aplica al track la descarga que terminó. Devuelve `true` si quedó en caché.
    pub fn complete(track: &mut Track<S>) -> bool {
        let Some(mut pending) = track.take_pending() else {
            debug!("Track {} ya no espera su buffer", track.id());
            return false;
        };

        match pending.try_recv() {
            Ok(Ok(stream)) => {
                let stored = track.store_stream(stream);
                if !stored {
                    debug!("Track {} ya tenía caché, se descarta el duplicado", track.id());
                }
                stored
            }
            Ok(Err(_)) => false,
            Err(oneshot::error::TryRecvError::Empty) => {
                track.begin_fetch(pending);
                false
            }
            Err(oneshot::error::TryRecvError::Closed) => false,
        }
    }
}

async fn resolve_with_timeout<S: Send + 'static>(
    sources: &SourceRegistry<S>,
    source: &TrackSource,
    timeout: Duration,
) -> Result<S, FetchError> {
    match tokio::time::timeout(timeout, sources.resolve(source)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

async fn fetch_with_retry<S: Send + 'static>(
    sources: &SourceRegistry<S>,
    source: &TrackSource,
    retry: RetryPolicy,
    timeout: Duration,
) -> Result<S, FetchError> {
    let mut attempt = 0;

    loop {
        match resolve_with_timeout(sources, source, timeout).await {
            Ok(stream) => return Ok(stream),
            // Sin proveedor no hay nada que reintentar
            Err(e @ FetchError::UnsupportedSource(_)) => return Err(e),
            Err(e) if attempt < retry.max_retries => {
                attempt += 1;
                let delay = retry.delay(attempt);
                warn!(
                    "🔄 Reintento {}/{} de buffer para {} en {:?}: {}",
                    attempt, retry.max_retries, source, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
