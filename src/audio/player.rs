use std::{fmt, time::Duration};
use tracing::{debug, info, warn};

use super::{
    buffer::{BufferOutcome, BufferPipeline},
    queue::{QueueStore, Removal},
    repeat::{RepeatMode, RepeatPolicy, Step},
    sink::{AudioSink, SinkEvent, SinkEventKind, Ticket},
    track::{TrackId, TrackMetadata},
};
use crate::error::{PlayerError, PlayerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Buffering,
    Playing,
    Paused,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "detenido",
            PlayerState::Buffering => "cargando",
            PlayerState::Playing => "reproduciendo",
            PlayerState::Paused => "en pausa",
        };
        f.write_str(name)
    }
}

/// Parámetros de reproducción de una sesión
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    pub volume: f32,
    pub max_volume: f32,
    pub max_queue_size: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            max_volume: 2.0,
            max_queue_size: 1000,
        }
    }
}

/// Resultado de `add_tracks`
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub added: usize,
    pub at: usize,
    /// Track que empezó a sonar si la sesión estaba detenida
    pub started: Option<TrackMetadata>,
}

/// Foto del estado para mostrar al usuario
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub tracks: Vec<TrackMetadata>,
    pub cursor: usize,
    pub now_playing: Option<TrackMetadata>,
    pub state: PlayerState,
    pub mode: RepeatMode,
    pub volume: f32,
    pub position: Option<Duration>,
}

/// Máquina de estados de reproducción de una sesión.
///
/// Es dueña de la cola, la política de repetición, el buffer y el sink. Todo se
/// ejecuta desde el loop de la sesión, así que cada evento del sink se procesa de
/// principio a fin antes de aceptar otro comando.
pub struct PlaybackController<K: AudioSink> {
    queue: QueueStore<K::Stream>,
    policy: RepeatPolicy,
    buffer: BufferPipeline<K::Stream>,
    sink: K,
    state: PlayerState,
    volume: f32,
    max_volume: f32,
    active: Option<Ticket>,
    playback_serial: u64,
    force_stopped: bool,
}

impl<K: AudioSink> PlaybackController<K> {
    pub fn new(
        sink: K,
        buffer: BufferPipeline<K::Stream>,
        policy: RepeatPolicy,
        settings: PlaybackSettings,
    ) -> Self {
        let mut queue = QueueStore::new(settings.max_queue_size);
        queue.set_follow_cursor(!policy.mode().is_random());

        Self {
            queue,
            policy,
            buffer,
            sink,
            state: PlayerState::Idle,
            volume: settings.volume.clamp(0.0, settings.max_volume),
            max_volume: settings.max_volume,
            active: None,
            playback_serial: 0,
            force_stopped: false,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.policy.mode()
    }

    pub fn queue(&self) -> &QueueStore<K::Stream> {
        &self.queue
    }

    /// Track del stream activo (si sigue en la cola)
    pub fn now_playing(&self) -> Option<&TrackMetadata> {
        let ticket = self.active?;
        let index = self.queue.index_of(ticket.track)?;
        self.queue.get(index).map(|t| &t.meta)
    }

    /// Reproduce el track en `index` (por defecto, el del cursor).
    ///
    /// Usa el stream pre-cargado si existe; si su descarga sigue en curso la espera,
    /// y si no hay ninguna lo resuelve en el momento.
    pub async fn play(&mut self, index: Option<usize>) -> PlayerResult<TrackMetadata> {
        let len = self.queue.len();
        let index = index.unwrap_or_else(|| self.queue.cursor());
        let previous = self.state;

        let track = self
            .queue
            .get_mut(index)
            .ok_or(PlayerError::IndexOutOfRange { index, len })?;
        let meta = track.meta.clone();

        let stream = match self.buffer.consume(track) {
            Some(stream) => {
                debug!("📦 Usando buffer de {}", meta.title);
                stream
            }
            None => {
                let pending = track.take_pending();
                self.state = PlayerState::Buffering;
                match self.buffer.fetch_now(&meta.source, pending).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        self.state = previous;
                        warn!("❌ Sin stream para {}: {}", meta.title, e);
                        return Err(PlayerError::NoStreamAvailable { title: meta.title });
                    }
                }
            }
        };

        self.playback_serial += 1;
        let ticket = Ticket {
            playback: self.playback_serial,
            track: meta.id,
        };

        if let Err(e) = self.sink.start(ticket, stream, self.volume).await {
            self.state = previous;
            return Err(e);
        }

        self.queue.set_cursor(index as isize);
        self.policy.on_played(meta.id);
        self.active = Some(ticket);
        self.force_stopped = false;
        self.state = PlayerState::Playing;

        info!("🎵 Reproduciendo: {} ({})", meta.title, meta.source);
        self.prefetch_upcoming();

        Ok(meta)
    }

    /// Siguiente track según el modo. Si no hay a dónde ir devuelve el actual sin tocar nada.
    pub async fn next(&mut self) -> PlayerResult<Option<TrackMetadata>> {
        self.skip(Step::Skip).await
    }

    /// Track anterior según el modo (los modos hacia atrás van hacia adelante)
    pub async fn prev(&mut self) -> PlayerResult<Option<TrackMetadata>> {
        self.skip(Step::Back).await
    }

    async fn skip(&mut self, step: Step) -> PlayerResult<Option<TrackMetadata>> {
        let current = self.queue.cursor();

        match self.policy.next_index(&self.queue, current, step) {
            Some(index) => self.play(Some(index)).await.map(Some),
            None => {
                debug!("⏭️ Sin destino para {:?} en modo {}", step, self.policy.mode());
                Ok(self.queue.current().map(|t| t.meta.clone()))
            }
        }
    }

    pub fn pause(&mut self) -> bool {
        if self.state != PlayerState::Playing {
            return false;
        }
        self.sink.pause();
        self.state = PlayerState::Paused;
        info!("⏸️ Pausado");
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state != PlayerState::Paused {
            return false;
        }
        self.sink.resume();
        self.state = PlayerState::Playing;
        info!("▶️ Reanudado");
        true
    }

    /// Detiene el stream activo. Con `force` el `Idle` que llegue después no avanza la cola.
    pub fn stop(&mut self, force: bool) -> bool {
        if self.active.is_none() {
            return false;
        }
        if force {
            self.force_stopped = true;
        }
        self.sink.stop();
        info!("⏹️ Detenido (forzado: {})", force);
        true
    }

    /// Agrega tracks en `at` (por defecto al final). Si la sesión estaba detenida,
    /// empieza a reproducir; en modos no aleatorios, desde el primero agregado.
    pub async fn add_tracks(&mut self, tracks: Vec<TrackMetadata>, at: Option<usize>) -> AddOutcome {
        let accepted = tracks.len().min(self.queue.remaining_capacity());
        let ids: Vec<TrackId> = tracks.iter().take(accepted).map(|t| t.id).collect();

        let at = self.queue.insert(tracks, at);
        self.policy.on_inserted(ids);

        let mut outcome = AddOutcome {
            added: accepted,
            at,
            started: None,
        };

        if accepted == 0 || self.state != PlayerState::Idle {
            return outcome;
        }

        if !self.policy.mode().is_random() {
            self.queue.set_cursor(at as isize);
        }
        self.prefetch_upcoming();

        let cursor = self.queue.cursor();
        outcome.started = match self.play(Some(cursor)).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("⚠️ No se pudo iniciar la reproducción: {}", e);
                self.advance_from(cursor, Step::Skip).await
            }
        };

        outcome
    }

    pub fn remove_at(&mut self, index: usize) -> PlayerResult<TrackMetadata> {
        let len = self.queue.len();
        let removal = self
            .queue
            .remove_at(index)
            .ok_or(PlayerError::IndexOutOfRange { index, len })?;
        Ok(self.finish_removal(removal))
    }

    pub fn remove_by_id(&mut self, id: TrackId) -> PlayerResult<TrackMetadata> {
        let len = self.queue.len();
        let removal = self
            .queue
            .remove_by_id(id)
            .ok_or(PlayerError::IndexOutOfRange { index: len, len })?;
        Ok(self.finish_removal(removal))
    }

    fn finish_removal(&mut self, removal: Removal<K::Stream>) -> TrackMetadata {
        let id = removal.track.id();
        self.policy.on_removed(id);

        if self.active.map(|t| t.track) == Some(id) {
            self.stop(true);
        }

        info!(
            "🗑️ Quitado de la cola: {} (posición {})",
            removal.track.title(),
            removal.index + 1
        );
        removal.track.meta
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) -> RepeatMode {
        let mode = self.policy.set_mode(mode, self.queue.ids());
        self.queue.set_follow_cursor(!mode.is_random());

        if self.active.is_some() {
            self.prefetch_upcoming();
        }
        mode
    }

    /// Cambia el volumen (acotado a `[0, max_volume]`) y reescala el stream activo
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = volume.clamp(0.0, self.max_volume);
        if self.active.is_some() {
            self.sink.set_volume(self.volume);
        }
        debug!("🔊 Volumen: {:.2}", self.volume);
        self.volume
    }

    /// Procesa un evento del sink. Los que no corresponden al stream activo se ignoran.
    pub async fn handle_sink_event(&mut self, event: SinkEvent) {
        if self.active != Some(event.ticket) {
            debug!("🔇 Evento de un stream anterior ignorado: {:?}", event);
            return;
        }
        let ticket = event.ticket;

        match event.kind {
            SinkEventKind::Started => {
                if let Some(track) = self.queue.find_mut(ticket.track) {
                    track.clear_error();
                }
                if self.state == PlayerState::Buffering {
                    self.state = PlayerState::Playing;
                }
            }
            SinkEventKind::Idle => {
                let previous = self.state;
                let forced = std::mem::take(&mut self.force_stopped);
                self.active = None;
                self.state = PlayerState::Idle;

                if forced || previous != PlayerState::Playing {
                    debug!("⏹️ Stream terminado sin avance automático");
                    return;
                }

                let current = self.queue.cursor();
                self.advance_from(current, Step::Auto).await;
            }
            SinkEventKind::Error(message) => {
                self.active = None;
                self.force_stopped = false;
                self.state = PlayerState::Idle;

                let Some(index) = self.queue.index_of(ticket.track) else {
                    debug!("El track con error ya no está en la cola");
                    return;
                };

                let repeated = self
                    .queue
                    .get(index)
                    .and_then(|t| t.last_error())
                    .is_some_and(|last| last == message);

                if repeated {
                    warn!("⏭️ El track volvió a fallar con '{}', avanzando", message);
                    self.advance_from(index, Step::Skip).await;
                    return;
                }

                if let Some(track) = self.queue.get_mut(index) {
                    track.record_error(message.clone());
                }
                warn!("🔄 Error de reproducción '{}', reintentando una vez", message);

                if let Err(e) = self.play(Some(index)).await {
                    warn!("❌ Reintento fallido: {}", e);
                    self.advance_from(index, Step::Skip).await;
                }
            }
        }
    }

    /// Aplica una descarga terminada; si el track ya no está se descarta
    pub fn handle_buffered(&mut self, outcome: BufferOutcome) {
        match self.queue.find_mut(outcome.id) {
            Some(track) => {
                BufferPipeline::complete(track);
            }
            None => debug!("Buffer de {} descartado: ya no está en la cola", outcome.id),
        }
    }

    pub async fn snapshot(&mut self) -> PlayerSnapshot {
        let position = if self.active.is_some() {
            self.sink.position().await
        } else {
            None
        };

        PlayerSnapshot {
            tracks: self.queue.iter().map(|t| t.meta.clone()).collect(),
            cursor: self.queue.cursor(),
            now_playing: self.now_playing().cloned(),
            state: self.state,
            mode: self.policy.mode(),
            volume: self.volume,
            position,
        }
    }

    /// Corta todo; la sesión no vuelve a usar el controlador
    pub fn shutdown(&mut self) {
        self.stop(true);
        self.active = None;
        self.state = PlayerState::Idle;
    }

    /// Avanza desde `current`; si un track no tiene stream prueba el siguiente
    /// (como mucho una vuelta a la cola) para no dejar la sesión trabada.
    async fn advance_from(&mut self, mut current: usize, mut step: Step) -> Option<TrackMetadata> {
        for _ in 0..self.queue.len() {
            let Some(index) = self.policy.next_index(&self.queue, current, step) else {
                info!("📭 Fin de la cola");
                return None;
            };

            match self.play(Some(index)).await {
                Ok(meta) => return Some(meta),
                Err(e) => {
                    warn!("⚠️ Saltando posición {}: {}", index, e);
                    current = index;
                    step = Step::Skip;
                }
            }
        }
        None
    }

    fn prefetch_upcoming(&mut self) {
        let current = self.queue.cursor();
        if let Some(next) = self.policy.peek_next(&self.queue, current) {
            if let Some(track) = self.queue.get_mut(next) {
                self.buffer.prefetch(track);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            buffer::{BufferReceiver, RetryPolicy},
            sink::MockAudioSink,
            track::FetchState,
            voice::{sink_event_for, tests::errored, Forward},
        },
        error::FetchError,
        sources::{SourceKind, SourceRegistry, StreamProvider, TrackSource},
    };
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use serenity::model::id::UserId;
    use std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Mutex},
    };
    use tokio::sync::mpsc;

    struct FakeProvider;

    #[async_trait]
    impl StreamProvider<String> for FakeProvider {
        async fn resolve(&self, locator: &str) -> Result<String, FetchError> {
            if locator.contains("broken") {
                return Err(FetchError::Resolve("404".into()));
            }
            Ok(format!("stream:{locator}"))
        }

        fn is_valid_url(&self, _url: &str) -> bool {
            true
        }

        fn source_name(&self) -> &'static str {
            "fake"
        }
    }

    /// Proveedor lento que cuenta cuántas veces se resolvió cada URL
    #[derive(Default)]
    struct CountingProvider {
        calls: Mutex<HashMap<String, usize>>,
    }

    impl CountingProvider {
        fn calls(&self, locator: &str) -> usize {
            self.calls.lock().unwrap().get(locator).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl StreamProvider<String> for CountingProvider {
        async fn resolve(&self, locator: &str) -> Result<String, FetchError> {
            *self.calls.lock().unwrap().entry(locator.to_string()).or_default() += 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(format!("stream:{locator}"))
        }

        fn is_valid_url(&self, _url: &str) -> bool {
            true
        }

        fn source_name(&self) -> &'static str {
            "counting"
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum SinkCall {
        Start(Ticket, String),
        Pause,
        Resume,
        Stop,
        Volume(f32),
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        calls: Arc<Mutex<Vec<SinkCall>>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }

        fn started(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    SinkCall::Start(_, stream) => Some(stream),
                    _ => None,
                })
                .collect()
        }

        fn last_ticket(&self) -> Ticket {
            self.calls()
                .into_iter()
                .rev()
                .find_map(|c| match c {
                    SinkCall::Start(ticket, _) => Some(ticket),
                    _ => None,
                })
                .expect("no se inició ningún stream")
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        type Stream = String;

        async fn start(&mut self, ticket: Ticket, stream: String, _volume: f32) -> Result<(), PlayerError> {
            self.calls.lock().unwrap().push(SinkCall::Start(ticket, stream));
            Ok(())
        }

        fn pause(&mut self) {
            self.calls.lock().unwrap().push(SinkCall::Pause);
        }

        fn resume(&mut self) {
            self.calls.lock().unwrap().push(SinkCall::Resume);
        }

        fn stop(&mut self) {
            self.calls.lock().unwrap().push(SinkCall::Stop);
        }

        fn set_volume(&mut self, volume: f32) {
            self.calls.lock().unwrap().push(SinkCall::Volume(volume));
        }

        async fn position(&self) -> Option<Duration> {
            Some(Duration::from_secs(42))
        }
    }

    fn controller_with<K: AudioSink<Stream = String>>(
        sink: K,
        mode: RepeatMode,
    ) -> (PlaybackController<K>, BufferReceiver) {
        controller_with_provider(sink, mode, Arc::new(FakeProvider))
    }

    fn controller_with_provider<K: AudioSink<Stream = String>>(
        sink: K,
        mode: RepeatMode,
        provider: Arc<dyn StreamProvider<String>>,
    ) -> (PlaybackController<K>, BufferReceiver) {
        let registry = SourceRegistry::<String>::new().register(SourceKind::DirectUrl, provider);
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = BufferPipeline::new(
            Arc::new(registry),
            tx,
            RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::default()
            },
            Duration::from_secs(5),
        );
        let mut policy = RepeatPolicy::with_rng(RepeatMode::Forward, StdRng::seed_from_u64(11));
        policy.set_mode(mode, std::iter::empty());

        let settings = PlaybackSettings {
            volume: 1.0,
            max_volume: 2.0,
            max_queue_size: 100,
        };
        (PlaybackController::new(sink, buffer, policy, settings), rx)
    }

    fn recording(mode: RepeatMode) -> (PlaybackController<RecordingSink>, RecordingSink, BufferReceiver) {
        let sink = RecordingSink::default();
        let (controller, rx) = controller_with(sink.clone(), mode);
        (controller, sink, rx)
    }

    fn metas(names: &[&str]) -> Vec<TrackMetadata> {
        names
            .iter()
            .map(|n| {
                TrackMetadata::new(
                    TrackSource::new(SourceKind::DirectUrl, format!("https://x/{n}.mp3")),
                    *n,
                    UserId::new(5),
                )
            })
            .collect()
    }

    fn stream(name: &str) -> String {
        format!("stream:https://x/{name}.mp3")
    }

    async fn end_current(controller: &mut PlaybackController<RecordingSink>, sink: &RecordingSink) {
        controller.handle_sink_event(SinkEvent::idle(sink.last_ticket())).await;
    }

    #[tokio::test]
    async fn test_add_to_idle_session_starts_playing() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);

        let outcome = controller.add_tracks(metas(&["a", "b", "c"]), None).await;
        assert_eq!(outcome.added, 3);
        assert_eq!(outcome.started.map(|m| m.title), Some("a".to_string()));
        assert_eq!(controller.state(), PlayerState::Playing);
        assert_eq!(sink.started(), vec![stream("a")]);
    }

    #[tokio::test]
    async fn test_forward_natural_end_advances() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;

        end_current(&mut controller, &sink).await;
        assert_eq!(controller.queue().cursor(), 1);
        assert_eq!(sink.started(), vec![stream("a"), stream("b")]);
    }

    #[tokio::test]
    async fn test_forward_at_tail_stops() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;
        controller.play(Some(2)).await.unwrap();

        end_current(&mut controller, &sink).await;
        assert_eq!(controller.state(), PlayerState::Idle);
        assert_eq!(sink.started(), vec![stream("a"), stream("c")]);
    }

    #[tokio::test]
    async fn test_forward_next_at_tail_is_noop() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;
        controller.play(Some(2)).await.unwrap();

        let current = controller.next().await.unwrap();
        assert_eq!(current.map(|m| m.title), Some("c".to_string()));
        assert_eq!(controller.state(), PlayerState::Playing);
        assert_eq!(sink.started().len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_current_replays_same_track() {
        let (mut controller, sink, _rx) = recording(RepeatMode::RepeatCurrent);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        end_current(&mut controller, &sink).await;
        assert_eq!(sink.started(), vec![stream("a"), stream("a")]);

        // El usuario sí puede salir del bucle con next
        controller.next().await.unwrap();
        assert_eq!(sink.started().last(), Some(&stream("b")));
    }

    #[tokio::test]
    async fn test_backward_walks_to_head_then_stops() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Backward);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;
        controller.play(Some(1)).await.unwrap();

        end_current(&mut controller, &sink).await;
        assert_eq!(sink.started().last(), Some(&stream("a")));

        end_current(&mut controller, &sink).await;
        assert_eq!(controller.state(), PlayerState::Idle);
        assert_eq!(sink.started(), vec![stream("a"), stream("b"), stream("a")]);
    }

    #[tokio::test]
    async fn test_repeat_queue_wraps_at_tail() {
        let (mut controller, sink, _rx) = recording(RepeatMode::RepeatQueue);
        controller.add_tracks(metas(&["a", "b"]), None).await;
        controller.play(Some(1)).await.unwrap();

        end_current(&mut controller, &sink).await;
        assert_eq!(controller.queue().cursor(), 0);
        assert_eq!(sink.started().last(), Some(&stream("a")));
    }

    #[tokio::test]
    async fn test_error_retries_once_then_advances() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        controller
            .handle_sink_event(SinkEvent::error(sink.last_ticket(), "decoder died"))
            .await;
        assert_eq!(sink.started(), vec![stream("a"), stream("a")]);
        assert_eq!(controller.queue().get(0).unwrap().last_error(), Some("decoder died"));

        controller
            .handle_sink_event(SinkEvent::error(sink.last_ticket(), "decoder died"))
            .await;
        assert_eq!(sink.started(), vec![stream("a"), stream("a"), stream("b")]);
    }

    #[tokio::test]
    async fn test_error_reported_after_end_still_retries_same_track() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b"]), None).await;
        let ticket = sink.last_ticket();
        let failed = errored();

        // songbird dispara `End` y `Error` en el mismo tick, en cualquier orden
        for forward in [Forward::Idle, Forward::Error] {
            if let Some(event) = sink_event_for(ticket, forward, &[&failed]) {
                controller.handle_sink_event(event).await;
            }
        }

        assert_eq!(sink.started(), vec![stream("a"), stream("a")]);
        assert!(controller.queue().get(0).unwrap().last_error().is_some());
        assert_eq!(controller.queue().cursor(), 0);
    }

    #[tokio::test]
    async fn test_recovered_track_gets_a_new_retry_later() {
        let (mut controller, sink, _rx) = recording(RepeatMode::RepeatCurrent);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        controller
            .handle_sink_event(SinkEvent::error(sink.last_ticket(), "X"))
            .await;
        // El reintento arranca bien y termina solo
        controller.handle_sink_event(SinkEvent::started(sink.last_ticket())).await;
        end_current(&mut controller, &sink).await;

        // Mismo error en una vuelta posterior: se reintenta otra vez en lugar de saltar
        controller
            .handle_sink_event(SinkEvent::error(sink.last_ticket(), "X"))
            .await;
        assert_eq!(
            sink.started(),
            vec![stream("a"), stream("a"), stream("a"), stream("a")]
        );
    }

    #[tokio::test]
    async fn test_repeat_current_double_error_moves_on() {
        let (mut controller, sink, _rx) = recording(RepeatMode::RepeatCurrent);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        for _ in 0..2 {
            controller
                .handle_sink_event(SinkEvent::error(sink.last_ticket(), "E"))
                .await;
        }
        assert_eq!(sink.started(), vec![stream("a"), stream("a"), stream("b")]);
        assert_eq!(controller.queue().cursor(), 1);
    }

    #[tokio::test]
    async fn test_forward_next_is_monotonic() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;

        controller.next().await.unwrap();
        controller.next().await.unwrap();
        controller.next().await.unwrap();
        assert_eq!(sink.started(), vec![stream("a"), stream("b"), stream("c")]);
        assert_eq!(controller.queue().cursor(), 2);
    }

    #[tokio::test]
    async fn test_repeat_queue_next_cycles_back_to_start() {
        let (mut controller, _sink, _rx) = recording(RepeatMode::RepeatQueue);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(controller.next().await.unwrap().unwrap().title);
        }
        assert_eq!(seen, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_insert_in_random_mode_does_not_shift_cursor() {
        let (mut controller, _sink, _rx) = recording(RepeatMode::Random);
        controller.add_tracks(metas(&["a", "b"]), None).await;
        let cursor = controller.queue().cursor();

        controller.add_tracks(metas(&["x"]), Some(0)).await;
        assert_eq!(controller.queue().cursor(), cursor);
    }

    #[tokio::test]
    async fn test_started_event_clears_last_error() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        controller
            .handle_sink_event(SinkEvent::error(sink.last_ticket(), "glitch"))
            .await;
        controller.handle_sink_event(SinkEvent::started(sink.last_ticket())).await;
        assert_eq!(controller.queue().get(0).unwrap().last_error(), None);
    }

    #[tokio::test]
    async fn test_removing_current_track_does_not_auto_advance() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;
        let playing = sink.last_ticket();

        let removed = controller.remove_at(0).unwrap();
        assert_eq!(removed.title, "a");
        assert_eq!(sink.calls().last(), Some(&SinkCall::Stop));

        controller.handle_sink_event(SinkEvent::idle(playing)).await;
        assert_eq!(controller.state(), PlayerState::Idle);
        assert_eq!(sink.started().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b", "c"]), None).await;
        let old = sink.last_ticket();

        controller.next().await.unwrap();
        controller.handle_sink_event(SinkEvent::idle(old)).await;
        controller.handle_sink_event(SinkEvent::error(old, "late")).await;

        assert_eq!(controller.state(), PlayerState::Playing);
        assert_eq!(sink.started(), vec![stream("a"), stream("b")]);
    }

    #[tokio::test]
    async fn test_insert_before_cursor_keeps_current_track() {
        let (mut controller, _sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b"]), None).await;
        controller.play(Some(1)).await.unwrap();

        controller.add_tracks(metas(&["x"]), Some(0)).await;
        assert_eq!(controller.queue().cursor(), 2);
        assert_eq!(controller.now_playing().map(|m| m.title.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn test_stop_while_paused_does_not_advance() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        assert!(controller.pause());
        assert!(!controller.pause());
        assert_eq!(controller.state(), PlayerState::Paused);

        controller.stop(false);
        end_current(&mut controller, &sink).await;
        assert_eq!(controller.state(), PlayerState::Idle);
        assert_eq!(sink.started().len(), 1);
    }

    #[tokio::test]
    async fn test_unforced_stop_while_playing_advances() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        controller.stop(false);
        end_current(&mut controller, &sink).await;
        assert_eq!(sink.started(), vec![stream("a"), stream("b")]);
    }

    #[tokio::test]
    async fn test_pause_resume_reach_sink() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a"]), None).await;

        controller.pause();
        assert!(controller.resume());
        assert!(!controller.resume());
        assert_eq!(
            sink.calls()[1..].to_vec(),
            vec![SinkCall::Pause, SinkCall::Resume]
        );
    }

    #[tokio::test]
    async fn test_add_after_queue_finished_plays_new_track() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a"]), None).await;
        end_current(&mut controller, &sink).await;
        assert_eq!(controller.state(), PlayerState::Idle);

        let outcome = controller.add_tracks(metas(&["b"]), None).await;
        assert_eq!(outcome.at, 1);
        assert_eq!(outcome.started.map(|m| m.title), Some("b".to_string()));
        assert_eq!(controller.queue().cursor(), 1);
    }

    #[tokio::test]
    async fn test_broken_track_is_skipped_on_auto_advance() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        controller.add_tracks(metas(&["a", "broken", "c"]), None).await;

        end_current(&mut controller, &sink).await;
        assert_eq!(sink.started(), vec![stream("a"), stream("c")]);
    }

    #[tokio::test]
    async fn test_play_out_of_range_and_missing_stream() {
        let (mut controller, _sink, _rx) = recording(RepeatMode::Forward);
        assert!(matches!(
            controller.play(Some(3)).await,
            Err(PlayerError::IndexOutOfRange { index: 3, len: 0 })
        ));

        controller.add_tracks(metas(&["broken"]), None).await;
        assert!(matches!(
            controller.play(Some(0)).await,
            Err(PlayerError::NoStreamAvailable { .. })
        ));
        assert_eq!(controller.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_buffered_stream_is_used_and_late_results_dropped() {
        let provider = Arc::new(CountingProvider::default());
        let sink = RecordingSink::default();
        let (mut controller, mut rx) =
            controller_with_provider(sink.clone(), RepeatMode::Forward, provider.clone());
        let tracks = metas(&["a", "b"]);
        let b = tracks[1].id;
        controller.add_tracks(tracks, None).await;

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.id, b);
        controller.handle_buffered(outcome);
        assert!(controller.queue().get(1).unwrap().is_cached());

        end_current(&mut controller, &sink).await;
        assert_eq!(sink.started(), vec![stream("a"), stream("b")]);
        assert_eq!(provider.calls("https://x/b.mp3"), 1);

        // Un track ya quitado no recibe nada
        controller.remove_by_id(b).unwrap();
        controller.handle_buffered(BufferOutcome { id: b });
        assert_eq!(controller.queue().index_of(b), None);
        assert_eq!(controller.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_during_prefetch_reuses_the_in_flight_fetch() {
        let provider = Arc::new(CountingProvider::default());
        let sink = RecordingSink::default();
        let (mut controller, mut rx) =
            controller_with_provider(sink.clone(), RepeatMode::Forward, provider.clone());
        controller.add_tracks(metas(&["a", "b"]), None).await;
        assert_eq!(controller.queue().get(1).unwrap().fetch_state(), FetchState::InFlight);

        // next antes de que termine la pre-carga de b
        controller.next().await.unwrap();
        assert_eq!(sink.started(), vec![stream("a"), stream("b")]);
        assert_eq!(provider.calls("https://x/b.mp3"), 1);

        // El aviso tardío no deja un stream abierto en el track que ya suena
        let outcome = rx.recv().await.unwrap();
        controller.handle_buffered(outcome);
        let b = controller.queue().get(1).unwrap();
        assert!(!b.is_cached());
        assert_eq!(b.fetch_state(), FetchState::Idle);
    }

    #[tokio::test]
    async fn test_random_no_repeat_plays_every_track_once_per_round() {
        let (mut controller, sink, _rx) = recording(RepeatMode::RandomNoRepeat);
        controller.add_tracks(metas(&["a", "b", "c", "d"]), None).await;

        for _ in 0..3 {
            end_current(&mut controller, &sink).await;
        }

        let played: HashSet<String> = sink.started().into_iter().collect();
        assert_eq!(sink.started().len(), 4);
        assert_eq!(played.len(), 4);
    }

    #[tokio::test]
    async fn test_set_volume_clamps() {
        let (mut controller, sink, _rx) = recording(RepeatMode::Forward);
        assert_eq!(controller.set_volume(5.0), 2.0);
        assert_eq!(controller.set_volume(-1.0), 0.0);
        // Sin stream activo no se toca el sink
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_reports_position() {
        let (mut controller, _sink, _rx) = recording(RepeatMode::RepeatQueue);
        controller.add_tracks(metas(&["a", "b"]), None).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.tracks.len(), 2);
        assert_eq!(snapshot.now_playing.map(|m| m.title), Some("a".to_string()));
        assert_eq!(snapshot.mode, RepeatMode::RepeatQueue);
        assert_eq!(snapshot.position, Some(Duration::from_secs(42)));
    }

    #[tokio::test]
    async fn test_next_on_empty_queue_never_touches_sink() {
        // Un mock sin expectativas falla ante cualquier llamada
        let (mut controller, _rx) = controller_with(MockAudioSink::new(), RepeatMode::Forward);

        assert!(controller.next().await.unwrap().is_none());
        assert!(controller.prev().await.unwrap().is_none());
        assert_eq!(controller.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_volume_change_rescales_live_stream() {
        let mut sink = MockAudioSink::new();
        sink.expect_start().times(1).returning(|_, _, _| Ok(()));
        sink.expect_set_volume().with(eq(0.5f32)).times(1).return_const(());

        let (mut controller, _rx) = controller_with(sink, RepeatMode::Forward);
        controller.add_tracks(metas(&["a"]), None).await;

        assert_eq!(controller.set_volume(0.5), 0.5);
    }
}
