use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use super::{
    buffer::{BufferPipeline, BufferReceiver, RetryPolicy},
    player::{AddOutcome, PlaybackController, PlaybackSettings, PlayerSnapshot},
    repeat::{RepeatMode, RepeatPolicy},
    sink::{AudioSink, SinkEventReceiver, SinkEventSender},
    track::{TrackId, TrackMetadata},
};
use crate::{
    error::{PlayerError, PlayerResult},
    sources::SourceRegistry,
};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Datos de vinculación de una sesión: servidor, canales, dueño y candado.
///
/// Se comparte entre el loop de la sesión y sus handles; lo mutable es atómico.
#[derive(Debug)]
pub struct PlayerSession {
    serial: u64,
    pub guild_id: GuildId,
    pub text_channel: ChannelId,
    pub owner: UserId,
    voice_channel: AtomicU64,
    locked: AtomicBool,
    alive: AtomicBool,
}

impl PlayerSession {
    pub fn new(
        guild_id: GuildId,
        text_channel: ChannelId,
        voice_channel: ChannelId,
        owner: UserId,
        locked: bool,
    ) -> Self {
        Self {
            serial: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            guild_id,
            text_channel,
            owner,
            voice_channel: AtomicU64::new(voice_channel.get()),
            locked: AtomicBool::new(locked),
            alive: AtomicBool::new(true),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn voice_channel(&self) -> ChannelId {
        ChannelId::new(self.voice_channel.load(Ordering::Acquire))
    }

    fn set_voice_channel(&self, channel: ChannelId) {
        self.voice_channel.store(channel.get(), Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, locked: bool) -> bool {
        self.locked.store(locked, Ordering::Release);
        locked
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Sin candado cualquiera puede usar el reproductor; con candado, solo el dueño
    pub fn can_interact(&self, member: UserId) -> bool {
        !self.is_locked() || member == self.owner
    }

    /// Quién puede volver a vincular la sesión a un canal de voz: el dueño de una
    /// sesión con candado o alguien que esté en el canal actual de la sesión
    pub fn can_reconnect(&self, member: UserId, member_voice: Option<ChannelId>) -> bool {
        (self.is_locked() && member == self.owner) || member_voice == Some(self.voice_channel())
    }
}

/// Todo lo que necesita una sesión al arrancar
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub playback: PlaybackSettings,
    pub repeat: RepeatMode,
    pub retry: RetryPolicy,
    pub stream_timeout: Duration,
    pub reconnect_grace: Duration,
    pub command_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            playback: PlaybackSettings::default(),
            repeat: RepeatMode::Forward,
            retry: RetryPolicy::default(),
            stream_timeout: Duration::from_secs(30),
            reconnect_grace: Duration::from_secs(5),
            command_buffer: 32,
        }
    }
}

enum SessionCommand {
    AddTracks {
        tracks: Vec<TrackMetadata>,
        at: Option<usize>,
        reply: oneshot::Sender<AddOutcome>,
    },
    RemoveAt {
        index: usize,
        reply: oneshot::Sender<PlayerResult<TrackMetadata>>,
    },
    RemoveById {
        id: TrackId,
        reply: oneshot::Sender<PlayerResult<TrackMetadata>>,
    },
    Play {
        index: Option<usize>,
        reply: oneshot::Sender<PlayerResult<TrackMetadata>>,
    },
    Next {
        reply: oneshot::Sender<PlayerResult<Option<TrackMetadata>>>,
    },
    Prev {
        reply: oneshot::Sender<PlayerResult<Option<TrackMetadata>>>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        force: bool,
        reply: oneshot::Sender<bool>,
    },
    SetRepeat {
        mode: RepeatMode,
        reply: oneshot::Sender<RepeatMode>,
    },
    SetVolume {
        volume: f32,
        reply: oneshot::Sender<f32>,
    },
    Snapshot {
        reply: oneshot::Sender<PlayerSnapshot>,
    },
    Disconnected,
    Reconnected {
        voice_channel: Option<ChannelId>,
    },
    Destroy,
}

/// Acceso clonable a una sesión viva. Tras el cierre todo devuelve `SessionGone`.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<PlayerSession>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn session(&self) -> &PlayerSession {
        &self.session
    }

    pub fn guild_id(&self) -> GuildId {
        self.session.guild_id
    }

    pub fn authorize(&self, member: UserId) -> PlayerResult<()> {
        if self.session.can_interact(member) {
            Ok(())
        } else {
            Err(PlayerError::PermissionDenied)
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> PlayerResult<T> {
        if !self.session.is_alive() {
            return Err(PlayerError::SessionGone);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| PlayerError::SessionGone)?;
        response.await.map_err(|_| PlayerError::SessionGone)
    }

    async fn notify(&self, command: SessionCommand) -> PlayerResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PlayerError::SessionGone)
    }

    pub async fn add_tracks(&self, tracks: Vec<TrackMetadata>, at: Option<usize>) -> PlayerResult<AddOutcome> {
        self.request(|reply| SessionCommand::AddTracks { tracks, at, reply })
            .await
    }

    pub async fn remove_at(&self, index: usize) -> PlayerResult<TrackMetadata> {
        self.request(|reply| SessionCommand::RemoveAt { index, reply })
            .await?
    }

    pub async fn remove_by_id(&self, id: TrackId) -> PlayerResult<TrackMetadata> {
        self.request(|reply| SessionCommand::RemoveById { id, reply })
            .await?
    }

    pub async fn play(&self, index: Option<usize>) -> PlayerResult<TrackMetadata> {
        self.request(|reply| SessionCommand::Play { index, reply })
            .await?
    }

    pub async fn next(&self) -> PlayerResult<Option<TrackMetadata>> {
        self.request(|reply| SessionCommand::Next { reply }).await?
    }

    pub async fn prev(&self) -> PlayerResult<Option<TrackMetadata>> {
        self.request(|reply| SessionCommand::Prev { reply }).await?
    }

    pub async fn pause(&self) -> PlayerResult<bool> {
        self.request(|reply| SessionCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> PlayerResult<bool> {
        self.request(|reply| SessionCommand::Resume { reply }).await
    }

    pub async fn stop(&self, force: bool) -> PlayerResult<bool> {
        self.request(|reply| SessionCommand::Stop { force, reply })
            .await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> PlayerResult<RepeatMode> {
        self.request(|reply| SessionCommand::SetRepeat { mode, reply })
            .await
    }

    pub async fn set_volume(&self, volume: f32) -> PlayerResult<f32> {
        self.request(|reply| SessionCommand::SetVolume { volume, reply })
            .await
    }

    pub async fn snapshot(&self) -> PlayerResult<PlayerSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Se perdió la conexión de voz: empieza la ventana de gracia
    pub async fn disconnected(&self) -> PlayerResult<()> {
        self.notify(SessionCommand::Disconnected).await
    }

    /// La conexión volvió (opcionalmente a otro canal): se cancela el cierre pendiente
    pub async fn reconnected(&self, voice_channel: Option<ChannelId>) -> PlayerResult<()> {
        self.notify(SessionCommand::Reconnected { voice_channel }).await
    }

    pub async fn destroy(&self) {
        if self.notify(SessionCommand::Destroy).await.is_err() {
            debug!("La sesión de {} ya estaba cerrada", self.session.guild_id);
        }
    }

    /// Termina cuando el loop de la sesión se cerró
    pub async fn closed(&self) {
        self.commands.closed().await
    }
}

/// Arranca el loop de una sesión. `make_sink` recibe el canal por el que el sink
/// debe reportar sus eventos.
pub fn spawn_session<K, F>(
    session: PlayerSession,
    make_sink: F,
    sources: Arc<SourceRegistry<K::Stream>>,
    settings: &SessionSettings,
) -> (SessionHandle, JoinHandle<()>)
where
    K: AudioSink,
    F: FnOnce(SinkEventSender) -> K,
{
    let session = Arc::new(session);
    let (command_tx, command_rx) = mpsc::channel(settings.command_buffer.max(1));
    let (sink_tx, sink_rx) = mpsc::unbounded_channel();
    let (buffer_tx, buffer_rx) = mpsc::unbounded_channel();

    let buffer = BufferPipeline::new(sources, buffer_tx, settings.retry, settings.stream_timeout);
    let controller = PlaybackController::new(
        make_sink(sink_tx),
        buffer,
        RepeatPolicy::new(settings.repeat),
        settings.playback,
    );

    let runtime = SessionRuntime {
        session: session.clone(),
        controller,
        commands: command_rx,
        sink_events: sink_rx,
        buffered: buffer_rx,
        grace: settings.reconnect_grace,
    };
    let task = tokio::spawn(runtime.run());

    (
        SessionHandle {
            session,
            commands: command_tx,
        },
        task,
    )
}

struct SessionRuntime<K: AudioSink> {
    session: Arc<PlayerSession>,
    controller: PlaybackController<K>,
    commands: mpsc::Receiver<SessionCommand>,
    sink_events: SinkEventReceiver,
    buffered: BufferReceiver,
    grace: Duration,
}

impl<K: AudioSink> SessionRuntime<K> {
    async fn run(self) {
        let SessionRuntime {
            session,
            mut controller,
            mut commands,
            mut sink_events,
            mut buffered,
            grace,
        } = self;
        let mut teardown_at: Option<Instant> = None;

        info!("🎧 Sesión iniciada en guild {}", session.guild_id);

        loop {
            tokio::select! {
                biased;

                Some(event) = sink_events.recv() => controller.handle_sink_event(event).await,
                Some(outcome) = buffered.recv() => controller.handle_buffered(outcome),
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("No quedan handles para la sesión de {}", session.guild_id);
                        break;
                    };
                    let flow = dispatch(&mut controller, &session, &mut teardown_at, grace, command).await;
                    if flow.is_break() {
                        break;
                    }
                }
                _ = wait_until(teardown_at) => {
                    warn!("⌛ Sin reconexión en {:?}, cerrando la sesión de {}", grace, session.guild_id);
                    break;
                }
            }
        }

        session.alive.store(false, Ordering::Release);
        commands.close();
        controller.shutdown();
        info!("👋 Sesión cerrada en guild {}", session.guild_id);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn dispatch<K: AudioSink>(
    controller: &mut PlaybackController<K>,
    session: &PlayerSession,
    teardown_at: &mut Option<Instant>,
    grace: Duration,
    command: SessionCommand,
) -> ControlFlow<()> {
    // Si quien pidió algo ya no espera la respuesta, no pasa nada
    match command {
        SessionCommand::AddTracks { tracks, at, reply } => {
            let _ = reply.send(controller.add_tracks(tracks, at).await);
        }
        SessionCommand::RemoveAt { index, reply } => {
            let _ = reply.send(controller.remove_at(index));
        }
        SessionCommand::RemoveById { id, reply } => {
            let _ = reply.send(controller.remove_by_id(id));
        }
        SessionCommand::Play { index, reply } => {
            let _ = reply.send(controller.play(index).await);
        }
        SessionCommand::Next { reply } => {
            let _ = reply.send(controller.next().await);
        }
        SessionCommand::Prev { reply } => {
            let _ = reply.send(controller.prev().await);
        }
        SessionCommand::Pause { reply } => {
            let _ = reply.send(controller.pause());
        }
        SessionCommand::Resume { reply } => {
            let _ = reply.send(controller.resume());
        }
        SessionCommand::Stop { force, reply } => {
            let _ = reply.send(controller.stop(force));
        }
        SessionCommand::SetRepeat { mode, reply } => {
            let _ = reply.send(controller.set_repeat(mode));
        }
        SessionCommand::SetVolume { volume, reply } => {
            let _ = reply.send(controller.set_volume(volume));
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(controller.snapshot().await);
        }
        SessionCommand::Disconnected => {
            if teardown_at.is_none() {
                warn!(
                    "🔌 Voz desconectada en guild {}, esperando reconexión {:?}",
                    session.guild_id, grace
                );
                *teardown_at = Some(Instant::now() + grace);
            }
        }
        SessionCommand::Reconnected { voice_channel } => {
            if let Some(channel) = voice_channel {
                session.set_voice_channel(channel);
            }
            if teardown_at.take().is_some() {
                info!("🔌 Voz reconectada en guild {}", session.guild_id);
            }
        }
        SessionCommand::Destroy => {
            info!("🧹 Cerrando la sesión de guild {} a pedido", session.guild_id);
            return ControlFlow::Break(());
        }
    }

    ControlFlow::Continue(())
}
