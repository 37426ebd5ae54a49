use async_trait::async_trait;
use songbird::{
    events::CoreEvent,
    input::Input,
    tracks::{PlayMode, Track, TrackHandle, TrackState},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    session::SessionHandle,
    sink::{AudioSink, SinkEvent, SinkEventSender, Ticket},
};
use crate::error::PlayerError;

/// Sink de audio sobre una llamada de songbird.
///
/// El volumen de sesión se multiplica por `output_gain` antes de llegar a songbird.
pub struct SongbirdSink {
    call: Arc<Mutex<Call>>,
    events: SinkEventSender,
    output_gain: f32,
    current: Option<TrackHandle>,
}

impl SongbirdSink {
    pub fn new(call: Arc<Mutex<Call>>, events: SinkEventSender, output_gain: f32) -> Self {
        Self {
            call,
            events,
            output_gain,
            current: None,
        }
    }

    fn scaled(&self, volume: f32) -> f32 {
        volume * self.output_gain
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    type Stream = Input;

    async fn start(&mut self, ticket: Ticket, stream: Input, volume: f32) -> Result<(), PlayerError> {
        if let Some(previous) = self.current.take() {
            let _ = previous.stop();
        }

        let handle = {
            let mut call = self.call.lock().await;
            call.play(Track::from(stream).volume(self.scaled(volume)))
        };

        for (event, forward) in TRACK_EVENTS {
            let handler = TrackEventForwarder {
                ticket,
                forward,
                events: self.events.clone(),
            };
            if let Err(e) = handle.add_event(Event::Track(event), handler) {
                let _ = handle.stop();
                return Err(PlayerError::Sink(format!("{:?}", e)));
            }
        }

        self.current = Some(handle);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.pause() {
                warn!("No se pudo pausar el track: {:?}", e);
            }
        }
    }

    fn resume(&mut self) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.play() {
                warn!("No se pudo reanudar el track: {:?}", e);
            }
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            if let Err(e) = handle.stop() {
                debug!("El track ya había terminado: {:?}", e);
            }
        }
    }

    fn set_volume(&mut self, volume: f32) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.set_volume(self.scaled(volume)) {
                warn!("No se pudo cambiar el volumen: {:?}", e);
            }
        }
    }

    async fn position(&self) -> Option<Duration> {
        let handle = self.current.as_ref()?;
        handle.get_info().await.ok().map(|state| state.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Forward {
    Started,
    Idle,
    Error,
}

/// `Playable` marca el arranque del track; `Play` solo llega al reanudar una pausa
const TRACK_EVENTS: [(TrackEvent, Forward); 4] = [
    (TrackEvent::Playable, Forward::Started),
    (TrackEvent::Play, Forward::Started),
    (TrackEvent::End, Forward::Idle),
    (TrackEvent::Error, Forward::Error),
];

/// Reenvía los eventos de un track al loop de la sesión, marcados con su ticket
struct TrackEventForwarder {
    ticket: Ticket,
    forward: Forward,
    events: SinkEventSender,
}

#[async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let states: Vec<&TrackState> = match ctx {
            EventContext::Track(track_list) => track_list.iter().map(|(state, _handle)| *state).collect(),
            _ => Vec::new(),
        };

        let Some(event) = sink_event_for(self.ticket, self.forward, &states) else {
            debug!("Fin de track con error, se espera el evento de error");
            return None;
        };

        if self.events.send(event).is_err() {
            debug!("Evento de track sin sesión que lo reciba");
        }

        None
    }
}

/// Traduce un evento de songbird al evento del sink.
///
/// songbird dispara `End` junto con `Error` cuando un track falla; ese `End` no se
/// reenvía para que la sesión aplique la política de error y no la de fin natural.
pub(super) fn sink_event_for(ticket: Ticket, forward: Forward, states: &[&TrackState]) -> Option<SinkEvent> {
    match forward {
        Forward::Started => Some(SinkEvent::started(ticket)),
        Forward::Idle if ended_with_error(states) => None,
        Forward::Idle => Some(SinkEvent::idle(ticket)),
        Forward::Error => Some(SinkEvent::error(ticket, play_error_message(states))),
    }
}

fn ended_with_error(states: &[&TrackState]) -> bool {
    states
        .iter()
        .any(|state| matches!(state.playing, PlayMode::Errored(_)))
}

fn play_error_message(states: &[&TrackState]) -> String {
    states
        .iter()
        .find_map(|state| match &state.playing {
            PlayMode::Errored(e) => Some(format!("{:?}", e)),
            _ => None,
        })
        .unwrap_or_else(|| "error de reproducción desconocido".to_string())
}

/// Avisa a la sesión cuando el driver de voz se cae o vuelve
struct ConnectionWatcher {
    session: SessionHandle,
    lost: bool,
}

#[async_trait]
impl VoiceEventHandler for ConnectionWatcher {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let result = if self.lost {
            self.session.disconnected().await
        } else {
            self.session.reconnected(None).await
        };

        if result.is_err() {
            debug!("Evento de conexión para una sesión ya cerrada");
        }

        None
    }
}

/// Registra los eventos de conexión de una llamada para la sesión.
/// Quita los de sesiones anteriores en el mismo servidor.
pub fn register_connection_events(call: &mut Call, session: &SessionHandle) {
    call.remove_all_global_events();

    call.add_global_event(
        Event::Core(CoreEvent::DriverDisconnect),
        ConnectionWatcher {
            session: session.clone(),
            lost: true,
        },
    );

    for event in [CoreEvent::DriverConnect, CoreEvent::DriverReconnect] {
        call.add_global_event(
            Event::Core(event),
            ConnectionWatcher {
                session: session.clone(),
                lost: false,
            },
        );
    }
}
