use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use super::track::TrackId;
use crate::error::PlayerError;

/// Identifica una llamada concreta a `AudioSink::start`.
///
/// Los eventos de un stream reemplazado o detenido llegan con un ticket viejo
/// y el controlador los descarta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub playback: u64,
    pub track: TrackId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEventKind {
    Started,
    Idle,
    Error(String),
}

/// Evento terminal (o de arranque) emitido por el sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkEvent {
    pub ticket: Ticket,
    pub kind: SinkEventKind,
}

impl SinkEvent {
    pub fn started(ticket: Ticket) -> Self {
        Self {
            ticket,
            kind: SinkEventKind::Started,
        }
    }

    pub fn idle(ticket: Ticket) -> Self {
        Self {
            ticket,
            kind: SinkEventKind::Idle,
        }
    }

    pub fn error(ticket: Ticket, message: impl Into<String>) -> Self {
        Self {
            ticket,
            kind: SinkEventKind::Error(message.into()),
        }
    }
}

pub type SinkEventSender = mpsc::UnboundedSender<SinkEvent>;
pub type SinkEventReceiver = mpsc::UnboundedReceiver<SinkEvent>;

/// Salida de audio que maneja el controlador.
///
/// Los eventos se reportan por el `SinkEventSender` que recibe el sink al construirse.
#[cfg_attr(test, mockall::automock(type Stream = String;))]
#[async_trait]
pub trait AudioSink: Send + 'static {
    type Stream: Send + 'static;

    /// Empieza a reproducir `stream`, reemplazando lo que estuviera sonando
    async fn start(&mut self, ticket: Ticket, stream: Self::Stream, volume: f32) -> Result<(), PlayerError>;

    fn pause(&mut self);

    fn resume(&mut self);

    fn stop(&mut self);

    /// Reescala el volumen del stream activo sin reiniciarlo
    fn set_volume(&mut self, volume: f32);

    /// Posición del stream activo
    async fn position(&self) -> Option<Duration>;
}
