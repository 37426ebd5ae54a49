use thiserror::Error;

use crate::sources::SourceKind;

/// Errores del núcleo del reproductor.
///
/// Solo `NoStreamAvailable`, `IndexOutOfRange`, `PermissionDenied` y `SessionGone`
/// llegan a la capa de comandos; los fallos de fetch se convierten en reintentos o avances.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no hay stream disponible para '{title}'")]
    NoStreamAvailable { title: String },

    #[error("índice {index} fuera de rango (cola de {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no tienes permiso para interactuar con este reproductor")]
    PermissionDenied,

    #[error("la sesión de este servidor ya no existe")]
    SessionGone,

    #[error("error del sink de audio: {0}")]
    Sink(String),
}

/// Fallos de un proveedor de streams.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("no hay proveedor registrado para {0:?}")]
    UnsupportedSource(SourceKind),

    #[error("tiempo de espera agotado tras {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Resolve(String),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
