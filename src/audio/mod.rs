//! # Audio Module
//!
//! Núcleo de reproducción por servidor de Kami Music.
//!
//! ## Architecture
//!
//! Cada servidor tiene una sesión con su propio loop. Todo cambio de estado pasa
//! por ese loop, así que los eventos del sink y los comandos nunca se pisan.
//!
//! ### [`session`] - Sesión por servidor
//! - Dueño, bloqueo, canales y vida de la sesión
//! - `SessionHandle` para mandar comandos al loop
//!
//! ### [`player`] - Controlador de reproducción
//! - Arranca, pausa y detiene tracks a través de un [`sink::AudioSink`]
//! - Decide qué hacer cuando un track termina o falla
//!
//! ### [`queue`] y [`repeat`] - Cola y modos de repetición
//! - Cola indexada con cursor circular
//! - Ocho modos, incluido el aleatorio sin repetición (shuffle bag)
//!
//! ### [`buffer`] - Descarga anticipada
//! - Prepara el siguiente stream mientras suena el actual
//! - Reintentos acotados con backoff exponencial
//!
//! ### [`voice`] - Adaptador de songbird
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::audio::registry::SessionRegistry;
//! use serenity::all::GuildId;
//!
//! # async fn example(registry: SessionRegistry) -> anyhow::Result<()> {
//! if let Some(handle) = registry.get(GuildId::new(123)) {
//!     handle.next().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod player;
pub mod queue;
pub mod registry;
pub mod repeat;
pub mod session;
pub mod sink;
pub mod track;
pub mod voice;
pub mod volume;
