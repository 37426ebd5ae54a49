use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    session::{spawn_session, PlayerSession, SessionHandle, SessionSettings},
    sink::{AudioSink, SinkEventSender},
};
use crate::sources::SourceRegistry;

/// Sesiones vivas, una por servidor.
///
/// Cada sesión se quita sola del registro cuando su loop termina.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<GuildId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Arranca una sesión y la registra. Si ya había una en el servidor, se cierra.
    pub fn spawn<K, F>(
        &self,
        session: PlayerSession,
        make_sink: F,
        sources: Arc<SourceRegistry<K::Stream>>,
        settings: &SessionSettings,
    ) -> SessionHandle
    where
        K: AudioSink,
        F: FnOnce(SinkEventSender) -> K,
    {
        let guild_id = session.guild_id;
        let serial = session.serial();
        let (handle, task) = spawn_session(session, make_sink, sources, settings);

        if let Some(previous) = self.sessions.insert(guild_id, handle.clone()) {
            warn!("♻️ Reemplazando la sesión anterior de guild {}", guild_id);
            tokio::spawn(async move { previous.destroy().await });
        }

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!("💥 La sesión de guild {} terminó con error: {}", guild_id, e);
            }
            if sessions
                .remove_if(&guild_id, |_, h| h.session().serial() == serial)
                .is_some()
            {
                debug!("🗑️ Sesión de guild {} quitada del registro", guild_id);
            }
        });

        handle
    }

    /// Quita y cierra la sesión de un servidor
    pub async fn remove(&self, guild_id: GuildId) -> Option<SessionHandle> {
        let (_, handle) = self.sessions.remove(&guild_id)?;
        handle.destroy().await;
        Some(handle)
    }

    /// Cierra todas las sesiones (al apagar el bot)
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            handle.destroy().await;
            handle.closed().await;
        }
    }
}
