//! # Bot Module
//!
//! Capa de Discord de Kami Music: traduce comandos slash en llamadas al
//! [`SessionRegistry`] y responde con texto plano.
//!
//! ## Architecture
//!
//! [`KamiMusicBot`] implementa el [`EventHandler`] de Serenity y es dueño de:
//!
//! - El registro de sesiones por servidor
//! - Los proveedores de streams (YouTube y URLs directas)
//! - El lector de preferencias de usuario
//!
//! La voz la maneja songbird; cada sesión recibe un [`SongbirdSink`] sobre la
//! llamada del servidor.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, UserId, VoiceState},
    async_trait,
};
use songbird::{input::Input, Songbird};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod replies;

use crate::{
    audio::{
        registry::SessionRegistry,
        session::{PlayerSession, SessionHandle},
        voice::{register_connection_events, SongbirdSink},
    },
    config::Config,
    sources::SourceRegistry,
    storage::PreferenceStore,
};

/// Handler principal del bot.
///
/// Todo lo que toca una sesión pasa por su `SessionHandle`; el bot no guarda
/// estado de reproducción propio.
pub struct KamiMusicBot {
    /// Configuración cargada del entorno
    config: Arc<Config>,
    /// Preferencias de usuario (solo lectura)
    preferences: PreferenceStore,
    /// Proveedores de streams
    pub sources: Arc<SourceRegistry<Input>>,
    /// Sesiones vivas por servidor
    pub sessions: SessionRegistry,
}

impl KamiMusicBot {
    pub fn new(
        config: Config,
        preferences: PreferenceStore,
        sources: Arc<SourceRegistry<Input>>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            config: Arc::new(config),
            preferences,
            sources,
            sessions,
        }
    }

    /// Registra los comandos slash: por guild si hay `GUILD_ID`, si no globales.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Une el bot al canal de voz y abre una sesión con las preferencias del dueño.
    pub async fn start_session(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        text_channel: ChannelId,
        voice_channel: ChannelId,
        owner: UserId,
    ) -> Result<SessionHandle> {
        let manager = voice_manager(ctx).await?;
        let call = manager.join(guild_id, voice_channel).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            anyhow::anyhow!("Error al conectar al canal de voz")
        })?;

        let preference = self.preferences.resolve(owner, guild_id).await;
        let settings = self.config.session_settings(preference.volume, preference.repeat);
        let session = PlayerSession::new(guild_id, text_channel, voice_channel, owner, preference.locked);

        let output_gain = self.config.output_gain;
        let sink_call = call.clone();
        let handle = self.sessions.spawn(
            session,
            move |events| SongbirdSink::new(sink_call, events, output_gain),
            self.sources.clone(),
            &settings,
        );

        register_connection_events(&mut *call.lock().await, &handle);
        self.leave_voice_when_closed(manager, handle.clone());

        info!("🔊 Conectado al canal de voz {} en guild {}", voice_channel, guild_id);
        Ok(handle)
    }

    /// Vuelve a unir una sesión existente a un canal de voz
    pub async fn rebind_session(&self, ctx: &Context, handle: &SessionHandle, voice_channel: ChannelId) -> Result<()> {
        let manager = voice_manager(ctx).await?;
        let call = manager.join(handle.guild_id(), voice_channel).await.map_err(|e| {
            error!("Error al reconectar la voz: {:?}", e);
            anyhow::anyhow!("Error al conectar al canal de voz")
        })?;

        register_connection_events(&mut *call.lock().await, handle);
        handle.reconnected(Some(voice_channel)).await?;

        info!("🔄 Sesión de guild {} unida a {}", handle.guild_id(), voice_channel);
        Ok(())
    }

    /// Cuando el loop de la sesión termina, el bot deja el canal de voz.
    /// Si otra sesión ya ocupó el servidor, la llamada se deja como está.
    fn leave_voice_when_closed(&self, manager: Arc<Songbird>, handle: SessionHandle) {
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            handle.closed().await;

            let guild_id = handle.guild_id();
            let replaced = sessions
                .get(guild_id)
                .is_some_and(|current| current.session().serial() != handle.session().serial());
            if replaced {
                debug!("La guild {} ya tiene otra sesión, se mantiene la voz", guild_id);
                return;
            }

            match manager.remove(guild_id).await {
                Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", guild_id),
                Err(e) => debug!("La llamada de guild {} ya no existía: {:?}", guild_id, e),
            }
        });
    }
}

async fn voice_manager(ctx: &Context) -> Result<Arc<Songbird>> {
    songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))
}

#[async_trait]
impl EventHandler for KamiMusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Sigue el estado de voz del propio bot: desconexiones y movimientos de canal
    /// llegan a la sesión como `disconnected` / `reconnected`.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(handle) = self.sessions.get(guild_id) else {
            return;
        };

        let result = match new.channel_id {
            None if old.is_some() => {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                handle.disconnected().await
            }
            Some(channel) if channel != handle.session().voice_channel() => {
                info!("🔀 Bot movido a {} en guild {}", channel, guild_id);
                handle.reconnected(Some(channel)).await
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            debug!("Estado de voz para una sesión cerrada: {}", e);
        }
    }
}
