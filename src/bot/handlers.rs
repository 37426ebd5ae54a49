use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::{replies, KamiMusicBot};
use crate::{
    audio::{
        repeat::RepeatMode,
        session::SessionHandle,
        track::TrackMetadata,
        volume::{VolumeInput, VolumeUnit},
    },
    error::PlayerError,
    sources::TrackDescription,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &KamiMusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Defer la respuesta ya que algunos comandos tardan (yt-dlp, voz)
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let reply = match command.data.name.as_str() {
        "connect" => handle_connect(ctx, &command, bot, guild_id).await,
        "play" => handle_play(&command, bot, guild_id).await,
        "remove" => handle_remove(&command, bot, guild_id).await,
        "next" => handle_next(&command, bot, guild_id).await,
        "prev" => handle_prev(&command, bot, guild_id).await,
        "pause" => handle_pause(&command, bot, guild_id).await,
        "resume" => handle_resume(&command, bot, guild_id).await,
        "stop" => handle_stop(&command, bot, guild_id).await,
        "repeat" => handle_repeat(&command, bot, guild_id).await,
        "volume" => handle_volume(&command, bot, guild_id).await,
        "lock" => handle_lock(&command, bot, guild_id).await,
        "queue" => handle_queue(bot, guild_id).await,
        _ => Ok("❌ Comando no reconocido".to_string()),
    };

    let content = reply.unwrap_or_else(|e| {
        warn!("⚠️ /{} falló en guild {}: {:#}", command.data.name, guild_id, e);
        format!("❌ {}", e)
    });

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

// Handlers específicos para cada comando

async fn handle_connect(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &KamiMusicBot,
    guild_id: GuildId,
) -> Result<String> {
    let member = command.user.id;
    let voice_channel_id = get_user_voice_channel(ctx, guild_id, member)?;

    let Some(handle) = bot.sessions.get(guild_id).filter(|h| h.session().is_alive()) else {
        bot.start_session(ctx, guild_id, command.channel_id, voice_channel_id, member)
            .await?;
        return Ok(format!("📥 <#{}>", voice_channel_id));
    };

    if !handle.session().can_reconnect(member, Some(voice_channel_id)) {
        return Err(PlayerError::PermissionDenied.into());
    }

    let same_channel = handle.session().voice_channel() == voice_channel_id;
    bot.rebind_session(ctx, &handle, voice_channel_id).await?;

    Ok(if same_channel {
        format!("🔄️ <#{}>", voice_channel_id)
    } else {
        format!("📥 <#{}>", voice_channel_id)
    })
}

async fn handle_play(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    let index = option_index(command, "index");

    let Some(url) = option_str(command, "url") else {
        let track = handle.play(index).await?;
        return Ok(replies::now_playing(&track));
    };

    let source = bot
        .sources
        .detect(url)
        .ok_or_else(|| anyhow::anyhow!("URL no soportada: {}", url))?;

    let description = match bot.sources.describe(&source).await {
        Ok(description) => description,
        Err(e) => {
            warn!("⚠️ Sin metadata para {}: {}", source, e);
            TrackDescription {
                title: url.to_string(),
                duration: None,
            }
        }
    };

    let track = TrackMetadata::new(source, description.title, command.user.id)
        .with_duration(description.duration);
    let outcome = handle.add_tracks(vec![track.clone()], index).await?;

    if outcome.added == 0 {
        return Ok("📛 La cola está llena".to_string());
    }

    Ok(replies::track_added(&track, &outcome))
}

async fn handle_remove(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    let index = option_index(command, "index").ok_or_else(|| anyhow::anyhow!("Índice no proporcionado"))?;

    let removed = handle.remove_at(index).await?;
    Ok(format!("🗑️ **{}** quitada de la cola", removed.title))
}

async fn handle_next(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    let track = handle.next().await?;
    Ok(replies::skipped(track.as_ref(), true))
}

async fn handle_prev(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    let track = handle.prev().await?;
    Ok(replies::skipped(track.as_ref(), false))
}

async fn handle_pause(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    Ok(if handle.pause().await? {
        "⏸️ Reproducción pausada".to_string()
    } else {
        "❌ No hay nada reproduciéndose".to_string()
    })
}

async fn handle_resume(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    Ok(if handle.resume().await? {
        "▶️ Reproducción reanudada".to_string()
    } else {
        "❌ La reproducción no está en pausa".to_string()
    })
}

async fn handle_stop(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    Ok(if handle.stop(true).await? {
        "⏹️ Reproducción detenida".to_string()
    } else {
        "❌ No hay nada reproduciéndose".to_string()
    })
}

async fn handle_repeat(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    let code = option_int(command, "mode").ok_or_else(|| anyhow::anyhow!("Modo no proporcionado"))?;
    let mode = u8::try_from(code)
        .ok()
        .and_then(|code| RepeatMode::try_from(code).ok())
        .ok_or_else(|| anyhow::anyhow!("Modo de repetición desconocido: {}", code))?;

    let mode = handle.set_repeat(mode).await?;
    Ok(format!("🔁 Modo de repetición: {}", mode))
}

async fn handle_volume(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = session_for(bot, guild_id, command.user.id)?;
    let value = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "value")
        .and_then(|opt| opt.value.as_f64())
        .ok_or_else(|| anyhow::anyhow!("Volumen no proporcionado"))?;
    let unit = match option_str(command, "unit") {
        Some(unit) => unit.parse::<VolumeUnit>().map_err(anyhow::Error::msg)?,
        None => VolumeUnit::default(),
    };

    let input = VolumeInput::new(value as f32, unit);
    let applied = handle.set_volume(input.to_scalar()).await?;
    Ok(replies::volume_set(input, applied))
}

async fn handle_lock(command: &CommandInteraction, bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = existing_session(bot, guild_id)?;
    let session = handle.session();

    // Solo el dueño puede cambiar el candado
    if command.user.id != session.owner {
        return Err(PlayerError::PermissionDenied.into());
    }

    Ok(if session.set_locked(!session.is_locked()) {
        "🔒 Reproductor bloqueado".to_string()
    } else {
        "🔓 Reproductor desbloqueado".to_string()
    })
}

async fn handle_queue(bot: &KamiMusicBot, guild_id: GuildId) -> Result<String> {
    let handle = existing_session(bot, guild_id)?;
    let snapshot = handle.snapshot().await?;
    Ok(replies::queue(&snapshot))
}

// Funciones auxiliares

fn existing_session(bot: &KamiMusicBot, guild_id: GuildId) -> Result<SessionHandle> {
    bot.sessions
        .get(guild_id)
        .ok_or_else(|| anyhow::anyhow!("No hay un reproductor en este servidor, usa /connect"))
}

fn session_for(bot: &KamiMusicBot, guild_id: GuildId, member: UserId) -> Result<SessionHandle> {
    let handle = existing_session(bot, guild_id)?;
    handle.authorize(member)?;
    Ok(handle)
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn option_int(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

/// Posición de la cola: el usuario cuenta desde 1, el núcleo desde 0
fn option_index(command: &CommandInteraction, name: &str) -> Option<usize> {
    option_int(command, name).and_then(to_zero_based)
}

fn to_zero_based(position: i64) -> Option<usize> {
    usize::try_from(position).ok()?.checked_sub(1)
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}
