use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::audio::repeat::RepeatMode;

/// Todos los comandos slash del bot
pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        connect_command(),
        play_command(),
        remove_command(),
        next_command(),
        prev_command(),
        pause_command(),
        resume_command(),
        stop_command(),
        repeat_command(),
        volume_command(),
        lock_command(),
        queue_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Comandos de conexión

fn connect_command() -> CreateCommand {
    CreateCommand::new("connect")
        .description("Conecta el reproductor a tu canal de voz (o lo reconecta)")
}

// Comandos de cola

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Agrega una URL a la cola o reproduce una posición de la cola")
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "url",
            "URL de YouTube o de un archivo de audio",
        ))
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "index",
                "Posición en la cola (con url: dónde insertarla)",
            )
            .min_int_value(1),
        )
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Quita una canción de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "index", "Posición en la cola")
                .min_int_value(1)
                .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

// Comandos de control

fn next_command() -> CreateCommand {
    CreateCommand::new("next").description("Salta a la siguiente canción")
}

fn prev_command() -> CreateCommand {
    CreateCommand::new("prev").description("Vuelve a la canción anterior")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción sin pasar a la siguiente")
}

fn repeat_command() -> CreateCommand {
    let mode = RepeatMode::ALL.iter().fold(
        CreateCommandOption::new(CommandOptionType::Integer, "mode", "Modo de repetición").required(true),
        |option, mode| option.add_int_choice(mode.name(), mode.code() as i32),
    );

    CreateCommand::new("repeat")
        .description("Configura el modo de repetición")
        .add_option(mode)
}

// Comandos de audio

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Number, "value", "Nivel de volumen")
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "unit", "Unidad del valor")
                .add_string_choice("Porcentaje", "percentage")
                .add_string_choice("Decibelios", "db")
                .add_string_choice("Logarítmica", "log"),
        )
}

fn lock_command() -> CreateCommand {
    CreateCommand::new("lock")
        .description("Bloquea o desbloquea el reproductor para que solo lo use su dueño")
}
