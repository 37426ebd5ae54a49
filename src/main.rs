use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{input::Input, SerenityInit};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;

use crate::audio::registry::SessionRegistry;
use crate::bot::KamiMusicBot;
use crate::config::Config;
use crate::sources::{DirectUrlClient, SourceKind, SourceRegistry, YouTubeClient};
use crate::storage::{Preference, PreferenceStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kami_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Kami Music v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Preferencias de usuario (solo lectura)
    let preferences = PreferenceStore::new(
        config.data_dir.clone(),
        Preference {
            volume: config.default_volume,
            ..Preference::default()
        },
    )
    .await?;

    // Proveedores de streams: YouTube primero, luego archivos de audio por http(s)
    let http = reqwest::Client::new();
    let sources = Arc::new(
        SourceRegistry::<Input>::new()
            .register(SourceKind::YouTube, Arc::new(YouTubeClient::new(http.clone())))
            .register(SourceKind::DirectUrl, Arc::new(DirectUrlClient::new(http))),
    );

    let sessions = SessionRegistry::new();

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = KamiMusicBot::new(config.clone(), preferences, sources, sessions.clone());

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando sesiones...");
        sessions.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = tokio::process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
