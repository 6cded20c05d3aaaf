use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod i18n;
mod sources;
mod ui;

use crate::audio::player::{PlaybackController, PlaybackSettings};
use crate::bot::MusicBot;
use crate::config::Config;
use crate::i18n::Locale;
use crate::sources::{ytdlp, SourceManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reaction_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Reaction Jukebox v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let locale = Arc::new(Locale::load(&config.locale)?);
    info!("🌐 Idioma: {}", locale.name());

    let sources = Arc::new(SourceManager::new(&config, reqwest::Client::new()));
    let controller = PlaybackController::new(sources, locale, PlaybackSettings::from(config.as_ref()));

    // Intents necesarios para comandos, voz y reacciones
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS;

    let handler = MusicBot::new(config.clone(), controller);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Verifica que yt-dlp y ffmpeg estén instalados.
async fn health_check() -> Result<()> {
    let yt_dlp = ytdlp::is_available("yt-dlp", "--version").await;
    let ffmpeg = ytdlp::is_available("ffmpeg", "-version").await;

    if yt_dlp && ffmpeg {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes (yt-dlp: {}, ffmpeg: {})", yt_dlp, ffmpeg);
    }
}
