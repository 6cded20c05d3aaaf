use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId},
    },
    prelude::{Context, Mentionable},
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{
        player::{SessionError, SessionInit},
        queue::{Song, MAX_VOLUME},
        session::{can_modify_queue, Control, Feedback, Invoker},
        voice::{member_channel, SongbirdConnection},
    },
    bot::MusicBot,
    sources::{ytdlp, SourceError},
    ui::{embeds, reactions::DiscordChat},
};

/// Intentos de crear/encolar cuando la sesión anterior se está cerrando.
const PLAY_ATTEMPTS: usize = 3;

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        reply(ctx, &command, bot.controller.locale().t("common.guildOnly"), true).await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await?,
        name => match control_for_command(name) {
            Some(control) => handle_control(ctx, &command, bot, guild_id, control).await?,
            None => {
                warn!("Comando desconocido: {}", name);
                reply(ctx, &command, "❌ Comando no reconocido".to_string(), true).await?;
            }
        },
    }

    Ok(())
}

fn control_for_command(name: &str) -> Option<Control> {
    match name {
        "skip" => Some(Control::Skip),
        "pause" => Some(Control::Pause),
        "resume" => Some(Control::Resume),
        "loop" => Some(Control::ToggleLoop),
        "shuffle" => Some(Control::Shuffle),
        "stop" => Some(Control::Stop),
        _ => None,
    }
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: String, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

async fn edit_reply(ctx: &Context, command: &CommandInteraction, content: String) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

fn invoker(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Invoker {
    Invoker {
        user: command.user.id,
        voice_channel: member_channel(ctx, guild_id, command.user.id),
    }
}

/// Comprueba que haya sesión y que el usuario esté en su canal de voz;
/// responde el error y devuelve `None` si no.
async fn require_session_member(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<Option<Invoker>> {
    let locale = bot.controller.locale();

    let Some(session_channel) = bot.controller.voice_channel(guild_id) else {
        reply(ctx, command, locale.t("common.errorNotQueue"), true).await?;
        return Ok(None);
    };

    let invoker = invoker(ctx, command, guild_id);
    if !can_modify_queue(invoker.voice_channel, session_channel) {
        reply(ctx, command, locale.t("common.errorNotChannel"), true).await?;
        return Ok(None);
    }

    Ok(Some(invoker))
}

async fn handle_control(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
    control: Control,
) -> Result<()> {
    let Some(invoker) = require_session_member(ctx, command, bot, guild_id).await? else {
        return Ok(());
    };

    let locale = bot.controller.locale();
    match bot.controller.control(guild_id, control, invoker).await {
        Ok(Feedback::Message(text)) => reply(ctx, command, text, false).await,
        Ok(Feedback::Denied) => reply(ctx, command, locale.t("common.errorNotChannel"), true).await,
        Ok(Feedback::Ignored) => reply(ctx, command, locale.t(ignored_key(control)), true).await,
        Err(_) => reply(ctx, command, locale.t("common.errorNotQueue"), true).await,
    }
}

/// Respuesta cuando el control no cambia nada en la sesión.
fn ignored_key(control: Control) -> &'static str {
    match control {
        Control::Pause => "pause.alreadyPaused",
        Control::Resume => "resume.notPaused",
        Control::SetVolume(_) => "volume.errorNotValid",
        _ => "common.errorNotQueue",
    }
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let locale = bot.controller.locale();

    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_i64());

    let Some(level) = level else {
        return match bot.controller.status(guild_id).await {
            Some(status) => {
                let volume = status.volume.to_string();
                reply(ctx, command, locale.tf("volume.currentVolume", &[("volume", volume.as_str())]), false).await
            }
            None => reply(ctx, command, locale.t("common.errorNotQueue"), true).await,
        };
    };

    let Some(level) = u8::try_from(level).ok().filter(|v| *v <= MAX_VOLUME) else {
        return reply(ctx, command, locale.t("volume.errorNotValid"), true).await;
    };

    handle_control(ctx, command, bot, guild_id, Control::SetVolume(level)).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let status = bot.controller.status(guild_id).await;
    let embed = embeds::create_queue_embed(bot.controller.locale(), status.as_ref());

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let locale = bot.controller.locale();

    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let Some(user_channel) = member_channel(ctx, guild_id, command.user.id) else {
        return reply(ctx, command, locale.t("play.errorNotInChannel"), true).await;
    };

    if let Some(session_channel) = bot.controller.voice_channel(guild_id) {
        if session_channel != user_channel {
            return reply(ctx, command, locale.t("common.errorNotChannel"), true).await;
        }
    }

    // yt-dlp puede tardar más que el límite de respuesta de Discord
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let song = match ytdlp::resolve_song(&query, command.user.id).await {
        Ok(song) => song,
        Err(SourceError::NotFound(_)) => {
            return edit_reply(ctx, command, locale.tf("play.errorNoResults", &[("query", query.as_str())])).await;
        }
        Err(e) => {
            warn!("❌ No se pudo resolver {}: {}", query, e);
            let error = e.to_string();
            return edit_reply(ctx, command, locale.tf("play.queueError", &[("error", error.as_str())])).await;
        }
    };

    let added = locale.tf(
        "play.queueAdded",
        &[
            ("title", song.title.as_str()),
            ("author", command.user.id.mention().to_string().as_str()),
        ],
    );

    match enqueue_or_start(ctx, command, bot, guild_id, user_channel, song).await {
        Ok(()) => edit_reply(ctx, command, added).await,
        Err(PlayError::Session(SessionError::QueueFull(full))) => {
            let max = full.max.to_string();
            edit_reply(ctx, command, locale.tf("play.queueFull", &[("max", max.as_str())])).await
        }
        Err(PlayError::Join(error)) => {
            edit_reply(ctx, command, locale.tf("play.cantJoinChannel", &[("error", error.as_str())])).await
        }
        Err(PlayError::Session(e)) => {
            let error = e.to_string();
            edit_reply(ctx, command, locale.tf("play.queueError", &[("error", error.as_str())])).await
        }
    }
}

enum PlayError {
    Session(SessionError),
    Join(String),
}

/// Encola en la sesión activa o crea una nueva conectándose al canal.
async fn enqueue_or_start(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
    voice_channel: ChannelId,
    song: Song,
) -> Result<(), PlayError> {
    let mut last = SessionError::NoSession;

    for _ in 0..PLAY_ATTEMPTS {
        if bot.controller.has_session(guild_id) {
            match bot.controller.enqueue(guild_id, song.clone()).await {
                Ok(position) => {
                    info!("➕ {} en posición {} (guild {})", song.title, position, guild_id);
                    return Ok(());
                }
                // la sesión terminó entre la consulta y el envío
                Err(e @ (SessionError::NoSession | SessionError::Closed)) => {
                    last = e;
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => return Err(PlayError::Session(e)),
            }
        }

        let voice = SongbirdConnection::join(ctx, guild_id, voice_channel)
            .await
            .map_err(|e| PlayError::Join(e.to_string()))?;

        let init = SessionInit {
            text_channel: command.channel_id,
            voice_channel,
            voice: Arc::new(voice),
            chat: Arc::new(DiscordChat::new(ctx.clone())),
        };

        match bot.controller.start(guild_id, song.clone(), init) {
            Ok(()) => return Ok(()),
            Err(e @ SessionError::AlreadyActive) => {
                last = e;
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(PlayError::Session(e)),
        }
    }

    Err(PlayError::Session(last))
}
