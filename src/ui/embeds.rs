use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{audio::session::SessionStatus, i18n::Locale};

/// Canciones listadas en "a continuación" antes de resumir el resto.
const UP_NEXT_LIMIT: usize = 10;

/// Paleta de colores del bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Crea el embed de `/queue` a partir del estado de la sesión.
pub fn create_queue_embed(locale: &Locale, status: Option<&SessionStatus>) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title(locale.t("queue.title"))
        .timestamp(Timestamp::now());

    let Some(status) = status.filter(|s| !s.songs.is_empty()) else {
        return embed
            .description(locale.t("queue.empty"))
            .color(colors::NEUTRAL_GRAY);
    };

    let loop_state = if status.looping {
        locale.t("loop.on")
    } else {
        locale.t("loop.off")
    };
    let volume = if status.muted {
        "0".to_string()
    } else {
        status.volume.to_string()
    };

    let mut embed = embed
        .color(queue_colour(status))
        .footer(CreateEmbedFooter::new(locale.tf(
            "queue.footer",
            &[("volume", volume.as_str()), ("loop", loop_state.as_str())],
        )));

    let mut upcoming = status.songs.iter();

    if let Some(current) = status.now_playing() {
        upcoming.next();
        embed = embed.field(
            format!("▶️ {}", locale.t("queue.current")),
            format!("**[{}]({})**{}", current.title, current.url, duration_suffix(current.duration)),
            false,
        );

        if let Some(thumbnail) = &current.thumbnail {
            embed = embed.thumbnail(thumbnail);
        }
    }

    let rest: Vec<_> = upcoming.collect();
    if !rest.is_empty() {
        let mut description = String::new();

        for (i, song) in rest.iter().take(UP_NEXT_LIMIT).enumerate() {
            description.push_str(&format!(
                "**{}**. {}{} · <@{}>\n",
                i + 1,
                song.title,
                duration_suffix(song.duration),
                song.requested_by
            ));
        }

        if rest.len() > UP_NEXT_LIMIT {
            let count = (rest.len() - UP_NEXT_LIMIT).to_string();
            description.push_str(&locale.tf("queue.more", &[("count", count.as_str())]));
        }

        embed = embed.field(format!("📋 {}", locale.t("queue.upNext")), description, false);
    }

    embed
}

fn queue_colour(status: &SessionStatus) -> Colour {
    if status.now_playing().is_some() {
        colors::SUCCESS_GREEN
    } else {
        colors::INFO_BLUE
    }
}

fn duration_suffix(duration: Option<Duration>) -> String {
    match duration.filter(|d| !d.is_zero()) {
        Some(duration) => format!(" `[{}]`", format_duration(duration)),
        None => " `[🔴]`".to_string(),
    }
}

/// Formatea una duración como `m:ss` o `h:mm:ss`.
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
