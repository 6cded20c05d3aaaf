use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::i18n::Locale;

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context, locale: &Locale) -> Result<()> {
    for command in all_commands(locale) {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId, locale: &Locale) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands(locale)).await?;

    Ok(())
}

fn all_commands(locale: &Locale) -> Vec<CreateCommand> {
    vec![
        play_command(locale),
        simple_command("skip", locale),
        simple_command("pause", locale),
        simple_command("resume", locale),
        simple_command("loop", locale),
        simple_command("shuffle", locale),
        simple_command("stop", locale),
        volume_command(locale),
        simple_command("queue", locale),
    ]
}

fn simple_command(name: &str, locale: &Locale) -> CreateCommand {
    CreateCommand::new(name).description(locale.t(&format!("commands.{}", name)))
}

fn play_command(locale: &Locale) -> CreateCommand {
    simple_command("play", locale).add_option(
        CreateCommandOption::new(
            CommandOptionType::String,
            "query",
            locale.t("commands.playQuery"),
        )
        .required(true),
    )
}

fn volume_command(locale: &Locale) -> CreateCommand {
    simple_command("volume", locale).add_option(
        CreateCommandOption::new(
            CommandOptionType::Integer,
            "level",
            locale.t("commands.volumeLevel"),
        )
        .min_int_value(0)
        .max_int_value(100),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_has_a_translated_description() {
        for name in ["en", "es"] {
            let locale = Locale::load(name).unwrap();
            for command in ["play", "skip", "pause", "resume", "loop", "shuffle", "stop", "volume", "queue"] {
                let key = format!("commands.{}", command);
                assert_ne!(locale.t(&key), key, "{name}: {key}");
            }
        }
    }

    #[test]
    fn registers_nine_commands() {
        let locale = Locale::load("en").unwrap();
        assert_eq!(all_commands(&locale).len(), 9);
    }
}
