//! # Bot Module
//!
//! Discord event handling for the reaction jukebox.
//!
//! - [`commands`]: slash command definitions and registration
//! - [`handlers`]: slash command dispatch into the [`PlaybackController`]
//!
//! Voice state updates are watched so that a session whose bot was kicked
//! or disconnected from voice shuts down instead of waiting on a dead call.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::player::PlaybackController, config::Config};

/// Handler principal del bot.
pub struct MusicBot {
    config: Arc<Config>,
    pub controller: PlaybackController,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, controller: PlaybackController) -> Self {
        Self { config, controller }
    }

    /// Registra los comandos slash, por guild si hay `GUILD_ID` configurado.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        let locale = self.controller.locale();

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                commands::register_guild_commands(ctx, guild_id, locale)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx, locale)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos globales: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                    })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

/// `true` cuando el bot pasó de estar en un canal de voz a ninguno.
fn bot_left_voice(bot_id: UserId, old: Option<&VoiceState>, new: &VoiceState) -> bool {
    new.user_id == bot_id && left_channel(old.and_then(|o| o.channel_id), new.channel_id)
}

fn left_channel(before: Option<ChannelId>, after: Option<ChannelId>) -> bool {
    before.is_some() && after.is_none()
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let bot_id = ctx.cache.current_user().id;
        if !bot_left_voice(bot_id, old.as_ref(), &new) {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            warn!("Estado de voz sin guild para el bot");
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);
        self.controller.shutdown(guild_id);
    }
}
