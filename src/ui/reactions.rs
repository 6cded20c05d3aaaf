use async_trait::async_trait;
use futures::StreamExt;
use serenity::{
    collector::ReactionCollector,
    http::Http,
    model::{
        channel::{Message, ReactionType},
        id::ChannelId,
    },
    prelude::Context,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{
    player::{ChatSurface, ControlPanel},
    session::{Control, Invoker, REACTION_PANEL},
    voice::member_channel,
};

/// Espera antes de borrar el mensaje "reproduciendo" con PRUNING activo.
const PRUNE_DELAY: Duration = Duration::from_secs(3);

/// Canal de texto de Discord con panel de reacciones.
pub struct DiscordChat {
    ctx: Context,
}

impl DiscordChat {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ChatSurface for DiscordChat {
    async fn say(&self, channel: ChannelId, text: String) -> anyhow::Result<()> {
        channel.say(&self.ctx.http, text).await?;
        Ok(())
    }

    async fn announce(
        &self,
        channel: ChannelId,
        text: String,
        panel: ControlPanel,
    ) -> anyhow::Result<()> {
        let message = channel.say(&self.ctx.http, text).await?;
        tokio::spawn(run_panel(self.ctx.clone(), message, panel));
        Ok(())
    }
}

fn control_for(emoji: &ReactionType) -> Option<Control> {
    match emoji {
        ReactionType::Unicode(name) => Control::from_emoji(name),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PanelStep {
    Continue,
    Close,
}

/// Decide si el panel sigue recogiendo tras una reacción. Los emojis ajenos
/// al panel se ignoran; el panel se cierra si la sesión ya no existe o si
/// el control fue skip/stop.
fn after_reaction(control: Option<Control>, dispatch: impl FnOnce(Control) -> bool) -> PanelStep {
    let Some(control) = control else {
        return PanelStep::Continue;
    };

    if !dispatch(control) || control.ends_collector() {
        PanelStep::Close
    } else {
        PanelStep::Continue
    }
}

/// Recoge reacciones del mensaje hasta que vence el tiempo, alguien pulsa
/// skip/stop o la canción termina.
async fn run_panel(ctx: Context, message: Message, panel: ControlPanel) {
    let bot_id = ctx.cache.current_user().id;

    let mut reactions = Box::pin(
        ReactionCollector::new(&ctx.shard)
            .message_id(message.id)
            .timeout(panel.timeout)
            .filter(move |reaction| reaction.user_id.is_some_and(|user| user != bot_id))
            .stream(),
    );

    let adding = tokio::spawn(add_reactions(
        ctx.http.clone(),
        message.clone(),
        panel.cancel.clone(),
    ));

    loop {
        let reaction = tokio::select! {
            _ = panel.cancel.cancelled() => break,
            next = reactions.next() => match next {
                Some(reaction) => reaction,
                None => break,
            },
        };

        if let Err(e) = reaction.delete(&ctx).await {
            debug!("No se pudo quitar la reacción: {:?}", e);
        }

        let Some(user) = reaction.user_id else {
            continue;
        };

        let step = after_reaction(control_for(&reaction.emoji), |control| {
            debug!("🎛️ Reacción {:?} de {} en guild {}", control, user, panel.guild_id);
            let invoker = Invoker {
                user,
                voice_channel: member_channel(&ctx, panel.guild_id, user),
            };
            panel.dispatch(control, invoker)
        });

        if step == PanelStep::Close {
            break;
        }
    }

    adding.abort();
    close_panel(&ctx, &message, panel.pruning).await;
}

async fn add_reactions(http: Arc<Http>, message: Message, cancel: CancellationToken) {
    for control in REACTION_PANEL {
        if cancel.is_cancelled() {
            return;
        }

        let Some(emoji) = control.emoji() else {
            continue;
        };

        if let Err(e) = message
            .react(&http, ReactionType::Unicode(emoji.to_string()))
            .await
        {
            warn!("⚠️ No se pudo agregar la reacción {}: {:?}", emoji, e);
            return;
        }
    }
}

async fn close_panel(ctx: &Context, message: &Message, pruning: bool) {
    if let Err(e) = message.delete_reactions(ctx).await {
        debug!("No se pudieron quitar las reacciones: {:?}", e);
    }

    if pruning {
        tokio::time::sleep(PRUNE_DELAY).await;
        match message.delete(ctx).await {
            Ok(()) => info!("🧹 Mensaje de reproducción eliminado"),
            Err(e) => debug!("No se pudo eliminar el mensaje: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_panel_emojis() {
        assert_eq!(
            control_for(&ReactionType::Unicode("🔀".to_string())),
            Some(Control::Shuffle)
        );
        assert_eq!(
            control_for(&ReactionType::Unicode("⏯️".to_string())),
            Some(Control::PlayPause)
        );
        assert_eq!(control_for(&ReactionType::Unicode("🎉".to_string())), None);
    }

    #[test]
    fn unknown_emoji_keeps_collecting_without_dispatch() {
        let mut dispatched = false;
        let step = after_reaction(None, |_| {
            dispatched = true;
            true
        });

        assert_eq!(step, PanelStep::Continue);
        assert!(!dispatched);
    }

    #[test]
    fn skip_and_stop_close_the_panel() {
        assert_eq!(after_reaction(Some(Control::Skip), |_| true), PanelStep::Close);
        assert_eq!(after_reaction(Some(Control::Stop), |_| true), PanelStep::Close);
    }

    #[test]
    fn other_controls_keep_collecting() {
        for control in [
            Control::PlayPause,
            Control::ToggleMute,
            Control::VolumeDown,
            Control::VolumeUp,
            Control::ToggleLoop,
            Control::Shuffle,
        ] {
            let mut seen = None;
            let step = after_reaction(Some(control), |c| {
                seen = Some(c);
                true
            });
            assert_eq!(step, PanelStep::Continue);
            assert_eq!(seen, Some(control));
        }
    }

    #[test]
    fn closed_session_closes_the_panel() {
        assert_eq!(after_reaction(Some(Control::VolumeUp), |_| false), PanelStep::Close);
    }

    #[test]
    fn panel_has_eight_reactions() {
        let emojis: Vec<_> = REACTION_PANEL.iter().filter_map(|c| c.emoji()).collect();
        assert_eq!(emojis, vec!["⏭", "⏯", "🔇", "🔉", "🔊", "🔁", "🔀", "⏹"]);
    }
}
