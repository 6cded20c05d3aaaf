use async_trait::async_trait;
use serenity::{
    model::id::{ChannelId, GuildId, UserId},
    prelude::Context,
};
use songbird::{
    error::{ControlError, JoinError},
    input::Input,
    tracks::{Track, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::player::{ActiveTrack, TrackNotifier, VoiceConnection};

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("songbird no inicializado")]
    NotInitialised,
    #[error("no se pudo conectar al canal de voz: {0}")]
    Join(#[from] JoinError),
    #[error("control de track falló: {0}")]
    Control(#[from] ControlError),
}

/// Canal de voz en que está `user` según la caché de la guild.
pub fn member_channel(ctx: &Context, guild_id: GuildId, user: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild.voice_states.get(&user).and_then(|state| state.channel_id)
}

/// Conexión de voz de songbird para una guild.
pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
}

impl SongbirdConnection {
    /// Conecta el bot al canal de voz (o reutiliza la llamada existente).
    pub async fn join(
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Self, VoiceError> {
        let manager = songbird::get(ctx).await.ok_or(VoiceError::NotInitialised)?;

        let call = manager.join(guild_id, channel_id).await?;
        {
            let mut handler = call.lock().await;
            if let Err(e) = handler.deafen(true).await {
                debug!("No se pudo ensordecer al bot: {:?}", e);
            }
        }

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);

        Ok(Self {
            manager,
            guild_id,
            call,
        })
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play(
        &self,
        input: Input,
        gain: f32,
        notifier: TrackNotifier,
    ) -> Result<Box<dyn ActiveTrack>, VoiceError> {
        let handle = {
            let mut handler = self.call.lock().await;
            // play_only detiene cualquier otro track de la llamada
            handler.play_only(Track::new(input).volume(gain))
        };

        handle.add_event(
            Event::Track(TrackEvent::End),
            TrackEndNotifier {
                notifier: notifier.clone(),
            },
        )?;
        handle.add_event(Event::Track(TrackEvent::Error), TrackErrorNotifier { notifier })?;

        Ok(Box::new(handle))
    }

    async fn leave(&self) -> Result<(), VoiceError> {
        self.manager.remove(self.guild_id).await?;
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

impl ActiveTrack for TrackHandle {
    fn set_gain(&self, gain: f32) -> Result<(), VoiceError> {
        self.set_volume(gain)?;
        Ok(())
    }

    fn pause(&self) -> Result<(), VoiceError> {
        TrackHandle::pause(self)?;
        Ok(())
    }

    fn resume(&self) -> Result<(), VoiceError> {
        self.play()?;
        Ok(())
    }

    fn stop(&self) -> Result<(), VoiceError> {
        TrackHandle::stop(self)?;
        Ok(())
    }
}

/// Handler para cuando termina una canción
struct TrackEndNotifier {
    notifier: TrackNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track terminado (generación {})", self.notifier.generation());
        self.notifier.ended();
        None
    }
}

/// Handler para errores de tracks
struct TrackErrorNotifier {
    notifier: TrackNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let mut reason = String::from("error de reproducción");

        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                error!("❌ Error en track: {:?}", state.playing);
                reason = format!("{:?}", state.playing);
            }
        }

        self.notifier.failed(reason);
        None
    }
}
