use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serenity::{
    model::id::{ChannelId, GuildId},
    prelude::Mentionable,
};
use songbird::input::Input;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    queue::{MusicQueue, QueueFull, Song},
    session::{
        can_modify_queue, Control, Feedback, Invoker, SessionEvent, SessionState, SessionStatus,
    },
    voice::VoiceError,
};
use crate::{config::Config, i18n::Locale, sources::SourceManager};

/// Vida máxima del colector cuando la duración de la canción es desconocida.
pub const COLLECTOR_CEILING: Duration = Duration::from_secs(600);

/// Track en reproducción sobre la conexión de voz.
pub trait ActiveTrack: Send + Sync {
    fn set_gain(&self, gain: f32) -> Result<(), VoiceError>;
    fn pause(&self) -> Result<(), VoiceError>;
    fn resume(&self) -> Result<(), VoiceError>;
    fn stop(&self) -> Result<(), VoiceError>;
}

/// Conexión de voz de una guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Reemplaza lo que esté sonando por `input`.
    async fn play(
        &self,
        input: Input,
        gain: f32,
        notifier: TrackNotifier,
    ) -> Result<Box<dyn ActiveTrack>, VoiceError>;

    async fn leave(&self) -> Result<(), VoiceError>;
}

/// Canal de texto donde la sesión publica sus mensajes.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    async fn say(&self, channel: ChannelId, text: String) -> anyhow::Result<()>;

    /// Publica el mensaje "reproduciendo" con su panel de reacciones.
    async fn announce(
        &self,
        channel: ChannelId,
        text: String,
        panel: ControlPanel,
    ) -> anyhow::Result<()>;
}

/// Avisa a la sesión del fin o error de un track concreto.
#[derive(Clone)]
pub struct TrackNotifier {
    events: mpsc::UnboundedSender<SessionEvent>,
    generation: u64,
}

impl TrackNotifier {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ended(&self) {
        let _ = self.events.send(SessionEvent::TrackEnded {
            generation: self.generation,
        });
    }

    pub fn failed(&self, reason: String) {
        let _ = self.events.send(SessionEvent::TrackFailed {
            generation: self.generation,
            reason,
        });
    }
}

/// Lo que necesita el colector de reacciones de un mensaje "reproduciendo".
#[derive(Clone)]
pub struct ControlPanel {
    pub guild_id: GuildId,
    pub timeout: Duration,
    pub pruning: bool,
    /// Se cancela cuando la canción termina o la sesión se cierra.
    pub cancel: CancellationToken,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ControlPanel {
    /// Envía un control a la sesión; `false` si ya no existe.
    pub fn dispatch(&self, control: Control, invoker: Invoker) -> bool {
        self.events
            .send(SessionEvent::Control {
                control,
                invoker,
                reply: None,
            })
            .is_ok()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no hay sesión activa")]
    NoSession,
    #[error("la sesión se cerró")]
    Closed,
    #[error("ya hay una sesión activa")]
    AlreadyActive,
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub stay_time: Duration,
    pub pruning: bool,
    pub collector_ceiling: Duration,
}

impl From<&Config> for PlaybackSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume,
            max_queue_size: config.max_queue_size,
            stay_time: config.stay_duration(),
            pruning: config.pruning,
            collector_ceiling: COLLECTOR_CEILING,
        }
    }
}

/// Canales y conexiones con que arranca una sesión.
#[derive(Clone)]
pub struct SessionInit {
    pub text_channel: ChannelId,
    pub voice_channel: ChannelId,
    pub voice: Arc<dyn VoiceConnection>,
    pub chat: Arc<dyn ChatSurface>,
}

struct SessionHandle {
    id: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
    voice_channel: ChannelId,
}

struct Shared {
    sessions: DashMap<GuildId, SessionHandle>,
    teardowns: DashMap<GuildId, (u64, CancellationToken)>,
    sources: Arc<SourceManager>,
    locale: Arc<Locale>,
    settings: PlaybackSettings,
    next_id: AtomicU64,
}

impl Shared {
    fn cancel_teardown(&self, guild_id: GuildId) {
        if let Some((_, (_, token))) = self.teardowns.remove(&guild_id) {
            debug!("⏱️ Desconexión pendiente cancelada en guild {}", guild_id);
            token.cancel();
        }
    }
}

/// Registro de sesiones de reproducción, una por guild.
///
/// Cada sesión es una tarea que consume sus [`SessionEvent`] en orden, así
/// que la cola solo la modifica un escritor.
#[derive(Clone)]
pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    pub fn new(sources: Arc<SourceManager>, locale: Arc<Locale>, settings: PlaybackSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                sessions: DashMap::new(),
                teardowns: DashMap::new(),
                sources,
                locale,
                settings,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn locale(&self) -> &Locale {
        &self.shared.locale
    }

    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.shared.sessions.contains_key(&guild_id)
    }

    /// Canal de voz de la sesión activa.
    pub fn voice_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.shared.sessions.get(&guild_id).map(|h| h.voice_channel)
    }

    /// Crea la sesión de la guild con `song` como primera canción y la
    /// empieza a reproducir.
    pub fn start(&self, guild_id: GuildId, song: Song, init: SessionInit) -> Result<(), SessionError> {
        let settings = &self.shared.settings;

        match self.shared.sessions.entry(guild_id) {
            Entry::Occupied(_) => Err(SessionError::AlreadyActive),
            Entry::Vacant(slot) => {
                self.shared.cancel_teardown(guild_id);

                let mut queue = MusicQueue::new(settings.default_volume, settings.max_queue_size);
                queue.push(song)?;

                let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                let (events, rx) = mpsc::unbounded_channel();

                slot.insert(SessionHandle {
                    id,
                    events: events.clone(),
                    voice_channel: init.voice_channel,
                });

                let actor = SessionActor {
                    guild_id,
                    id,
                    queue,
                    state: SessionState::Idle,
                    generation: 0,
                    track: None,
                    panel: None,
                    init,
                    events,
                    shared: self.shared.clone(),
                };

                info!("🎶 Sesión {} creada en guild {}", id, guild_id);
                tokio::spawn(actor.run(rx));
                Ok(())
            }
        }
    }

    /// Agrega una canción a la sesión activa; devuelve su posición.
    pub async fn enqueue(&self, guild_id: GuildId, song: Song) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(guild_id, SessionEvent::Enqueue { song, reply })?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Aplica un control y devuelve su resultado en lugar de publicarlo.
    pub async fn control(
        &self,
        guild_id: GuildId,
        control: Control,
        invoker: Invoker,
    ) -> Result<Feedback, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(
            guild_id,
            SessionEvent::Control {
                control,
                invoker,
                reply: Some(reply),
            },
        )?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn status(&self, guild_id: GuildId) -> Option<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(guild_id, SessionEvent::Inspect { reply }).ok()?;
        rx.await.ok()
    }

    /// Cierra la sesión sin programar desconexión (el bot ya salió del canal).
    pub fn shutdown(&self, guild_id: GuildId) {
        self.shared.cancel_teardown(guild_id);
        if self.send(guild_id, SessionEvent::Shutdown).is_ok() {
            info!("🔌 Cerrando sesión de guild {}", guild_id);
        }
    }

    fn send(&self, guild_id: GuildId, event: SessionEvent) -> Result<(), SessionError> {
        let events = self
            .shared
            .sessions
            .get(&guild_id)
            .map(|h| h.events.clone())
            .ok_or(SessionError::NoSession)?;

        events.send(event).map_err(|_| SessionError::Closed)
    }
}

/// Trabajo pendiente tras responder a un control.
enum Followup {
    None,
    Advance { silent: bool },
}

struct SessionActor {
    guild_id: GuildId,
    id: u64,
    queue: MusicQueue,
    state: SessionState,
    generation: u64,
    track: Option<Box<dyn ActiveTrack>>,
    panel: Option<CancellationToken>,
    init: SessionInit,
    events: mpsc::UnboundedSender<SessionEvent>,
    shared: Arc<Shared>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        self.play_head(false).await;

        while self.state != SessionState::Draining {
            let Some(event) = rx.recv().await else {
                break;
            };
            self.handle(event).await;
        }

        debug!("Sesión {} finalizada en guild {}", self.id, self.guild_id);
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Enqueue { song, reply } => {
                let _ = reply.send(self.queue.push(song));
            }
            SessionEvent::TrackEnded { generation } => {
                if self.is_stale(generation) {
                    return;
                }
                self.retire_track(false);
                let silent = self.queue.advance_after_end();
                self.play_head(silent).await;
            }
            SessionEvent::TrackFailed { generation, reason } => {
                if self.is_stale(generation) {
                    return;
                }
                error!("❌ Error de reproducción en guild {}: {}", self.guild_id, reason);
                self.retire_track(false);
                self.queue.drop_head();
                self.report_error(&reason).await;
                self.play_head(false).await;
            }
            SessionEvent::Control {
                control,
                invoker,
                reply,
            } => {
                let (feedback, followup) = self.apply(control, invoker);

                match reply {
                    Some(reply) => {
                        let _ = reply.send(feedback);
                    }
                    None => {
                        if let Feedback::Message(text) = feedback {
                            self.say(text).await;
                        }
                    }
                }

                if let Followup::Advance { silent } = followup {
                    self.play_head(silent).await;
                }
            }
            SessionEvent::Inspect { reply } => {
                let _ = reply.send(self.status());
            }
            SessionEvent::Shutdown => {
                self.retire_track(true);
                self.transition(SessionState::Draining);
                self.release();
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        let stale = generation != self.generation || !self.state.has_track();
        if stale {
            debug!(
                "Evento de track obsoleto ignorado (gen {} vs {})",
                generation, self.generation
            );
        }
        stale
    }

    /// Reproduce la cabeza de la cola; las canciones cuyo stream falla se
    /// descartan hasta que una arranca o la cola se agota.
    async fn play_head(&mut self, silent: bool) {
        let mut silent = silent;
        loop {
            let Some(song) = self.queue.head().cloned() else {
                self.drain().await;
                return;
            };

            self.transition(SessionState::Loading);

            let opened = self.shared.sources.open(&song).await;
            let started = match opened {
                Ok(input) => self.start_track(input).await,
                Err(e) => Err(e.to_string()),
            };

            match started {
                Ok(()) => {
                    info!("🎵 Reproduciendo: {} en guild {}", song.title, self.guild_id);
                    if !silent {
                        self.announce(&song).await;
                    }
                    return;
                }
                Err(reason) => {
                    warn!("⚠️ No se pudo reproducir {}: {}", song.url, reason);
                    self.queue.drop_head();
                    self.report_error(&reason).await;
                    // solo la canción que acaba de terminar se repite en silencio
                    silent = false;
                }
            }
        }
    }

    async fn start_track(&mut self, input: Input) -> Result<(), String> {
        self.retire_track(true);

        let notifier = TrackNotifier {
            events: self.events.clone(),
            generation: self.generation,
        };

        let track = self
            .init
            .voice
            .play(input, self.queue.gain(), notifier)
            .await
            .map_err(|e| e.to_string())?;

        self.track = Some(track);
        self.transition(SessionState::Playing);
        Ok(())
    }

    /// Suelta el track actual y cierra su panel; los eventos que aún
    /// lleguen de ese track quedan obsoletos.
    fn retire_track(&mut self, stop: bool) {
        if let Some(panel) = self.panel.take() {
            panel.cancel();
        }

        if let Some(track) = self.track.take() {
            if stop {
                if let Err(e) = track.stop() {
                    debug!("No se pudo detener el track: {}", e);
                }
            }
        }

        self.generation += 1;
    }

    fn apply(&mut self, control: Control, invoker: Invoker) -> (Feedback, Followup) {
        if control.touches_volume()
            && !can_modify_queue(invoker.voice_channel, self.init.voice_channel)
        {
            debug!("🔒 {} no puede modificar la cola", invoker.user);
            return (Feedback::Denied, Followup::None);
        }

        let author = invoker.user.mention().to_string();
        let locale = self.shared.locale.clone();
        let message =
            |key: &str| Feedback::Message(locale.tf(key, &[("author", author.as_str())]));

        match control {
            Control::Skip => {
                if !self.state.has_track() {
                    return (Feedback::Ignored, Followup::None);
                }
                self.retire_track(true);
                let silent = self.queue.advance_after_end();
                (message("skip.result"), Followup::Advance { silent })
            }
            Control::PlayPause => {
                if self.state == SessionState::Playing {
                    self.apply(Control::Pause, invoker)
                } else {
                    self.apply(Control::Resume, invoker)
                }
            }
            Control::Pause => {
                if self.state != SessionState::Playing {
                    return (Feedback::Ignored, Followup::None);
                }
                self.with_track(|t| t.pause());
                self.transition(SessionState::Paused);
                (message("pause.result"), Followup::None)
            }
            Control::Resume => {
                if self.state != SessionState::Paused {
                    return (Feedback::Ignored, Followup::None);
                }
                self.with_track(|t| t.resume());
                self.transition(SessionState::Playing);
                (message("resume.result"), Followup::None)
            }
            Control::ToggleMute => {
                let muted = self.queue.toggle_mute();
                self.refresh_gain();
                let key = if muted { "play.mutedSong" } else { "play.unmutedSong" };
                (message(key), Followup::None)
            }
            Control::VolumeDown | Control::VolumeUp => {
                let (changed, key) = if control == Control::VolumeUp {
                    (self.queue.volume_up(), "play.increasedVolume")
                } else {
                    (self.queue.volume_down(), "play.decreasedVolume")
                };

                match changed {
                    Some(volume) => {
                        self.refresh_gain();
                        let volume = volume.to_string();
                        let text = locale.tf(
                            key,
                            &[("author", author.as_str()), ("volume", volume.as_str())],
                        );
                        (Feedback::Message(text), Followup::None)
                    }
                    None => (Feedback::Ignored, Followup::None),
                }
            }
            Control::SetVolume(volume) => {
                if !self.queue.set_volume(volume) {
                    return (Feedback::Ignored, Followup::None);
                }
                self.refresh_gain();
                let volume = volume.to_string();
                let text = locale.tf("volume.result", &[("volume", volume.as_str())]);
                (Feedback::Message(text), Followup::None)
            }
            Control::ToggleLoop => {
                let state = if self.queue.toggle_loop() {
                    locale.t("loop.on")
                } else {
                    locale.t("loop.off")
                };
                let text = locale.tf("loop.result", &[("loop", state.as_str())]);
                (Feedback::Message(text), Followup::None)
            }
            Control::Shuffle => {
                self.queue.shuffle_upcoming();
                (message("shuffle.result"), Followup::None)
            }
            Control::Stop => {
                self.queue.clear();
                self.retire_track(true);
                (message("stop.result"), Followup::Advance { silent: false })
            }
        }
    }

    fn with_track(&self, action: impl FnOnce(&dyn ActiveTrack) -> Result<(), VoiceError>) {
        if let Some(track) = self.track.as_deref() {
            if let Err(e) = action(track) {
                warn!("⚠️ Control de track falló en guild {}: {}", self.guild_id, e);
            }
        }
    }

    fn refresh_gain(&self) {
        let gain = self.queue.gain();
        self.with_track(|t| t.set_gain(gain));
    }

    async fn announce(&mut self, song: &Song) {
        let cancel = CancellationToken::new();
        self.panel = Some(cancel.clone());

        let panel = ControlPanel {
            guild_id: self.guild_id,
            timeout: song.collector_timeout(self.shared.settings.collector_ceiling),
            pruning: self.shared.settings.pruning,
            cancel,
            events: self.events.clone(),
        };

        let text = self.shared.locale.tf(
            "play.startedPlaying",
            &[("title", song.title.as_str()), ("url", song.url.as_str())],
        );

        if let Err(e) = self
            .init
            .chat
            .announce(self.init.text_channel, text, panel)
            .await
        {
            error!("Error al enviar mensaje now playing: {:?}", e);
        }
    }

    async fn drain(&mut self) {
        self.retire_track(false);
        self.transition(SessionState::Draining);
        info!("📭 Cola vacía en guild {}", self.guild_id);

        if !self.shared.settings.pruning {
            self.say(self.shared.locale.t("play.queueEnded")).await;
        }

        // la desconexión se registra antes de soltar la sesión para que un
        // `start` concurrente la encuentre y la cancele
        self.schedule_teardown();
        self.release();
    }

    /// Quita la sesión del registro si sigue siendo esta.
    fn release(&self) {
        let id = self.id;
        self.shared.sessions.remove_if(&self.guild_id, |_, h| h.id == id);
    }

    fn schedule_teardown(&self) {
        let token = CancellationToken::new();
        if let Some((_, previous)) = self
            .shared
            .teardowns
            .insert(self.guild_id, (self.id, token.clone()))
        {
            previous.cancel();
        }

        let guild_id = self.guild_id;
        let id = self.id;
        let shared = self.shared.clone();
        let voice = self.init.voice.clone();
        let chat = self.init.chat.clone();
        let text_channel = self.init.text_channel;
        let stay = shared.settings.stay_time;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(stay) => {}
            }

            shared.teardowns.remove_if(&guild_id, |_, (owner, _)| *owner == id);

            if let Err(e) = voice.leave().await {
                warn!("⚠️ Error al salir del canal de voz: {}", e);
            }

            if !shared.settings.pruning {
                if let Err(e) = chat.say(text_channel, shared.locale.t("play.leaveChannel")).await {
                    error!("Error al enviar mensaje: {:?}", e);
                }
            }
        });

        debug!(
            "⏱️ Desconexión programada en {} para guild {}",
            humantime::format_duration(stay),
            guild_id
        );
    }

    async fn report_error(&self, reason: &str) {
        let text = self.shared.locale.tf("play.queueError", &[("error", reason)]);
        self.say(text).await;
    }

    async fn say(&self, text: String) {
        if let Err(e) = self.init.chat.say(self.init.text_channel, text).await {
            error!("Error al enviar mensaje: {:?}", e);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.allows(next) {
            warn!(
                "Transición inesperada {} → {} en guild {}",
                self.state.as_str(),
                next.as_str(),
                self.guild_id
            );
        }
        debug!("Sesión {}: {} → {}", self.id, self.state.as_str(), next.as_str());
        self.state = next;
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            songs: self.queue.songs().cloned().collect(),
            volume: self.queue.volume(),
            muted: self.queue.is_muted(),
            looping: self.queue.is_looping(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MockStreamProvider, SourceError, StreamKind, StreamProvider};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use songbird::input::YoutubeDl;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VOICE: ChannelId = ChannelId::new(500);
    const TEXT: ChannelId = ChannelId::new(600);
    const GUILD: GuildId = GuildId::new(1);

    #[derive(Default)]
    struct FakeTrack {
        paused: Mutex<bool>,
        stopped: Mutex<bool>,
        gain: Mutex<f32>,
    }

    impl ActiveTrack for Arc<FakeTrack> {
        fn set_gain(&self, gain: f32) -> Result<(), VoiceError> {
            *self.gain.lock() = gain;
            Ok(())
        }

        fn pause(&self) -> Result<(), VoiceError> {
            *self.paused.lock() = true;
            Ok(())
        }

        fn resume(&self) -> Result<(), VoiceError> {
            *self.paused.lock() = false;
            Ok(())
        }

        fn stop(&self) -> Result<(), VoiceError> {
            *self.stopped.lock() = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeVoice {
        tracks: Mutex<Vec<Arc<FakeTrack>>>,
        notifiers: Mutex<Vec<TrackNotifier>>,
        leaves: Mutex<usize>,
    }

    impl FakeVoice {
        fn plays(&self) -> usize {
            self.tracks.lock().len()
        }

        fn active(&self) -> usize {
            self.tracks.lock().iter().filter(|t| !*t.stopped.lock()).count()
        }

        fn last_track(&self) -> Arc<FakeTrack> {
            self.tracks.lock().last().cloned().unwrap()
        }

        fn last_notifier(&self) -> TrackNotifier {
            self.notifiers.lock().last().cloned().unwrap()
        }

        /// Simula el fin natural del track en curso.
        fn finish_current(&self) {
            if let Some(track) = self.tracks.lock().last() {
                *track.stopped.lock() = true;
            }
            self.last_notifier().ended();
        }
    }

    #[async_trait]
    impl VoiceConnection for FakeVoice {
        async fn play(
            &self,
            _input: Input,
            gain: f32,
            notifier: TrackNotifier,
        ) -> Result<Box<dyn ActiveTrack>, VoiceError> {
            let mut tracks = self.tracks.lock();
            for track in tracks.iter() {
                *track.stopped.lock() = true;
            }
            let track = Arc::new(FakeTrack::default());
            *track.gain.lock() = gain;
            tracks.push(track.clone());
            self.notifiers.lock().push(notifier);
            Ok(Box::new(track))
        }

        async fn leave(&self) -> Result<(), VoiceError> {
            *self.leaves.lock() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeChat {
        said: Mutex<Vec<String>>,
        announced: Mutex<Vec<(String, ControlPanel)>>,
    }

    impl FakeChat {
        fn said(&self) -> Vec<String> {
            self.said.lock().clone()
        }

        fn announced(&self) -> Vec<String> {
            self.announced.lock().iter().map(|(t, _)| t.clone()).collect()
        }

        fn last_panel(&self) -> ControlPanel {
            self.announced.lock().last().map(|(_, p)| p.clone()).unwrap()
        }
    }

    #[async_trait]
    impl ChatSurface for FakeChat {
        async fn say(&self, _channel: ChannelId, text: String) -> anyhow::Result<()> {
            self.said.lock().push(text);
            Ok(())
        }

        async fn announce(
            &self,
            _channel: ChannelId,
            text: String,
            panel: ControlPanel,
        ) -> anyhow::Result<()> {
            self.announced.lock().push((text, panel));
            Ok(())
        }
    }

    fn song(name: &str, secs: u64) -> Song {
        Song::new(
            name.to_string(),
            format!("https://www.youtube.com/watch?v={name}"),
            UserId::new(9),
        )
        .with_duration(Duration::from_secs(secs))
    }

    fn lazy_input(url: &str) -> Input {
        YoutubeDl::new(reqwest::Client::new(), url.to_string()).into()
    }

    /// Proveedor que falla para las URLs que contienen `broken`.
    fn provider() -> MockStreamProvider {
        let mut provider = MockStreamProvider::new();
        provider.expect_kind().return_const(StreamKind::YouTube);
        provider.expect_open().returning(|song: &Song| {
            if song.url.contains("broken") {
                Err(SourceError::YtDlp("video no disponible".to_string()))
            } else {
                Ok(lazy_input(&song.url))
            }
        });
        provider
    }

    struct Harness {
        controller: PlaybackController,
        voice: Arc<FakeVoice>,
        chat: Arc<FakeChat>,
        locale: Arc<Locale>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_settings(Self::settings())
        }

        fn settings() -> PlaybackSettings {
            PlaybackSettings {
                default_volume: 50,
                max_queue_size: 100,
                stay_time: Duration::from_secs(30),
                pruning: false,
                collector_ceiling: COLLECTOR_CEILING,
            }
        }

        fn with_settings(settings: PlaybackSettings) -> Self {
            Self::with_provider(provider(), settings)
        }

        fn with_provider(provider: MockStreamProvider, settings: PlaybackSettings) -> Self {
            let sources: Vec<Arc<dyn StreamProvider>> = vec![Arc::new(provider)];
            let locale = Arc::new(Locale::load("en").unwrap());
            Self {
                controller: PlaybackController::new(
                    Arc::new(SourceManager::with_providers(sources)),
                    locale.clone(),
                    settings,
                ),
                voice: Arc::new(FakeVoice::default()),
                chat: Arc::new(FakeChat::default()),
                locale,
            }
        }

        fn init(&self) -> SessionInit {
            SessionInit {
                text_channel: TEXT,
                voice_channel: VOICE,
                voice: self.voice.clone(),
                chat: self.chat.clone(),
            }
        }

        async fn start(&self, songs: &[Song]) -> SessionStatus {
            let (first, rest) = songs.split_first().unwrap();
            self.controller.start(GUILD, first.clone(), self.init()).unwrap();
            for song in rest {
                self.controller.enqueue(GUILD, song.clone()).await.unwrap();
            }
            self.status().await.unwrap()
        }

        async fn status(&self) -> Option<SessionStatus> {
            self.controller.status(GUILD).await
        }

        fn member() -> Invoker {
            Invoker {
                user: UserId::new(42),
                voice_channel: Some(VOICE),
            }
        }

        fn outsider() -> Invoker {
            Invoker {
                user: UserId::new(43),
                voice_channel: Some(ChannelId::new(501)),
            }
        }
    }

    fn titles(status: &SessionStatus) -> Vec<String> {
        status.songs.iter().map(|s| s.title.clone()).collect()
    }

    #[tokio::test]
    async fn starting_a_session_plays_exactly_one_track() {
        let h = Harness::new();
        let status = h.start(&[song("a", 5), song("b", 5)]).await;

        assert_eq!(status.state, SessionState::Playing);
        assert_eq!(status.now_playing().unwrap().title, "a");
        assert_eq!(h.voice.plays(), 1);
        assert_eq!(h.voice.active(), 1);
        assert_eq!(h.chat.announced().len(), 1);
        assert!((*h.voice.last_track().gain.lock() - crate::audio::queue::log_gain(50)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn idle_advances_to_next_song_and_announces_it() {
        let h = Harness::new();
        h.start(&[song("a", 5), song("b", 5)]).await;

        let first_panel = h.chat.last_panel();
        h.voice.finish_current();
        let status = h.status().await.unwrap();

        assert_eq!(titles(&status), vec!["b"]);
        assert_eq!(status.state, SessionState::Playing);
        assert_eq!(h.voice.plays(), 2);
        assert_eq!(h.voice.active(), 1);
        assert!(first_panel.cancel.is_cancelled());

        let announced = h.chat.announced();
        assert_eq!(announced.len(), 2);
        assert_eq!(
            announced[1],
            h.locale.tf(
                "play.startedPlaying",
                &[("title", "b"), ("url", "https://www.youtube.com/watch?v=b")]
            )
        );
        assert_eq!(h.chat.last_panel().timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stale_track_events_do_not_double_advance() {
        let h = Harness::new();
        h.start(&[song("a", 5), song("b", 5), song("c", 5)]).await;

        let stale = h.voice.last_notifier();
        h.voice.finish_current();
        stale.ended();
        stale.failed("late".to_string());

        let status = h.status().await.unwrap();
        assert_eq!(titles(&status), vec!["b", "c"]);
        assert_eq!(h.voice.plays(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_skips_to_next_song() {
        let h = Harness::new();
        h.start(&[song("a", 5), song("broken-b", 5), song("broken-c", 5), song("d", 5)])
            .await;

        h.voice.finish_current();
        let status = h.status().await.unwrap();

        assert_eq!(titles(&status), vec!["d"]);
        assert_eq!(status.state, SessionState::Playing);
        assert_eq!(h.voice.plays(), 2);

        let errors: Vec<_> = h
            .chat
            .said()
            .into_iter()
            .filter(|m| m.starts_with("Error:"))
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(h.chat.announced().len(), 2);
    }

    #[tokio::test]
    async fn failed_silent_replay_announces_next_song() {
        // la segunda apertura (la repetición de `a`) falla
        let opens = Arc::new(AtomicUsize::new(0));
        let mut flaky = MockStreamProvider::new();
        flaky.expect_kind().return_const(StreamKind::YouTube);
        flaky.expect_open().returning(move |song: &Song| {
            if opens.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(SourceError::YtDlp("video no disponible".to_string()))
            } else {
                Ok(lazy_input(&song.url))
            }
        });

        let h = Harness::with_provider(flaky, Harness::settings());
        let mut again = song("a-again", 5);
        again.url = song("a", 5).url;
        h.start(&[song("a", 5), again, song("b", 5)]).await;
        h.controller.control(GUILD, Control::ToggleLoop, Harness::member()).await.unwrap();

        h.voice.finish_current();
        let status = h.status().await.unwrap();

        assert_eq!(titles(&status), vec!["b", "a"]);
        assert_eq!(status.state, SessionState::Playing);
        assert_eq!(h.voice.plays(), 2);

        let announced = h.chat.announced();
        assert_eq!(announced.len(), 2);
        assert_eq!(
            announced[1],
            h.locale.tf(
                "play.startedPlaying",
                &[("title", "b"), ("url", "https://www.youtube.com/watch?v=b")]
            )
        );
    }

    #[tokio::test]
    async fn failing_first_song_drains_session() {
        let h = Harness::new();
        h.controller
            .start(GUILD, song("broken", 5), h.init())
            .unwrap();

        assert!(h.status().await.is_none());
        assert_eq!(h.voice.plays(), 0);
        let said = h.chat.said();
        assert!(said[0].starts_with("Error:"));
        assert_eq!(said[1], h.locale.t("play.queueEnded"));
    }

    #[tokio::test]
    async fn player_error_drops_the_song() {
        let h = Harness::new();
        h.start(&[song("a", 5), song("b", 5)]).await;
        h.controller.control(GUILD, Control::ToggleLoop, Harness::member()).await.unwrap();

        h.voice.last_notifier().failed("decoder".to_string());
        let status = h.status().await.unwrap();

        // con repetición activa el error tampoco rota la canción
        assert_eq!(titles(&status), vec!["b"]);
        assert!(h.chat.said().iter().any(|m| m == "Error: decoder"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_queue_tears_down_once() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;

        h.voice.finish_current();
        assert!(h.status().await.is_none());
        assert!(!h.controller.has_session(GUILD));
        assert!(h.chat.said().contains(&h.locale.t("play.queueEnded")));
        assert_eq!(*h.voice.leaves.lock(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(*h.voice.leaves.lock(), 1);
        let leaving = h
            .chat
            .said()
            .into_iter()
            .filter(|m| *m == h.locale.t("play.leaveChannel"))
            .count();
        assert_eq!(leaving, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_cancels_pending_teardown() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;
        h.voice.finish_current();
        assert!(h.status().await.is_none());

        h.start(&[song("b", 5)]).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(*h.voice.leaves.lock(), 0);
        assert!(h.controller.has_session(GUILD));
    }

    #[tokio::test(start_paused = true)]
    async fn pruning_suppresses_queue_messages() {
        let h = Harness::with_settings(PlaybackSettings {
            default_volume: 100,
            max_queue_size: 10,
            stay_time: Duration::from_secs(1),
            pruning: true,
            collector_ceiling: COLLECTOR_CEILING,
        });
        h.start(&[song("a", 5)]).await;
        h.voice.finish_current();
        assert!(h.status().await.is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert_eq!(*h.voice.leaves.lock(), 1);
        assert!(h.chat.said().is_empty());
        assert!(h.chat.last_panel().pruning);
    }

    #[tokio::test]
    async fn single_song_loop_replays_silently() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;
        h.controller.control(GUILD, Control::ToggleLoop, Harness::member()).await.unwrap();

        h.voice.finish_current();
        let status = h.status().await.unwrap();

        assert_eq!(titles(&status), vec!["a"]);
        assert_eq!(status.state, SessionState::Playing);
        assert_eq!(h.voice.plays(), 2);
        assert_eq!(h.chat.announced().len(), 1);
    }

    #[tokio::test]
    async fn loop_moves_finished_song_to_tail() {
        let h = Harness::new();
        h.start(&[song("a", 5), song("b", 5)]).await;
        h.controller.control(GUILD, Control::ToggleLoop, Harness::member()).await.unwrap();

        h.voice.finish_current();
        let status = h.status().await.unwrap();

        assert_eq!(titles(&status), vec!["b", "a"]);
        assert_eq!(h.chat.announced().len(), 2);
    }

    #[tokio::test]
    async fn unknown_duration_uses_collector_ceiling() {
        let h = Harness::new();
        let mut live = song("live", 0);
        live.duration = None;
        h.start(&[live]).await;

        assert_eq!(h.chat.last_panel().timeout, COLLECTOR_CEILING);
    }

    #[tokio::test]
    async fn volume_reactions_stay_within_bounds() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;
        let panel = h.chat.last_panel();

        for _ in 0..12 {
            assert!(panel.dispatch(Control::VolumeUp, Harness::member()));
        }
        assert_eq!(h.status().await.unwrap().volume, 100);
        assert!((*h.voice.last_track().gain.lock() - 1.0).abs() < 1e-6);

        for _ in 0..15 {
            panel.dispatch(Control::VolumeDown, Harness::member());
        }
        assert_eq!(h.status().await.unwrap().volume, 0);

        let volume_messages = h
            .chat
            .said()
            .into_iter()
            .filter(|m| m.contains("volume"))
            .count();
        // 50→100 en 5 pasos y 100→0 en 10 pasos; el resto no hace nada
        assert_eq!(volume_messages, 15);
    }

    #[tokio::test]
    async fn outsider_cannot_touch_volume_or_mute() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;
        let panel = h.chat.last_panel();

        panel.dispatch(Control::ToggleMute, Harness::outsider());
        panel.dispatch(Control::VolumeUp, Harness::outsider());
        panel.dispatch(Control::VolumeDown, Harness::outsider());

        let status = h.status().await.unwrap();
        assert_eq!(status.volume, 50);
        assert!(!status.muted);
        assert!(h.chat.said().is_empty());

        let feedback = h
            .controller
            .control(GUILD, Control::SetVolume(10), Harness::outsider())
            .await
            .unwrap();
        assert_eq!(feedback, Feedback::Denied);
    }

    #[tokio::test]
    async fn mute_toggles_gain() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;

        let feedback = h
            .controller
            .control(GUILD, Control::ToggleMute, Harness::member())
            .await
            .unwrap();
        assert_eq!(feedback, Feedback::Message(h.locale.tf("play.mutedSong", &[("author", "<@42>")])));
        assert_eq!(*h.voice.last_track().gain.lock(), 0.0);

        // subir el volumen no reactiva el sonido
        h.controller.control(GUILD, Control::VolumeUp, Harness::member()).await.unwrap();
        assert_eq!(*h.voice.last_track().gain.lock(), 0.0);

        h.controller.control(GUILD, Control::ToggleMute, Harness::member()).await.unwrap();
        assert!(*h.voice.last_track().gain.lock() > 0.0);
    }

    #[tokio::test]
    async fn play_pause_toggles_track() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;
        let panel = h.chat.last_panel();

        panel.dispatch(Control::PlayPause, Harness::outsider());
        assert_eq!(h.status().await.unwrap().state, SessionState::Paused);
        assert!(*h.voice.last_track().paused.lock());

        panel.dispatch(Control::PlayPause, Harness::outsider());
        assert_eq!(h.status().await.unwrap().state, SessionState::Playing);
        assert!(!*h.voice.last_track().paused.lock());

        let feedback = h
            .controller
            .control(GUILD, Control::Resume, Harness::member())
            .await
            .unwrap();
        assert_eq!(feedback, Feedback::Ignored);
    }

    #[tokio::test]
    async fn skip_reaction_advances_once() {
        let h = Harness::new();
        h.start(&[song("a", 5), song("b", 5)]).await;
        let first = h.voice.last_track();
        let stale = h.voice.last_notifier();

        h.chat.last_panel().dispatch(Control::Skip, Harness::member());
        // songbird emite End al detener el track
        stale.ended();

        let status = h.status().await.unwrap();
        assert_eq!(titles(&status), vec!["b"]);
        assert!(*first.stopped.lock());
        assert_eq!(h.voice.plays(), 2);
        assert_eq!(h.voice.active(), 1);

        let said = h.chat.said();
        assert_eq!(said, vec![h.locale.tf("skip.result", &[("author", "<@42>")])]);
    }

    #[tokio::test]
    async fn stop_clears_queue_and_drains() {
        let h = Harness::new();
        h.start(&[song("a", 5), song("b", 5)]).await;

        let feedback = h
            .controller
            .control(GUILD, Control::Stop, Harness::member())
            .await
            .unwrap();

        assert_eq!(feedback, Feedback::Message(h.locale.tf("stop.result", &[("author", "<@42>")])));
        assert!(h.status().await.is_none());
        assert_eq!(h.voice.active(), 0);
        assert!(h.chat.said().contains(&h.locale.t("play.queueEnded")));
    }

    #[tokio::test]
    async fn enqueue_reports_position_and_capacity() {
        let h = Harness::with_settings(PlaybackSettings {
            default_volume: 100,
            max_queue_size: 2,
            stay_time: Duration::from_secs(30),
            pruning: false,
            collector_ceiling: COLLECTOR_CEILING,
        });
        h.start(&[song("a", 5)]).await;

        assert_eq!(h.controller.enqueue(GUILD, song("b", 5)).await.unwrap(), 2);
        let err = h.controller.enqueue(GUILD, song("c", 5)).await.unwrap_err();
        assert!(matches!(err, SessionError::QueueFull(QueueFull { max: 2 })));

        let err = h.controller.start(GUILD, song("d", 5), h.init()).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_without_teardown() {
        let h = Harness::new();
        h.start(&[song("a", 5)]).await;
        let track = h.voice.last_track();

        h.controller.shutdown(GUILD);
        assert!(h.status().await.is_none());
        assert!(*track.stopped.lock());

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        // el bot ya salió del canal; no hay desconexión programada
        assert_eq!(*h.voice.leaves.lock(), 0);
        assert!(h.chat.said().is_empty());
        assert!(!h.controller.has_session(GUILD));
    }

    #[tokio::test]
    async fn controls_without_session_report_no_session() {
        let h = Harness::new();
        let err = h
            .controller
            .control(GUILD, Control::Skip, Harness::member())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoSession));
        assert!(h.status().await.is_none());
    }
}
