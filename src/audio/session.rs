//! Per-guild playback session vocabulary.
//!
//! A session moves through [`SessionState`] driven by [`SessionEvent`]s
//! coming from three places: the voice driver (track ended / failed), the
//! reaction panel on the "now playing" message, and slash commands.

use serenity::model::id::{ChannelId, UserId};
use tokio::sync::oneshot;

use super::queue::{QueueFull, Song};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Creada, todavía no se cargó nada.
    Idle,
    /// Resolviendo el stream de la cabeza de la cola.
    Loading,
    Playing,
    Paused,
    /// Cola agotada; estado terminal.
    Draining,
}

impl SessionState {
    pub fn allows(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, Loading | Draining) => true,
            (Loading, Loading | Playing | Draining) => true,
            (Playing, Paused | Loading | Draining) => true,
            (Paused, Playing | Loading | Draining) => true,
            _ => false,
        }
    }

    pub fn has_track(self) -> bool {
        matches!(self, SessionState::Playing | SessionState::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading => "loading",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Draining => "draining",
        }
    }
}

/// Acciones de control sobre la sesión (reacciones y comandos).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Skip,
    PlayPause,
    Pause,
    Resume,
    ToggleMute,
    VolumeDown,
    VolumeUp,
    SetVolume(u8),
    ToggleLoop,
    Shuffle,
    Stop,
}

/// Reacciones del mensaje "reproduciendo", en el orden en que se agregan.
pub const REACTION_PANEL: [Control; 8] = [
    Control::Skip,
    Control::PlayPause,
    Control::ToggleMute,
    Control::VolumeDown,
    Control::VolumeUp,
    Control::ToggleLoop,
    Control::Shuffle,
    Control::Stop,
];

impl Control {
    pub fn emoji(self) -> Option<&'static str> {
        match self {
            Control::Skip => Some("⏭"),
            Control::PlayPause => Some("⏯"),
            Control::ToggleMute => Some("🔇"),
            Control::VolumeDown => Some("🔉"),
            Control::VolumeUp => Some("🔊"),
            Control::ToggleLoop => Some("🔁"),
            Control::Shuffle => Some("🔀"),
            Control::Stop => Some("⏹"),
            Control::Pause | Control::Resume | Control::SetVolume(_) => None,
        }
    }

    /// Ignora el selector de variación U+FE0F que algunos clientes agregan.
    pub fn from_emoji(emoji: &str) -> Option<Self> {
        let bare = emoji.trim_end_matches('\u{fe0f}');
        REACTION_PANEL
            .into_iter()
            .find(|control| control.emoji() == Some(bare))
    }

    /// Skip y stop cierran el colector de reacciones.
    pub fn ends_collector(self) -> bool {
        matches!(self, Control::Skip | Control::Stop)
    }

    /// Controles de volumen y silencio que exigen estar en el canal de voz
    /// de la sesión también cuando llegan por reacción.
    pub fn touches_volume(self) -> bool {
        matches!(
            self,
            Control::ToggleMute | Control::VolumeDown | Control::VolumeUp | Control::SetVolume(_)
        )
    }
}

/// Quién dispara un control y en qué canal de voz está.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invoker {
    pub user: UserId,
    pub voice_channel: Option<ChannelId>,
}

/// Resultado de un control, para responder a un comando.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Message(String),
    /// El usuario no está en el canal de voz de la sesión.
    Denied,
    /// Sin efecto (volumen en el límite, nada que pausar...).
    Ignored,
}

/// `member_channel` debe coincidir con el canal de voz de la sesión.
pub fn can_modify_queue(member_channel: Option<ChannelId>, session_channel: ChannelId) -> bool {
    member_channel == Some(session_channel)
}

/// Foto del estado de una sesión.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub songs: Vec<Song>,
    pub volume: u8,
    pub muted: bool,
    pub looping: bool,
}

impl SessionStatus {
    pub fn now_playing(&self) -> Option<&Song> {
        if self.state.has_track() {
            self.songs.first()
        } else {
            None
        }
    }
}

pub enum SessionEvent {
    Enqueue {
        song: Song,
        reply: oneshot::Sender<Result<usize, QueueFull>>,
    },
    Control {
        control: Control,
        invoker: Invoker,
        /// `None` para reacciones: la respuesta se publica en el canal de texto.
        reply: Option<oneshot::Sender<Feedback>>,
    },
    TrackEnded {
        generation: u64,
    },
    TrackFailed {
        generation: u64,
        reason: String,
    },
    Inspect {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_emojis_round_trip() {
        for control in REACTION_PANEL {
            let emoji = control.emoji().unwrap();
            assert_eq!(Control::from_emoji(emoji), Some(control));
        }
    }

    #[test]
    fn variation_selector_is_ignored() {
        assert_eq!(Control::from_emoji("⏭\u{fe0f}"), Some(Control::Skip));
        assert_eq!(Control::from_emoji("⏹️"), Some(Control::Stop));
        assert_eq!(Control::from_emoji("👍"), None);
    }

    #[test]
    fn only_skip_and_stop_end_the_collector() {
        let terminal: Vec<_> = REACTION_PANEL
            .into_iter()
            .filter(|c| c.ends_collector())
            .collect();
        assert_eq!(terminal, vec![Control::Skip, Control::Stop]);
    }

    #[test]
    fn draining_is_terminal() {
        use SessionState::*;
        for next in [Idle, Loading, Playing, Paused, Draining] {
            assert!(!Draining.allows(next));
        }
        assert!(Idle.allows(Loading));
        assert!(Loading.allows(Loading));
        assert!(Playing.allows(Paused));
        assert!(Paused.allows(Playing));
        assert!(!Idle.allows(Playing));
        assert!(!Loading.allows(Paused));
    }

    #[test]
    fn modify_check_requires_same_channel() {
        let session = ChannelId::new(10);
        assert!(can_modify_queue(Some(ChannelId::new(10)), session));
        assert!(!can_modify_queue(Some(ChannelId::new(11)), session));
        assert!(!can_modify_queue(None, session));
    }
}
