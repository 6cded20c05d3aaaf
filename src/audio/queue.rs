use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

/// Máximo del volumen expresado en porcentaje.
pub const MAX_VOLUME: u8 = 100;

/// Paso de volumen de los controles por reacción.
pub const VOLUME_STEP: u8 = 10;

/// Exponente de la curva logarítmica de volumen.
const LOG_VOLUME_EXPONENT: f32 = 1.660964;

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub requested_by: UserId,
}

impl Song {
    pub fn new(title: String, url: String, requested_by: UserId) -> Self {
        Self {
            title,
            url,
            duration: None,
            thumbnail: None,
            requested_by,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    /// Duración conocida; una duración cero equivale a desconocida.
    pub fn known_duration(&self) -> Option<Duration> {
        self.duration.filter(|d| !d.is_zero())
    }

    /// Vida del colector de reacciones para esta canción.
    pub fn collector_timeout(&self, ceiling: Duration) -> Duration {
        self.known_duration().unwrap_or(ceiling)
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("la cola está llena (máximo {max} canciones)")]
pub struct QueueFull {
    pub max: usize,
}

/// Cola de una guild: la cabeza es la canción que suena o está por sonar.
#[derive(Debug)]
pub struct MusicQueue {
    songs: VecDeque<Song>,
    volume: u8,
    muted: bool,
    looping: bool,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(volume: u8, max_size: usize) -> Self {
        Self {
            songs: VecDeque::new(),
            volume: volume.min(MAX_VOLUME),
            muted: false,
            looping: false,
            max_size,
        }
    }

    /// Agrega una canción al final; devuelve su posición (1 = cabeza).
    pub fn push(&mut self, song: Song) -> Result<usize, QueueFull> {
        if self.songs.len() >= self.max_size {
            return Err(QueueFull { max: self.max_size });
        }

        info!("➕ Agregado a la cola: {}", song.title);
        self.songs.push_back(song);
        Ok(self.songs.len())
    }

    pub fn head(&self) -> Option<&Song> {
        self.songs.front()
    }

    /// Quita la cabeza sin rotarla (error o fallo de stream).
    pub fn drop_head(&mut self) -> Option<Song> {
        self.songs.pop_front()
    }

    /// Avanza tras el fin natural de la canción actual.
    ///
    /// Con repetición activa la cabeza pasa al final de la cola. Devuelve
    /// `true` cuando la nueva cabeza tiene la misma URL que la que acaba de
    /// sonar, en cuyo caso el anuncio de "reproduciendo" se omite.
    pub fn advance_after_end(&mut self) -> bool {
        let Some(last) = self.songs.pop_front() else {
            return false;
        };

        if !self.looping {
            debug!("➡️ Fin de {}, sin repetición", last.title);
            return false;
        }

        let url = last.url.clone();
        self.songs.push_back(last);
        let silent = self.songs.front().is_some_and(|next| next.url == url);
        debug!("🔁 Canción rotada al final de la cola (silenciosa: {})", silent);
        silent
    }

    /// Vacía la cola y desactiva la repetición.
    pub fn clear(&mut self) {
        self.songs.clear();
        self.looping = false;
        info!("🗑️ Cola limpiada");
    }

    /// Mezcla todo excepto la cabeza.
    pub fn shuffle_upcoming(&mut self) {
        if self.songs.len() < 3 {
            return;
        }

        let slice = self.songs.make_contiguous();
        slice[1..].shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada");
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        if self.looping {
            info!("🔁 Repetición activada");
        } else {
            info!("➡️ Repetición desactivada");
        }
        self.looping
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    /// Sube el volumen un paso; `None` si ya está al máximo.
    pub fn volume_up(&mut self) -> Option<u8> {
        if self.volume >= MAX_VOLUME {
            return None;
        }
        self.volume = self.volume.saturating_add(VOLUME_STEP).min(MAX_VOLUME);
        Some(self.volume)
    }

    /// Baja el volumen un paso; `None` si ya está en cero.
    pub fn volume_down(&mut self) -> Option<u8> {
        if self.volume == 0 {
            return None;
        }
        self.volume = self.volume.saturating_sub(VOLUME_STEP);
        Some(self.volume)
    }

    /// Fija el volumen; `false` si el valor está fuera de rango.
    pub fn set_volume(&mut self, volume: u8) -> bool {
        if volume > MAX_VOLUME {
            return false;
        }
        self.volume = volume;
        true
    }

    /// Ganancia a aplicar al track actual.
    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            log_gain(self.volume)
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn songs(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter()
    }
}

/// Convierte un porcentaje de volumen a ganancia lineal con curva logarítmica.
pub fn log_gain(percent: u8) -> f32 {
    (f32::from(percent.min(MAX_VOLUME)) / 100.0).powf(LOG_VOLUME_EXPONENT)
}
