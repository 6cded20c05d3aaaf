use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::i18n::Locale;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Reproducción
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub stay_time: u64, // En segundos
    pub pruning: bool,

    // Fuentes
    pub soundcloud_client_id: Option<String>,

    // Idioma
    pub locale: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            stay_time: std::env::var("STAY_TIME")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            pruning: std::env::var("PRUNING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            soundcloud_client_id: std::env::var("SOUNDCLOUD_CLIENT_ID")
                .ok()
                .filter(|id| !id.trim().is_empty()),

            locale: std::env::var("LOCALE").unwrap_or_else(|_| "es".to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default volume must be between 0 and 100
    /// - Max queue size must be greater than 0
    /// - Locale must be one of the bundled locale files
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if !Locale::is_supported(&self.locale) {
            anyhow::bail!(
                "Unsupported locale '{}', expected one of: {}",
                self.locale,
                Locale::SUPPORTED.join(", ")
            );
        }

        Ok(())
    }

    /// Tiempo de espera antes de abandonar el canal de voz con la cola vacía.
    pub fn stay_duration(&self) -> Duration {
        Duration::from_secs(self.stay_time)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token and SoundCloud credentials are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Playback: {}% vol, {} queue, {} stay, pruning={}\n  \
            Sources: SoundCloud API={}\n  \
            Locale: {}",
            self.guild_id.map_or("global".to_string(), |id| format!("guild {}", id)),
            self.default_volume,
            self.max_queue_size,
            humantime::format_duration(self.stay_duration()),
            self.pruning,
            self.soundcloud_client_id.is_some(),
            self.locale
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,

            default_volume: 100,
            max_queue_size: 1000,
            stay_time: 30,
            pruning: false,

            soundcloud_client_id: None,

            locale: "es".to_string(),
        }
    }
}
