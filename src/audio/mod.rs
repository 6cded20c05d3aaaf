//! # Audio Module
//!
//! Playback engine for the reaction jukebox.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - Ordered songs per guild, head is the song that plays
//! - Loop rotation, shuffle of upcoming songs, clamped volume
//!
//! ### [`session`] - Session Vocabulary
//! - Playback states and the transitions between them
//! - Controls shared by the reaction panel and slash commands
//!
//! ### [`player`] - Playback Controller
//! - One task per guild owns the queue and the current track
//! - Track events carry a generation so late events are discarded
//! - Drained sessions leave voice after the configured stay time
//!
//! ### [`voice`] - Songbird Adapter
//! - Joins voice channels and wires track end/error events back to the session
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let controller = PlaybackController::new(sources, locale, PlaybackSettings::from(&config));
//!
//! controller.start(guild_id, song, init)?;
//! controller.enqueue(guild_id, next_song).await?;
//! controller.control(guild_id, Control::Skip, invoker).await?;
//! ```

pub mod player;
pub mod queue;
pub mod session;
pub mod voice;
