pub mod embeds;
pub mod reactions;
