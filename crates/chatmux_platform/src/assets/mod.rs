#![forbid(unsafe_code)]

mod badges;
mod cache;
mod catalog;
mod common;

pub use badges::{BadgeResolver, resolve_in};
pub use cache::{PRUNE_INTERVAL, PrunableCache, spawn_cache_pruner};
pub use catalog::{EMOTE_API_BASE_URL, EmoteCatalog, EmoteSet, HttpEmoteCatalog};
