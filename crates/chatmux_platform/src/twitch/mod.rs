#![forbid(unsafe_code)]

mod adapter;
pub mod helix;
pub mod irc;

pub use adapter::{TwitchIrcAdapter, TwitchIrcConfig};
pub use helix::{BadgeSets, HelixClient, TwitchAppCredentials};
