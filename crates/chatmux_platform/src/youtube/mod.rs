#![forbid(unsafe_code)]

mod adapter;
pub mod client;
pub mod emoji;

pub use adapter::{PollConfig, YouTubeChatPoller};
pub use client::{LiveChatItem, LiveChatPage, LiveChatSource, YOUTUBE_API_BASE_URL, YouTubeClient, YouTubeTarget};
