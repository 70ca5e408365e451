#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::SecretString;

pub const YOUTUBE_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// What to attach to: a live video, or a channel whose current live video is
/// looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YouTubeTarget {
	Video(String),
	/// `@handle`, bare handle, or `UC…` channel id.
	Channel(String),
}

impl YouTubeTarget {
	pub fn as_str(&self) -> &str {
		match self {
			YouTubeTarget::Video(id) | YouTubeTarget::Channel(id) => id,
		}
	}
}

/// Non-`UC` inputs are handles that must be resolved first.
pub fn needs_handle_lookup(channel_ref: &str) -> bool {
	channel_ref.starts_with('@') || !channel_ref.starts_with("UC")
}

pub fn as_handle(channel_ref: &str) -> String {
	if channel_ref.starts_with('@') {
		channel_ref.to_string()
	} else {
		format!("@{channel_ref}")
	}
}

/// One chat item reduced to what the overlay shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveChatItem {
	pub author: String,
	pub text: String,
}

/// A page of live chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveChatPage {
	pub items: Vec<LiveChatItem>,
	pub next_page_token: Option<String>,
	pub polling_interval: Option<Duration>,
}

/// Source of live chat pages; the poller only depends on this.
#[async_trait::async_trait]
pub trait LiveChatSource: Send + Sync + 'static {
	async fn list_messages(&self, live_chat_id: &str, page_token: Option<&str>) -> anyhow::Result<LiveChatPage>;
}

/// YouTube Data API v3 client (API key auth).
#[derive(Clone)]
pub struct YouTubeClient {
	http: reqwest::Client,
	base_url: String,
	api_key: SecretString,
}

impl YouTubeClient {
	pub fn new(api_key: SecretString, base_url: impl Into<String>) -> anyhow::Result<Self> {
		if api_key.is_empty() {
			return Err(anyhow!("YouTube API key not configured"));
		}

		let http = reqwest::Client::builder()
			.user_agent("chatmux/0.x (youtube)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			api_key,
		})
	}

	fn url(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Url> {
		let mut url = Url::parse(&format!("{}/{path}", self.base_url)).context("build youtube url")?;
		{
			let mut pairs = url.query_pairs_mut();
			for (k, v) in query {
				pairs.append_pair(k, v);
			}
			pairs.append_pair("key", self.api_key.expose());
		}
		Ok(url)
	}

	async fn get_json<T: serde::de::DeserializeOwned>(
		&self,
		path: &str,
		query: &[(&str, &str)],
		label: &'static str,
	) -> anyhow::Result<T> {
		let url = self.url(path, query)?;
		let resp = self
			.http
			.get(url)
			.send()
			.await
			.with_context(|| format!("youtube {label} send"))?;

		let status = resp.status();
		let body = resp.text().await.with_context(|| format!("youtube {label} read body"))?;

		if !status.is_success() {
			anyhow::bail!("youtube {label} failed: status={status} body={body}");
		}

		serde_json::from_str(&body).with_context(|| format!("youtube {label} parse json"))
	}

	/// `UC…` id for a channel reference.
	pub async fn resolve_channel_id(&self, channel_ref: &str) -> anyhow::Result<String> {
		if !needs_handle_lookup(channel_ref) {
			return Ok(channel_ref.to_string());
		}

		let handle = as_handle(channel_ref);
		let parsed: ItemsResponse<ChannelItem> = self
			.get_json("channels", &[("part", "id"), ("forHandle", handle.as_str())], "channels")
			.await
			.context("invalid channel handle")?;

		let id = parsed
			.items
			.into_iter()
			.next()
			.map(|c| c.id)
			.ok_or_else(|| anyhow!("channel not found: {handle}"))?;

		debug!(%handle, channel_id = %id, "youtube handle resolved");
		Ok(id)
	}

	/// Video id of the channel's current live broadcast.
	pub async fn resolve_live_video_id(&self, channel_ref: &str) -> anyhow::Result<String> {
		let channel_id = self.resolve_channel_id(channel_ref).await?;
		let parsed: ItemsResponse<SearchItem> = self
			.get_json(
				"search",
				&[
					("part", "snippet"),
					("channelId", channel_id.as_str()),
					("eventType", "live"),
					("type", "video"),
				],
				"search",
			)
			.await?;

		let video_id = parsed
			.items
			.into_iter()
			.find_map(|item| item.id.video_id)
			.ok_or_else(|| anyhow!("no live stream found for channel {channel_ref}"))?;

		info!(channel_ref, %video_id, "youtube live video found");
		Ok(video_id)
	}

	/// Active live chat id of a video.
	pub async fn resolve_live_chat_id(&self, video_id: &str) -> anyhow::Result<String> {
		let parsed: ItemsResponse<VideoItem> = self
			.get_json("videos", &[("part", "liveStreamingDetails"), ("id", video_id)], "videos")
			.await?;

		let video = parsed
			.items
			.into_iter()
			.next()
			.ok_or_else(|| anyhow!("video not found: {video_id}"))?;

		video
			.live_streaming_details
			.and_then(|d| d.active_live_chat_id)
			.ok_or_else(|| anyhow!("no active live chat found for video {video_id}"))
	}

	/// Resolve a target to `(video_id, live_chat_id)`.
	pub async fn resolve_target(&self, target: &YouTubeTarget) -> anyhow::Result<(String, String)> {
		let video_id = match target {
			YouTubeTarget::Video(id) => id.clone(),
			YouTubeTarget::Channel(channel_ref) => self.resolve_live_video_id(channel_ref).await?,
		};
		let live_chat_id = self.resolve_live_chat_id(&video_id).await?;
		Ok((video_id, live_chat_id))
	}
}

#[async_trait::async_trait]
impl LiveChatSource for YouTubeClient {
	async fn list_messages(&self, live_chat_id: &str, page_token: Option<&str>) -> anyhow::Result<LiveChatPage> {
		let mut query = vec![("liveChatId", live_chat_id), ("part", "snippet,authorDetails")];
		if let Some(token) = page_token.filter(|t| !t.is_empty()) {
			query.push(("pageToken", token));
		}

		let parsed: LiveChatMessagesResponse = self.get_json("liveChat/messages", &query, "liveChat/messages").await?;
		Ok(parsed.into_page())
	}
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
	#[serde(default = "Vec::new")]
	items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
	id: String,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
	id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
	#[serde(default)]
	video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
	#[serde(default)]
	live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
	#[serde(default)]
	active_live_chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatMessagesResponse {
	#[serde(default)]
	items: Vec<LiveChatMessageItem>,
	#[serde(default)]
	next_page_token: Option<String>,
	#[serde(default)]
	polling_interval_millis: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatMessageItem {
	#[serde(default)]
	snippet: Option<LiveChatSnippet>,
	#[serde(default)]
	author_details: Option<LiveChatAuthor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatSnippet {
	#[serde(default)]
	display_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatAuthor {
	display_name: String,
}

impl LiveChatMessagesResponse {
	fn into_page(self) -> LiveChatPage {
		let items = self
			.items
			.into_iter()
			.filter_map(|item| {
				let author = item.author_details?.display_name;
				let text = item.snippet?.display_message.filter(|t| !t.is_empty())?;
				Some(LiveChatItem { author, text })
			})
			.collect();

		LiveChatPage {
			items,
			next_page_token: self.next_page_token.filter(|t| !t.is_empty()),
			polling_interval: self.polling_interval_millis.map(Duration::from_millis),
		}
	}
}
