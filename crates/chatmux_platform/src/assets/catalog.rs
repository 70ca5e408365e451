#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chatmux_domain::{ChannelName, Emote};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{info, warn};

use super::cache::PrunableCache;
use super::common::{Cached, get_map_cache, get_optional_cache, prune_map_cache, prune_optional_cache, set_map_cache, set_optional_cache};

pub const EMOTE_API_BASE_URL: &str = "https://emotes.crippled.dev/v1";
const CHANNEL_EMOTES_TTL: Duration = Duration::from_secs(600);
const GLOBAL_EMOTES_TTL: Duration = Duration::from_secs(3600);

/// Shared, immutable emote list.
pub type EmoteSet = Arc<[Emote]>;

/// Third-party emote catalog.
#[async_trait::async_trait]
pub trait EmoteCatalog: Send + Sync + 'static {
	/// Channel emotes merged with the globals.
	async fn fetch_all_emotes(&self, channel: &ChannelName) -> anyhow::Result<EmoteSet>;

	async fn fetch_global_emotes(&self) -> anyhow::Result<EmoteSet>;
}

#[derive(Debug, Deserialize)]
struct CatalogEmote {
	code: String,
	#[serde(default)]
	urls: Vec<CatalogUrl>,
	#[serde(default)]
	animated: bool,
	#[serde(default)]
	zero_width: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogUrl {
	#[serde(default)]
	size: String,
	#[serde(default)]
	url: String,
}

/// Prefer 3x, then 2x, then whatever comes first.
fn pick_url(urls: &[CatalogUrl]) -> Option<&str> {
	urls.iter()
		.find(|u| u.size == "3x")
		.or_else(|| urls.iter().find(|u| u.size == "2x"))
		.or_else(|| urls.first())
		.map(|u| u.url.as_str())
		.filter(|u| !u.is_empty())
}

fn catalog_emote_to_emote(item: &CatalogEmote) -> Option<Emote> {
	if item.code.is_empty() {
		return None;
	}
	let url = pick_url(&item.urls)?;
	Some(Emote {
		id: item.code.clone(),
		code: item.code.clone(),
		url: url.to_string(),
		animated: item.animated,
		zero_width: item.zero_width,
	})
}

fn parse_catalog(items: &[CatalogEmote]) -> Vec<Emote> {
	items.iter().filter_map(catalog_emote_to_emote).collect()
}

/// HTTP emote catalog with per-channel and global TTL caches.
pub struct HttpEmoteCatalog {
	http: reqwest::Client,
	base_url: String,
	channel_cache: Mutex<HashMap<String, Cached<EmoteSet>>>,
	global_cache: Mutex<Option<Cached<EmoteSet>>>,
	/// Last globals ever fetched; used as a fallback after TTL expiry.
	last_globals: Mutex<Option<EmoteSet>>,
}

impl HttpEmoteCatalog {
	pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("chatmux/0.x (emotes)")
			.timeout(Duration::from_secs(10))
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			channel_cache: Mutex::new(HashMap::new()),
			global_cache: Mutex::new(None),
			last_globals: Mutex::new(None),
		})
	}

	async fn get_catalog(&self, url: String, label: &'static str) -> anyhow::Result<Vec<Emote>> {
		let resp = self
			.http
			.get(url)
			.send()
			.await
			.with_context(|| format!("{label} request"))?
			.error_for_status()
			.with_context(|| format!("{label} status"))?;

		let body: Vec<CatalogEmote> = resp.json().await.with_context(|| format!("{label} json"))?;
		Ok(parse_catalog(&body))
	}

	fn fallback_globals(&self) -> EmoteSet {
		self.last_globals.lock().clone().unwrap_or_else(|| Arc::from(Vec::new()))
	}
}

#[async_trait::async_trait]
impl EmoteCatalog for HttpEmoteCatalog {
	async fn fetch_all_emotes(&self, channel: &ChannelName) -> anyhow::Result<EmoteSet> {
		let key = channel.as_str();
		if let Some(set) = get_map_cache(&self.channel_cache, key, CHANNEL_EMOTES_TTL) {
			return Ok(set);
		}

		let url = format!("{}/channel/{}/all", self.base_url, urlencoding::encode(key));
		let (channel_res, globals) = tokio::join!(
			self.get_catalog(url, "channel emotes"),
			self.fetch_global_emotes()
		);
		let globals = globals.unwrap_or_else(|_| self.fallback_globals());

		let channel_emotes = match channel_res {
			Ok(list) => list,
			Err(e) => {
				warn!(channel = %key, error = %e, "channel emotes unavailable; using globals only");
				return Ok(globals);
			}
		};

		let mut all: Vec<Emote> = globals.iter().cloned().collect();
		all.extend(channel_emotes);
		let set: EmoteSet = Arc::from(all);

		info!(channel = %key, emote_count = set.len(), "channel emotes loaded (including globals)");
		set_map_cache(&self.channel_cache, key, set.clone());
		Ok(set)
	}

	async fn fetch_global_emotes(&self) -> anyhow::Result<EmoteSet> {
		if let Some(set) = get_optional_cache(&self.global_cache, GLOBAL_EMOTES_TTL) {
			return Ok(set);
		}

		let url = format!("{}/global/twitch", self.base_url);
		let list = match self.get_catalog(url, "global emotes").await {
			Ok(list) => list,
			Err(e) => {
				warn!(error = %e, "global emotes unavailable");
				return Err(e);
			}
		};

		let set: EmoteSet = Arc::from(list);
		info!(emote_count = set.len(), "global emotes loaded");
		set_optional_cache(&self.global_cache, set.clone());
		*self.last_globals.lock() = Some(set.clone());
		Ok(set)
	}
}

impl PrunableCache for HttpEmoteCatalog {
	fn prune(&self) {
		prune_map_cache(&self.channel_cache, CHANNEL_EMOTES_TTL);
		prune_optional_cache(&self.global_cache, GLOBAL_EMOTES_TTL);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn url_preference_and_flags() {
		let raw = r#"[
			{"code":"catJAM","animated":true,"urls":[{"size":"1x","url":"u1"},{"size":"2x","url":"u2"},{"size":"3x","url":"u3"}]},
			{"code":"SoSnowy","zero_width":true,"urls":[{"size":"1x","url":"s1"},{"size":"2x","url":"s2"}]},
			{"code":"Odd","urls":[{"size":"4x","url":"o4"}]},
			{"code":"NoUrls","urls":[]},
			{"code":"","urls":[{"size":"3x","url":"x"}]}
		]"#;
		let items: Vec<CatalogEmote> = serde_json::from_str(raw).unwrap();
		let emotes = parse_catalog(&items);

		assert_eq!(emotes.len(), 3);
		assert_eq!(emotes[0].url, "u3");
		assert!(emotes[0].animated);
		assert!(!emotes[0].zero_width);
		assert_eq!(emotes[0].id, "catJAM");
		assert_eq!(emotes[1].url, "s2");
		assert!(emotes[1].zero_width);
		assert_eq!(emotes[2].url, "o4");
	}

	#[tokio::test]
	async fn unreachable_catalog_falls_back_to_empty() {
		let catalog = HttpEmoteCatalog::new("http://127.0.0.1:1").unwrap();
		let channel = ChannelName::new("somechannel").unwrap();

		assert!(catalog.fetch_global_emotes().await.is_err());
		let set = catalog.fetch_all_emotes(&channel).await.unwrap();
		assert!(set.is_empty());
	}
}
