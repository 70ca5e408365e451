#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::SecretString;

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv";
pub const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// `set_id → version → image url`.
pub type BadgeSets = HashMap<String, BTreeMap<String, String>>;

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	if let Some(v) = headers.get(RETRY_AFTER)
		&& let Ok(s) = v.to_str()
		&& let Ok(secs) = s.trim().parse::<u64>()
	{
		return Some(Duration::from_secs(secs));
	}

	if let Some(v) = headers.get("Ratelimit-Reset")
		&& let Ok(s) = v.to_str()
		&& let Ok(reset_unix) = s.trim().parse::<u64>()
	{
		let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
		if reset_unix > now {
			return Some(Duration::from_secs((reset_unix - now).min(30)));
		}
	}

	None
}

/// Send once, retrying a single time on 429 (honoring rate-limit headers) or 5xx.
async fn send_with_retry(req: reqwest::RequestBuilder, label: &'static str) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("helix {label} send"))?;
	let status = resp.status();

	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		let body = resp.text().await.unwrap_or_default();
		anyhow::bail!("helix auth failed (status={status}) body={body}");
	}

	let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
		retry_delay_from_headers(resp.headers())
	} else if status.is_server_error() {
		Some(Duration::from_millis(250))
	} else {
		None
	};

	if let Some(delay) = retry_after
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(delay).await;
		return retry.send().await.with_context(|| format!("helix {label} retry send"));
	}

	Ok(resp)
}

/// App credentials for the client-credentials grant.
#[derive(Debug, Clone)]
pub struct TwitchAppCredentials {
	pub client_id: String,
	pub client_secret: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct AppTokenResponse {
	pub access_token: String,
	pub expires_in: u64,
}

struct CachedToken {
	access_token: SecretString,
	expires_at: Instant,
}

impl CachedToken {
	fn is_fresh(&self, now: Instant) -> bool {
		self.expires_at > now + TOKEN_EXPIRY_MARGIN
	}
}

/// Request an app access token (client credentials).
pub async fn request_app_token(
	http: &reqwest::Client,
	token_url: &str,
	creds: &TwitchAppCredentials,
) -> anyhow::Result<AppTokenResponse> {
	let resp = http
		.post(token_url)
		.form(&[
			("client_id", creds.client_id.as_str()),
			("client_secret", creds.client_secret.expose()),
			("grant_type", "client_credentials"),
		])
		.send()
		.await
		.context("twitch app token request")?;

	let status = resp.status();
	let body = resp.text().await.context("twitch app token read body")?;

	if !status.is_success() {
		anyhow::bail!("twitch app token failed: status={status} body={body}");
	}

	serde_json::from_str(&body).context("twitch app token parse json")
}

/// Helix client authenticated with a cached app token.
pub struct HelixClient {
	http: reqwest::Client,
	base_url: Url,
	token_url: String,
	creds: TwitchAppCredentials,
	token: Mutex<Option<CachedToken>>,
}

impl HelixClient {
	pub fn new(creds: TwitchAppCredentials) -> anyhow::Result<Self> {
		let base_url = Url::parse(HELIX_BASE_URL).context("parse helix base url")?;
		Self::with_urls(creds, base_url, TOKEN_URL.to_string())
	}

	pub fn with_urls(creds: TwitchAppCredentials, base_url: Url, token_url: String) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("chatmux/0.x (helix)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url,
			token_url,
			creds,
			token: Mutex::new(None),
		})
	}

	/// Cached app token, refreshed when it is within five minutes of expiry.
	async fn bearer(&self) -> anyhow::Result<SecretString> {
		let mut guard = self.token.lock().await;
		let now = Instant::now();
		if let Some(cached) = guard.as_ref()
			&& cached.is_fresh(now)
		{
			return Ok(cached.access_token.clone());
		}

		let resp = request_app_token(&self.http, &self.token_url, &self.creds).await?;
		info!(expires_in = resp.expires_in, "twitch app token acquired");

		let access_token = SecretString::new(resp.access_token);
		*guard = Some(CachedToken {
			access_token: access_token.clone(),
			expires_at: now + Duration::from_secs(resp.expires_in),
		});
		Ok(access_token)
	}

	fn url(&self, path_and_query: &str) -> anyhow::Result<Url> {
		self.base_url.join(path_and_query).context("join helix url")
	}

	async fn get_json<T: serde::de::DeserializeOwned>(&self, path_and_query: &str, label: &'static str) -> anyhow::Result<T> {
		let url = self.url(path_and_query)?;
		let bearer = self.bearer().await?;

		let req = self
			.http
			.get(url)
			.header("Client-Id", &self.creds.client_id)
			.header("Authorization", format!("Bearer {}", bearer.expose()));

		let resp = send_with_retry(req, label).await?;
		let status = resp.status();
		let body = resp.text().await.with_context(|| format!("helix {label} read body"))?;

		if !status.is_success() {
			anyhow::bail!("helix {label} failed: status={status} body={body}");
		}

		serde_json::from_str(&body).with_context(|| format!("helix {label} parse json"))
	}

	/// Broadcaster id for a login, if the user exists.
	pub async fn user_id_for_login(&self, login: &str) -> anyhow::Result<Option<String>> {
		let parsed: HelixUsersResponse = self
			.get_json(&format!("/helix/users?login={}", urlencoding::encode(login)), "GET /helix/users")
			.await?;
		Ok(parsed.data.into_iter().next().map(|u| u.id))
	}

	pub async fn channel_badges(&self, broadcaster_id: &str) -> anyhow::Result<BadgeSets> {
		let parsed: HelixBadgesResponse = self
			.get_json(
				&format!("/helix/chat/badges?broadcaster_id={}", urlencoding::encode(broadcaster_id)),
				"GET /helix/chat/badges",
			)
			.await?;
		let sets = badge_sets_from_response(parsed);
		debug!(broadcaster_id, set_count = sets.len(), "twitch channel badges fetched");
		Ok(sets)
	}

	pub async fn global_badges(&self) -> anyhow::Result<BadgeSets> {
		let parsed: HelixBadgesResponse = self.get_json("/helix/chat/badges/global", "GET /helix/chat/badges/global").await?;
		let sets = badge_sets_from_response(parsed);
		debug!(set_count = sets.len(), "twitch global badges fetched");
		Ok(sets)
	}
}

fn badge_sets_from_response(resp: HelixBadgesResponse) -> BadgeSets {
	resp.data
		.into_iter()
		.map(|set| {
			let versions = set
				.versions
				.into_iter()
				.filter_map(|v| {
					let url = v.image_url_2x.or(v.image_url_1x)?;
					Some((v.id, url))
				})
				.collect();
			(set.set_id, versions)
		})
		.collect()
}

#[derive(Debug, Deserialize)]
struct HelixUsersResponse {
	data: Vec<HelixUser>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
	id: String,
}

#[derive(Debug, Deserialize)]
struct HelixBadgesResponse {
	data: Vec<HelixBadgeSet>,
}

#[derive(Debug, Deserialize)]
struct HelixBadgeSet {
	set_id: String,
	versions: Vec<HelixBadgeVersion>,
}

#[derive(Debug, Deserialize)]
struct HelixBadgeVersion {
	id: String,
	#[serde(default)]
	image_url_1x: Option<String>,
	#[serde(default)]
	image_url_2x: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn badge_response_maps_set_version_url() {
		let raw = r#"{"data":[
			{"set_id":"subscriber","versions":[
				{"id":"0","image_url_1x":"https://x/s0/1","image_url_2x":"https://x/s0/2"},
				{"id":"12","image_url_1x":"https://x/s12/1"}
			]},
			{"set_id":"vip","versions":[{"id":"1"}]}
		]}"#;
		let parsed: HelixBadgesResponse = serde_json::from_str(raw).unwrap();
		let sets = badge_sets_from_response(parsed);

		assert_eq!(sets["subscriber"]["0"], "https://x/s0/2");
		assert_eq!(sets["subscriber"]["12"], "https://x/s12/1");
		assert!(sets["vip"].is_empty());
	}

	#[test]
	fn token_freshness_respects_margin() {
		let now = Instant::now();
		let token = |secs| CachedToken {
			access_token: SecretString::new("t"),
			expires_at: now + Duration::from_secs(secs),
		};
		assert!(token(3600).is_fresh(now));
		assert!(!token(299).is_fresh(now));
	}

	#[test]
	fn retry_after_header_is_honored() {
		let mut headers = HeaderMap::new();
		headers.insert(RETRY_AFTER, "3".parse().unwrap());
		assert_eq!(retry_delay_from_headers(&headers), Some(Duration::from_secs(3)));
		assert_eq!(retry_delay_from_headers(&HeaderMap::new()), None);
	}
}
