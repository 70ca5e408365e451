#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use chatmux_platform::SecretString;
use chatmux_platform::assets::EMOTE_API_BASE_URL;
use chatmux_platform::youtube::{PollConfig, YOUTUBE_API_BASE_URL};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::server::store::StoreLimits;

/// Default config path: `~/.chatmux/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chatmux").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub store: StoreSettings,
	pub twitch: TwitchSettings,
	pub youtube: YouTubeSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// API bind address (`http://host:port`); the CLI flag wins over this.
	pub http_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Push-stream keepalive period.
	pub heartbeat: Duration,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			http_bind: None,
			health_bind: None,
			metrics_bind: None,
			heartbeat: Duration::from_secs(15),
		}
	}
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
	pub max_messages: usize,
	pub max_age: Duration,
}

impl Default for StoreSettings {
	fn default() -> Self {
		let limits = StoreLimits::default();
		Self {
			max_messages: limits.max_messages,
			max_age: limits.max_age,
		}
	}
}

impl StoreSettings {
	pub fn limits(&self) -> StoreLimits {
		StoreLimits {
			max_messages: self.max_messages,
			max_age: self.max_age,
		}
	}
}

#[derive(Debug, Clone)]
pub struct TwitchSettings {
	/// Twitch App Client ID, used for Helix badge lookups.
	pub client_id: Option<String>,
	pub client_secret: Option<SecretString>,

	/// IRC websocket URL (optional override).
	pub irc_ws_url: Option<String>,
	pub emote_api_base_url: String,

	/// Reconnect backoff min/max (optional).
	pub reconnect_min_delay: Option<Duration>,
	pub reconnect_max_delay: Option<Duration>,
}

impl Default for TwitchSettings {
	fn default() -> Self {
		Self {
			client_id: None,
			client_secret: None,
			irc_ws_url: None,
			emote_api_base_url: EMOTE_API_BASE_URL.to_string(),
			reconnect_min_delay: None,
			reconnect_max_delay: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct YouTubeSettings {
	pub api_key: Option<SecretString>,
	pub api_base_url: String,
	pub default_poll_interval: Duration,
	pub error_retry: Duration,
}

impl Default for YouTubeSettings {
	fn default() -> Self {
		let poll = PollConfig::default();
		Self {
			api_key: None,
			api_base_url: YOUTUBE_API_BASE_URL.to_string(),
			default_poll_interval: poll.default_interval,
			error_retry: poll.error_retry,
		}
	}
}

impl YouTubeSettings {
	pub fn poll_config(&self) -> PollConfig {
		PollConfig {
			default_interval: self.default_poll_interval,
			error_retry: self.error_retry,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	store: FileStoreSettings,

	#[serde(default)]
	twitch: FileTwitchSettings,

	#[serde(default)]
	youtube: FileYouTubeSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	http_bind: Option<String>,
	health_bind: Option<String>,
	metrics_bind: Option<String>,
	heartbeat_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStoreSettings {
	max_messages: Option<usize>,
	max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTwitchSettings {
	client_id: Option<String>,
	client_secret: Option<String>,
	irc_ws_url: Option<String>,
	emote_api_base_url: Option<String>,

	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileYouTubeSettings {
	api_key: Option<String>,
	api_base_url: Option<String>,
	default_poll_interval_ms: Option<u64>,
	error_retry_ms: Option<u64>,
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.filter(|s| !s.trim().is_empty())
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerConfig::default();

		let server = ServerSettings {
			http_bind: non_blank(file.server.http_bind),
			health_bind: non_blank(file.server.health_bind),
			metrics_bind: non_blank(file.server.metrics_bind),
			heartbeat: file
				.server
				.heartbeat_secs
				.filter(|s| *s > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.server.heartbeat),
		};

		let store = StoreSettings {
			max_messages: file
				.store
				.max_messages
				.filter(|n| *n > 0)
				.unwrap_or(defaults.store.max_messages),
			max_age: file
				.store
				.max_age_secs
				.filter(|s| *s > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.store.max_age),
		};

		let twitch = TwitchSettings {
			client_id: non_blank(file.twitch.client_id),
			client_secret: non_blank(file.twitch.client_secret).map(SecretString::new),
			irc_ws_url: non_blank(file.twitch.irc_ws_url),
			emote_api_base_url: non_blank(file.twitch.emote_api_base_url).unwrap_or(defaults.twitch.emote_api_base_url),
			reconnect_min_delay: file.twitch.reconnect_min_delay_ms.map(Duration::from_millis),
			reconnect_max_delay: file.twitch.reconnect_max_delay_ms.map(Duration::from_millis),
		};

		let youtube = YouTubeSettings {
			api_key: non_blank(file.youtube.api_key).map(SecretString::new),
			api_base_url: non_blank(file.youtube.api_base_url).unwrap_or(defaults.youtube.api_base_url),
			default_poll_interval: file
				.youtube
				.default_poll_interval_ms
				.filter(|ms| *ms > 0)
				.map(Duration::from_millis)
				.unwrap_or(defaults.youtube.default_poll_interval),
			error_retry: file
				.youtube
				.error_retry_ms
				.filter(|ms| *ms > 0)
				.map(Duration::from_millis)
				.unwrap_or(defaults.youtube.error_retry),
		};

		Self {
			server,
			store,
			twitch,
			youtube,
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	apply_env_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Apply overrides from `lookup`, which maps a variable name to its value.
fn apply_env_overrides_from(cfg: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
	let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = get("YOUTUBE_API_KEY") {
		cfg.youtube.api_key = Some(SecretString::new(v));
		info!("youtube config: api_key overridden by env");
	}

	if let Some(v) = get("CHATMUX_YOUTUBE_API_BASE_URL") {
		cfg.youtube.api_base_url = v;
		info!("youtube config: api_base_url overridden by env");
	}

	if let Some(v) = get("TWITCH_CLIENT_ID") {
		cfg.twitch.client_id = Some(v);
		info!("twitch config: client_id overridden by env");
	}

	if let Some(v) = get("TWITCH_CLIENT_SECRET") {
		cfg.twitch.client_secret = Some(SecretString::new(v));
		info!("twitch config: client_secret overridden by env");
	}

	if let Some(v) = get("CHATMUX_TWITCH_IRC_WS_URL") {
		cfg.twitch.irc_ws_url = Some(v);
		debug!("twitch config: irc_ws_url overridden by env");
	}

	if let Some(v) = get("CHATMUX_HTTP_BIND") {
		cfg.server.http_bind = Some(v);
		info!("server config: http_bind overridden by env");
	}

	if let Some(v) = get("CHATMUX_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = get("CHATMUX_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if cfg.youtube.api_key.is_none() {
		warn!("youtube config: no api_key; youtube connects will fail");
	}

	if let (Some(min), Some(max)) = (cfg.twitch.reconnect_min_delay, cfg.twitch.reconnect_max_delay)
		&& min > max
	{
		warn!(
			min_ms = min.as_millis(),
			max_ms = max.as_millis(),
			"twitch config: reconnect_min_delay > reconnect_max_delay; swapping"
		);
		cfg.twitch.reconnect_min_delay = Some(max);
		cfg.twitch.reconnect_max_delay = Some(min);
	}
}
