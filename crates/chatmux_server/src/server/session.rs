#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chatmux_domain::{ChannelName, Platform, PlatformStatus, StatusSnapshot};
use chatmux_platform::assets::{BadgeResolver, EmoteCatalog, EmoteSet};
use chatmux_platform::twitch::{TwitchIrcAdapter, TwitchIrcConfig};
use chatmux_platform::youtube::{PollConfig, YouTubeChatPoller, YouTubeClient, YouTubeTarget};
use chatmux_platform::{AdapterEventRx, AdapterHandle, PlatformAdapter, SecretString, new_session_id};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::server::ingest::{ChatCore, SessionBinding, SessionEvent, SessionEventTx};

/// What a connect request attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
	Twitch(ChannelName),
	YouTube(YouTubeTarget),
}

impl ConnectTarget {
	/// Build a target from connect-request fields.
	///
	/// YouTube prefers `channel_id` over `video_id` when both are given.
	pub fn from_parts(
		platform: Platform,
		channel: Option<&str>,
		video_id: Option<&str>,
		channel_id: Option<&str>,
	) -> Result<Self, SessionError> {
		fn non_empty(v: Option<&str>) -> Option<&str> {
			v.map(str::trim).filter(|v| !v.is_empty())
		}

		match platform {
			Platform::Twitch => {
				let channel = non_empty(channel).ok_or(SessionError::InvalidTarget {
					platform,
					reason: "missing channel".to_string(),
				})?;
				ChannelName::new(channel)
					.map(ConnectTarget::Twitch)
					.map_err(|e| SessionError::InvalidTarget {
						platform,
						reason: e.to_string(),
					})
			}
			Platform::YouTube => match (non_empty(channel_id), non_empty(video_id)) {
				(Some(channel_ref), _) => Ok(ConnectTarget::YouTube(YouTubeTarget::Channel(channel_ref.to_string()))),
				(None, Some(video)) => Ok(ConnectTarget::YouTube(YouTubeTarget::Video(video.to_string()))),
				(None, None) => Err(SessionError::InvalidTarget {
					platform,
					reason: "missing videoId or channelId".to_string(),
				}),
			},
		}
	}

	pub fn platform(&self) -> Platform {
		match self {
			ConnectTarget::Twitch(_) => Platform::Twitch,
			ConnectTarget::YouTube(_) => Platform::YouTube,
		}
	}
}

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("invalid {platform} target: {reason}")]
	InvalidTarget { platform: Platform, reason: String },

	#[error("failed to connect to {platform}: {reason}")]
	Setup { platform: Platform, reason: String },
}

/// An adapter ready to spawn, plus the identifier reported in status.
pub struct PreparedSession {
	pub identifier: String,
	pub adapter: Box<dyn PlatformAdapter>,
}

/// Builds platform adapters; resolution that can fail happens here.
#[async_trait::async_trait]
pub trait AdapterFactory: Send + Sync + 'static {
	async fn prepare(&self, target: &ConnectTarget) -> anyhow::Result<PreparedSession>;
}

/// Settings used to build live adapters.
#[derive(Debug, Clone)]
pub struct LiveAdapterSettings {
	pub irc_ws_url: Option<String>,
	pub reconnect_min_delay: Option<Duration>,
	pub reconnect_max_delay: Option<Duration>,
	pub youtube_api_key: Option<SecretString>,
	pub youtube_api_base_url: String,
	pub poll: PollConfig,
}

/// Factory for the real Twitch IRC and YouTube poll adapters.
pub struct LiveAdapterFactory {
	settings: LiveAdapterSettings,
}

impl LiveAdapterFactory {
	pub fn new(settings: LiveAdapterSettings) -> Self {
		Self { settings }
	}

	fn twitch_config(&self, channel: ChannelName) -> TwitchIrcConfig {
		let mut cfg = TwitchIrcConfig::new(channel);
		if let Some(url) = &self.settings.irc_ws_url {
			cfg.ws_url = url.clone();
		}
		if let Some(min) = self.settings.reconnect_min_delay {
			cfg.reconnect_min_delay = min;
		}
		if let Some(max) = self.settings.reconnect_max_delay {
			cfg.reconnect_max_delay = max;
		}
		cfg
	}
}

#[async_trait::async_trait]
impl AdapterFactory for LiveAdapterFactory {
	async fn prepare(&self, target: &ConnectTarget) -> anyhow::Result<PreparedSession> {
		match target {
			ConnectTarget::Twitch(channel) => Ok(PreparedSession {
				identifier: channel.as_str().to_string(),
				adapter: Box::new(TwitchIrcAdapter::new(self.twitch_config(channel.clone()))),
			}),
			ConnectTarget::YouTube(target) => {
				let api_key = self
					.settings
					.youtube_api_key
					.clone()
					.unwrap_or_else(|| SecretString::new(String::new()));
				let client = Arc::new(YouTubeClient::new(api_key, self.settings.youtube_api_base_url.clone())?);
				let (video_id, live_chat_id) = client.resolve_target(target).await?;

				Ok(PreparedSession {
					identifier: video_id.clone(),
					adapter: Box::new(YouTubeChatPoller::new(client, video_id, live_chat_id, self.settings.poll)),
				})
			}
		}
	}
}

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// How long a disconnected adapter may take to stop before it is aborted.
	pub shutdown_grace: Duration,
	pub adapter_events_channel_capacity: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			shutdown_grace: Duration::from_secs(2),
			adapter_events_channel_capacity: 1024,
		}
	}
}

/// Owns at most one adapter per platform.
pub struct SessionManager {
	core: Arc<ChatCore>,
	factory: Arc<dyn AdapterFactory>,
	catalog: Arc<dyn EmoteCatalog>,
	badges: Arc<BadgeResolver>,
	ingest_tx: SessionEventTx,
	cfg: SessionConfig,
	/// One lifecycle lock per platform, held across connect/disconnect.
	twitch: Mutex<Option<AdapterHandle>>,
	youtube: Mutex<Option<AdapterHandle>>,
}

impl SessionManager {
	pub fn new(
		core: Arc<ChatCore>,
		factory: Arc<dyn AdapterFactory>,
		catalog: Arc<dyn EmoteCatalog>,
		badges: Arc<BadgeResolver>,
		ingest_tx: SessionEventTx,
		cfg: SessionConfig,
	) -> Self {
		Self {
			core,
			factory,
			catalog,
			badges,
			ingest_tx,
			cfg,
			twitch: Mutex::new(None),
			youtube: Mutex::new(None),
		}
	}

	fn slot(&self, platform: Platform) -> &Mutex<Option<AdapterHandle>> {
		match platform {
			Platform::Twitch => &self.twitch,
			Platform::YouTube => &self.youtube,
		}
	}

	/// Replace the platform's session with one attached to `target`.
	///
	/// The slot reads as connected only once setup has completed; on error it
	/// stays disconnected.
	pub async fn connect(&self, target: ConnectTarget) -> Result<PlatformStatus, SessionError> {
		let platform = target.platform();
		let mut slot = self.slot(platform).lock().await;
		self.stop_locked(&mut slot, platform).await;

		info!(%platform, target = ?target, "connecting");

		let emotes = match &target {
			ConnectTarget::Twitch(channel) => self.prepare_twitch_assets(channel).await?,
			ConnectTarget::YouTube(_) => EmoteSet::from(Vec::new()),
		};

		let prepared = self.factory.prepare(&target).await.map_err(|e| {
			warn!(%platform, error = %e, "connect failed");
			SessionError::Setup {
				platform,
				reason: format!("{e:#}"),
			}
		})?;

		let session_id = new_session_id();
		let channel = match &target {
			ConnectTarget::Twitch(channel) => Some(channel.clone()),
			ConnectTarget::YouTube(_) => None,
		};
		self.core.bind(
			platform,
			SessionBinding {
				session_id: session_id.clone(),
				identifier: prepared.identifier.clone(),
				channel,
				emotes,
			},
		);

		let (events_tx, events_rx) = mpsc::channel(self.cfg.adapter_events_channel_capacity);
		let handle = AdapterHandle::spawn(prepared.adapter, session_id.clone(), events_tx);
		spawn_session_forwarder(platform, session_id.clone(), events_rx, self.ingest_tx.clone());
		*slot = Some(handle);

		info!(%platform, identifier = %prepared.identifier, %session_id, "connected");
		Ok(PlatformStatus::connected(prepared.identifier))
	}

	/// Emote prefetch must succeed; the badge preload only warms a cache.
	async fn prepare_twitch_assets(&self, channel: &ChannelName) -> Result<EmoteSet, SessionError> {
		let (emotes, badges) = tokio::join!(
			self.catalog.fetch_all_emotes(channel),
			self.badges.preload_channel(channel.as_str())
		);

		if let Err(e) = badges {
			warn!(channel = %channel, error = %e, "channel badge preload failed; continuing");
		}

		emotes.map_err(|e| {
			warn!(channel = %channel, error = %e, "emote prefetch failed");
			SessionError::Setup {
				platform: Platform::Twitch,
				reason: format!("emote prefetch failed: {e:#}"),
			}
		})
	}

	/// Stop the platform's session. Always leaves the slot disconnected.
	pub async fn disconnect(&self, platform: Platform) {
		let mut slot = self.slot(platform).lock().await;
		self.stop_locked(&mut slot, platform).await;
	}

	async fn stop_locked(&self, slot: &mut Option<AdapterHandle>, platform: Platform) {
		// Unbind first so anything still in flight from the old session is dropped.
		let binding = self.core.unbind(platform);

		if let Some(mut handle) = slot.take() {
			handle.shutdown(self.cfg.shutdown_grace).await;
			info!(%platform, session_id = %handle.session_id, "disconnected");
		} else if binding.is_some() {
			debug!(%platform, "binding without adapter cleared");
		}
	}

	pub fn status(&self) -> StatusSnapshot {
		self.core.status()
	}

	/// Disconnect every platform.
	pub async fn shutdown(&self) {
		for platform in Platform::ALL {
			self.disconnect(platform).await;
		}
	}
}

fn spawn_session_forwarder(platform: Platform, session_id: String, mut events_rx: AdapterEventRx, ingest_tx: SessionEventTx) {
	tokio::spawn(async move {
		while let Some(event) = events_rx.recv().await {
			let ev = SessionEvent {
				platform,
				session_id: session_id.clone(),
				event,
			};
			if ingest_tx.send(ev).await.is_err() {
				debug!(%platform, %session_id, "ingest channel closed; forwarder exiting");
				return;
			}
		}
		debug!(%platform, %session_id, "adapter events channel closed; forwarder exiting");
	});
}
