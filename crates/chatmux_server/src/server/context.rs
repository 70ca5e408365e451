#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chatmux_domain::{ChatMessage, Platform, PlatformStatus, StatusSnapshot};
use chatmux_platform::assets::{
	BadgeResolver, EmoteCatalog, HttpEmoteCatalog, PRUNE_INTERVAL, PrunableCache, spawn_cache_pruner,
};
use chatmux_platform::task::RepeatingTask;
use chatmux_platform::twitch::{HelixClient, TwitchAppCredentials};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::server::fanout::{FanoutConfig, FanoutHub, ListenerFn, ListenerToken};
use crate::server::health::HealthState;
use crate::server::ingest::{ChatCore, spawn_ingest_task};
use crate::server::session::{
	AdapterFactory, ConnectTarget, LiveAdapterFactory, LiveAdapterSettings, SessionConfig, SessionError, SessionManager,
};
use crate::server::store::StoreLimits;

/// Capacity of the channel feeding the ingest task.
const INGEST_CHANNEL_CAPACITY: usize = 4096;

/// Pieces an `AppContext` is assembled from; tests swap in fakes.
pub struct ContextParts {
	pub factory: Arc<dyn AdapterFactory>,
	pub catalog: Arc<dyn EmoteCatalog>,
	pub badges: Arc<BadgeResolver>,
	pub store_limits: StoreLimits,
	pub fanout: FanoutConfig,
	pub session: SessionConfig,
	pub heartbeat: Duration,
}

/// Everything request handlers need, built once per process.
pub struct AppContext {
	core: Arc<ChatCore>,
	sessions: SessionManager,
	catalog: Arc<dyn EmoteCatalog>,
	badges: Arc<BadgeResolver>,
	health: HealthState,
	heartbeat: Duration,
	ingest_task: JoinHandle<()>,
	pruner: Mutex<Option<RepeatingTask>>,
}

impl AppContext {
	/// Assemble a context; must be called inside a tokio runtime.
	pub fn new(parts: ContextParts) -> Self {
		let core = Arc::new(ChatCore::new(parts.store_limits, FanoutHub::new(parts.fanout)));
		let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_CHANNEL_CAPACITY);
		let ingest_task = spawn_ingest_task(core.clone(), ingest_rx);

		let sessions = SessionManager::new(
			core.clone(),
			parts.factory,
			parts.catalog.clone(),
			parts.badges.clone(),
			ingest_tx,
			parts.session,
		);

		Self {
			core,
			sessions,
			catalog: parts.catalog,
			badges: parts.badges,
			health: HealthState::new(),
			heartbeat: parts.heartbeat,
			ingest_task,
			pruner: Mutex::new(None),
		}
	}

	/// Build the live context from configuration.
	pub fn from_config(cfg: &ServerConfig) -> anyhow::Result<Self> {
		let catalog = Arc::new(HttpEmoteCatalog::new(cfg.twitch.emote_api_base_url.clone())?);

		let helix = match (&cfg.twitch.client_id, &cfg.twitch.client_secret) {
			(Some(client_id), Some(client_secret)) => Some(HelixClient::new(TwitchAppCredentials {
				client_id: client_id.clone(),
				client_secret: client_secret.clone(),
			})?),
			_ => {
				warn!("twitch app credentials not configured; badges use the static table");
				None
			}
		};
		let badges = Arc::new(BadgeResolver::new(helix));

		let factory = Arc::new(LiveAdapterFactory::new(LiveAdapterSettings {
			irc_ws_url: cfg.twitch.irc_ws_url.clone(),
			reconnect_min_delay: cfg.twitch.reconnect_min_delay,
			reconnect_max_delay: cfg.twitch.reconnect_max_delay,
			youtube_api_key: cfg.youtube.api_key.clone(),
			youtube_api_base_url: cfg.youtube.api_base_url.clone(),
			poll: cfg.youtube.poll_config(),
		}));

		let ctx = Self::new(ContextParts {
			factory,
			catalog: catalog.clone(),
			badges: badges.clone(),
			store_limits: cfg.store.limits(),
			fanout: FanoutConfig::default(),
			session: SessionConfig::default(),
			heartbeat: cfg.server.heartbeat,
		});

		let caches: Vec<Arc<dyn PrunableCache>> = vec![catalog as Arc<dyn PrunableCache>, badges as Arc<dyn PrunableCache>];
		*ctx.pruner.lock() = Some(spawn_cache_pruner(caches, PRUNE_INTERVAL));
		info!(prune_every_secs = PRUNE_INTERVAL.as_secs(), "asset cache pruner started");

		Ok(ctx)
	}

	pub fn core(&self) -> &Arc<ChatCore> {
		&self.core
	}

	pub fn catalog(&self) -> &Arc<dyn EmoteCatalog> {
		&self.catalog
	}

	pub fn badges(&self) -> &Arc<BadgeResolver> {
		&self.badges
	}

	pub fn health(&self) -> &HealthState {
		&self.health
	}

	pub fn heartbeat(&self) -> Duration {
		self.heartbeat
	}

	pub async fn connect(&self, target: ConnectTarget) -> Result<PlatformStatus, SessionError> {
		self.sessions.connect(target).await
	}

	pub async fn disconnect(&self, platform: Platform) {
		self.sessions.disconnect(platform).await
	}

	pub fn status(&self) -> StatusSnapshot {
		self.sessions.status()
	}

	pub fn messages(&self) -> Vec<ChatMessage> {
		self.core.messages()
	}

	pub fn subscribe_new_message(&self, listener: ListenerFn) -> ListenerToken {
		self.core.subscribe_new_message(listener)
	}

	pub fn unsubscribe(&self, token: ListenerToken) -> bool {
		self.core.unsubscribe(token)
	}

	pub fn clear_all(&self) {
		self.core.clear()
	}

	/// Stop every session and background task.
	pub async fn shutdown(&self) {
		self.health.mark_not_ready();
		self.sessions.shutdown().await;
		if let Some(mut pruner) = self.pruner.lock().take() {
			pruner.cancel();
		}
		info!("application context shut down");
	}
}

impl Drop for AppContext {
	fn drop(&mut self) {
		self.ingest_task.abort();
	}
}
