#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chatmux_domain::Platform;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::client::{LiveChatPage, LiveChatSource};
use super::emoji::replace_shortcodes;
use crate::color::color_from_username;
use crate::task::RepeatingTask;
use crate::{
	AdapterControl, AdapterControlRx, AdapterEventTx, IncomingMessage, PlatformAdapter, emit_message, status,
};

/// Poll cadence.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
	/// Used when the page does not carry `pollingIntervalMillis`.
	pub default_interval: Duration,
	pub error_retry: Duration,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self {
			default_interval: Duration::from_millis(5000),
			error_retry: Duration::from_millis(5000),
		}
	}
}

/// YouTube live chat poller for one resolved live chat.
pub struct YouTubeChatPoller {
	source: Arc<dyn LiveChatSource>,
	video_id: String,
	live_chat_id: String,
	cfg: PollConfig,
}

struct PollState {
	source: Arc<dyn LiveChatSource>,
	live_chat_id: String,
	page_token: Mutex<Option<String>>,
	events_tx: AdapterEventTx,
	cfg: PollConfig,
}

impl PollState {
	fn deliver(&self, page: LiveChatPage) {
		for item in page.items {
			let color = color_from_username(&item.author);
			let text = replace_shortcodes(&item.text).into_owned();
			let mut msg = IncomingMessage::new(Platform::YouTube, item.author, text);
			msg.color = Some(color);
			emit_message(&self.events_tx, msg);
		}

		if let Some(token) = page.next_page_token {
			*self.page_token.lock() = Some(token);
		}
	}

	/// One poll; returns the delay before the next one.
	async fn cycle(&self) -> Option<Duration> {
		if self.events_tx.is_closed() {
			return None;
		}

		let token = self.page_token.lock().clone();
		match self.source.list_messages(&self.live_chat_id, token.as_deref()).await {
			Ok(page) => {
				let next = page.polling_interval.unwrap_or(self.cfg.default_interval);
				debug!(items = page.items.len(), next_ms = next.as_millis() as u64, "youtube poll");
				self.deliver(page);
				Some(next)
			}
			Err(e) => {
				warn!(error = %e, live_chat_id = %self.live_chat_id, "youtube poll failed; retrying");
				Some(self.cfg.error_retry)
			}
		}
	}
}

impl YouTubeChatPoller {
	pub fn new(source: Arc<dyn LiveChatSource>, video_id: String, live_chat_id: String, cfg: PollConfig) -> Self {
		Self {
			source,
			video_id,
			live_chat_id,
			cfg,
		}
	}

	pub fn video_id(&self) -> &str {
		&self.video_id
	}
}

#[async_trait::async_trait]
impl PlatformAdapter for YouTubeChatPoller {
	fn platform(&self) -> Platform {
		Platform::YouTube
	}

	async fn run(self: Box<Self>, mut control_rx: AdapterControlRx, events_tx: AdapterEventTx) -> anyhow::Result<()> {
		let platform = Platform::YouTube;
		info!(%platform, video_id = %self.video_id, live_chat_id = %self.live_chat_id, "youtube poller starting");
		let _ = events_tx.try_send(status(platform, true, format!("polling video {}", self.video_id)));

		let state = Arc::new(PollState {
			source: self.source.clone(),
			live_chat_id: self.live_chat_id.clone(),
			page_token: Mutex::new(None),
			events_tx: events_tx.clone(),
			cfg: self.cfg,
		});

		let mut task = RepeatingTask::spawn("youtube-poll", Duration::ZERO, move || {
			let state = state.clone();
			async move { state.cycle().await }
		});

		while let Some(cmd) = control_rx.recv().await {
			match cmd {
				AdapterControl::Shutdown => break,
			}
		}

		task.cancel();
		info!(%platform, video_id = %self.video_id, "youtube poller stopped");
		let _ = events_tx.try_send(status(platform, false, "youtube poller stopped"));
		Ok(())
	}
}
