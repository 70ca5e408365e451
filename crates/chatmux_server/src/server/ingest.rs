#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chatmux_domain::{ChannelName, ChatMessage, Platform, PlatformStatus, StatusSnapshot};
use chatmux_platform::assets::EmoteSet;
use chatmux_platform::{AdapterEvent, IncomingMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::fanout::{FanoutHub, ListenerFn, ListenerToken};
use crate::server::rewriter::rewrite;
use crate::server::store::{MessageDraft, MessageStore, StoreLimits};
use crate::util::time::unix_ms_now;

/// An adapter event tagged with the session that produced it.
#[derive(Debug)]
pub struct SessionEvent {
	pub platform: Platform,
	pub session_id: String,
	pub event: AdapterEvent,
}

pub type SessionEventTx = mpsc::Sender<SessionEvent>;
pub type SessionEventRx = mpsc::Receiver<SessionEvent>;

/// The live session currently bound to a platform slot.
#[derive(Debug, Clone)]
pub struct SessionBinding {
	pub session_id: String,
	/// Channel name (Twitch) or video id (YouTube).
	pub identifier: String,
	/// Recorded on every message ingested under this session.
	pub channel: Option<ChannelName>,
	/// Third-party emotes matched against this session's messages.
	pub emotes: EmoteSet,
}

/// Message store, fan-out hub and session bindings shared by the ingest task
/// and the request handlers.
pub struct ChatCore {
	store: Mutex<MessageStore>,
	hub: FanoutHub,
	bindings: Mutex<HashMap<Platform, SessionBinding>>,
}

impl ChatCore {
	pub fn new(limits: StoreLimits, hub: FanoutHub) -> Self {
		Self {
			store: Mutex::new(MessageStore::new(limits)),
			hub,
			bindings: Mutex::new(HashMap::new()),
		}
	}

	pub fn hub(&self) -> &FanoutHub {
		&self.hub
	}

	pub fn bind(&self, platform: Platform, binding: SessionBinding) {
		metrics::gauge!("chatmux_session_connected", "platform" => platform.as_str()).set(1.0);
		self.bindings.lock().insert(platform, binding);
	}

	/// Returns the binding that was removed, if any.
	pub fn unbind(&self, platform: Platform) -> Option<SessionBinding> {
		metrics::gauge!("chatmux_session_connected", "platform" => platform.as_str()).set(0.0);
		self.bindings.lock().remove(&platform)
	}

	pub fn binding(&self, platform: Platform) -> Option<SessionBinding> {
		self.bindings.lock().get(&platform).cloned()
	}

	pub fn status(&self) -> StatusSnapshot {
		let bindings = self.bindings.lock();
		let mut snapshot = StatusSnapshot::default();
		for platform in Platform::ALL {
			if let Some(b) = bindings.get(&platform) {
				*snapshot.get_mut(platform) = PlatformStatus::connected(b.identifier.clone());
			}
		}
		snapshot
	}

	/// Rewrite, store and fan out one message.
	///
	/// Uses the emote set and channel of the platform's current binding.
	pub fn ingest(&self, msg: IncomingMessage) -> Arc<ChatMessage> {
		let binding = self.binding(msg.platform);
		self.ingest_with(msg, binding.as_ref())
	}

	fn ingest_with(&self, msg: IncomingMessage, binding: Option<&SessionBinding>) -> Arc<ChatMessage> {
		let (emotes, channel) = match binding {
			Some(b) => (&b.emotes[..], b.channel.as_ref().map(|c| c.as_str().to_string())),
			None => (&[][..], None),
		};

		let rendered_text = rewrite(&msg.text, emotes, &msg.native_emotes);
		let draft = MessageDraft {
			platform: msg.platform,
			username: msg.username,
			raw_text: msg.text,
			rendered_text,
			badges: msg.badges,
			color: msg.color,
			channel: channel.or(msg.channel),
		};

		let message = Arc::new(self.store.lock().append(draft, unix_ms_now()));
		metrics::counter!("chatmux_messages_ingested_total", "platform" => message.platform.as_str()).increment(1);

		self.hub.notify(&message);
		message
	}

	/// Non-expired messages, oldest first.
	pub fn messages(&self) -> Vec<ChatMessage> {
		self.store.lock().read(unix_ms_now())
	}

	pub fn clear(&self) {
		self.store.lock().clear();
		info!("message store cleared");
	}

	pub fn subscribe_new_message(&self, listener: ListenerFn) -> ListenerToken {
		self.hub.subscribe(listener)
	}

	pub fn unsubscribe(&self, token: ListenerToken) -> bool {
		self.hub.unsubscribe(token)
	}

	fn handle(&self, ev: SessionEvent) {
		let SessionEvent {
			platform,
			session_id,
			event,
		} = ev;

		match event {
			AdapterEvent::Message(msg) => match self.binding(platform) {
				Some(binding) if binding.session_id == session_id => {
					self.ingest_with(*msg, Some(&binding));
				}
				_ => {
					debug!(%platform, %session_id, "dropping message from stale session");
					metrics::counter!("chatmux_stale_events_total", "platform" => platform.as_str()).increment(1);
				}
			},
			AdapterEvent::Status(st) => {
				metrics::counter!("chatmux_adapter_status_total", "platform" => platform.as_str()).increment(1);
				if let Some(err) = &st.last_error {
					warn!(%platform, %session_id, detail = %st.detail, error = %err, "adapter status");
				} else {
					debug!(%platform, %session_id, connected = st.connected, detail = %st.detail, "adapter status");
				}
			}
		}
	}
}

/// Spawn the single task that applies adapter events to `core` in order.
pub fn spawn_ingest_task(core: Arc<ChatCore>, mut rx: SessionEventRx) -> JoinHandle<()> {
	tokio::spawn(async move {
		info!("ingest task started");
		while let Some(ev) = rx.recv().await {
			core.handle(ev);
		}
		info!("ingest task exiting (all senders closed)");
	})
}
