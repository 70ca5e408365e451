#![forbid(unsafe_code)]

pub mod assets;
pub mod color;
pub mod task;
pub mod twitch;
pub mod youtube;

use std::fmt;
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use chatmux_domain::{Badge, NativeEmote, Platform};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server → adapter control message.
#[derive(Debug)]
pub enum AdapterControl {
	/// Request a graceful shutdown.
	Shutdown,
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Adapter → server event message.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
	/// A chat message observed on the platform.
	Message(Box<IncomingMessage>),

	/// Adapter status update.
	Status(AdapterStatus),
}

/// Platform message as emitted by an adapter, before rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
	pub platform: Platform,

	/// Channel the message was observed in, when the platform has one.
	pub channel: Option<String>,

	pub username: String,

	pub text: String,

	pub badges: Vec<Badge>,

	/// `#RRGGBB` when the platform supplied a valid one.
	pub color: Option<String>,

	pub native_emotes: Vec<NativeEmote>,

	/// Adapter receipt timestamp (not for ordering).
	pub received_at: SystemTime,
}

impl IncomingMessage {
	pub fn new(platform: Platform, username: impl Into<String>, text: impl Into<String>) -> Self {
		Self {
			platform,
			channel: None,
			username: username.into(),
			text: text.into(),
			badges: Vec::new(),
			color: None,
			native_emotes: Vec::new(),
			received_at: SystemTime::now(),
		}
	}
}

/// Adapter status event.
#[derive(Debug, Clone)]
pub struct AdapterStatus {
	pub platform: Platform,
	pub connected: bool,
	pub detail: String,
	pub last_error: Option<String>,
	pub time: SystemTime,
}

/// Helper types for wiring adapters.
pub type AdapterControlTx = mpsc::Sender<AdapterControl>;
pub type AdapterControlRx = mpsc::Receiver<AdapterControl>;
pub type AdapterEventTx = mpsc::Sender<AdapterEvent>;
pub type AdapterEventRx = mpsc::Receiver<AdapterEvent>;

/// Trait representing a runnable adapter.
#[async_trait::async_trait]
pub trait PlatformAdapter: Send + Sync + 'static {
	/// Which platform this adapter implements.
	fn platform(&self) -> Platform;

	/// Run the adapter until shutdown or fatal error.
	async fn run(self: Box<Self>, control_rx: AdapterControlRx, events_tx: AdapterEventTx) -> anyhow::Result<()>;
}

/// A spawned adapter task plus its control channel.
///
/// Dropping the handle aborts the task.
#[derive(Debug)]
pub struct AdapterHandle {
	pub platform: Platform,
	pub session_id: String,
	control_tx: Option<AdapterControlTx>,
	task: Option<JoinHandle<()>>,
}

impl AdapterHandle {
	/// Spawn `adapter` on the runtime, sending its events to `events_tx`.
	pub fn spawn(adapter: Box<dyn PlatformAdapter>, session_id: String, events_tx: AdapterEventTx) -> Self {
		let platform = adapter.platform();
		let (control_tx, control_rx) = mpsc::channel(8);
		let sid = session_id.clone();

		let task = tokio::spawn(async move {
			match adapter.run(control_rx, events_tx.clone()).await {
				Ok(()) => debug!(%platform, session_id = %sid, "adapter exited"),
				Err(e) => {
					warn!(%platform, session_id = %sid, error = %e, "adapter failed");
					let _ = events_tx.try_send(status_error(platform, "adapter failed", e));
				}
			}
		});

		Self {
			platform,
			session_id,
			control_tx: Some(control_tx),
			task: Some(task),
		}
	}

	pub fn is_running(&self) -> bool {
		self.task.as_ref().is_some_and(|t| !t.is_finished())
	}

	/// Ask the adapter to stop, waiting at most `grace` before aborting it.
	///
	/// Calling this more than once is a no-op.
	pub async fn shutdown(&mut self, grace: Duration) {
		if let Some(tx) = self.control_tx.take() {
			let _ = tx.try_send(AdapterControl::Shutdown);
		}

		let Some(mut task) = self.task.take() else {
			return;
		};

		if tokio::time::timeout(grace, &mut task).await.is_err() {
			info!(platform = %self.platform, session_id = %self.session_id, "adapter did not stop in time; aborting");
			task.abort();
		}
	}
}

impl Drop for AdapterHandle {
	fn drop(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

/// Build a status event.
pub fn status(platform: Platform, connected: bool, detail: impl Into<String>) -> AdapterEvent {
	AdapterEvent::Status(AdapterStatus {
		platform,
		connected,
		detail: detail.into(),
		last_error: None,
		time: SystemTime::now(),
	})
}

/// Build a fatal-error status event.
pub fn status_error(platform: Platform, detail: impl Into<String>, err: impl fmt::Display) -> AdapterEvent {
	AdapterEvent::Status(AdapterStatus {
		platform,
		connected: false,
		detail: detail.into(),
		last_error: Some(err.to_string()),
		time: SystemTime::now(),
	})
}

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

/// Validate basic message invariants.
pub fn validate_incoming(msg: &IncomingMessage) -> anyhow::Result<()> {
	if msg.username.trim().is_empty() {
		return Err(anyhow!("message username must be non-empty"));
	}
	if msg.text.is_empty() {
		return Err(anyhow!("message text must be non-empty"));
	}
	if let Some(color) = &msg.color {
		let ok = match msg.platform {
			Platform::Twitch => color::is_hex_color(color),
			Platform::YouTube => color::is_hsl_color(color),
		};
		if !ok {
			return Err(anyhow!("unexpected {} message color: {color}", msg.platform));
		}
	}
	Ok(())
}

/// Emit a message event without blocking; returns `false` when it was dropped.
pub fn emit_message(events_tx: &AdapterEventTx, msg: IncomingMessage) -> bool {
	if let Err(e) = validate_incoming(&msg) {
		debug!(platform = %msg.platform, error = %e, "dropping invalid message");
		return false;
	}

	let platform = msg.platform;
	match events_tx.try_send(AdapterEvent::Message(Box::new(msg))) {
		Ok(()) => true,
		Err(_) => {
			metrics::counter!("chatmux_adapter_dropped_total", "platform" => platform.as_str()).increment(1);
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct IdleAdapter;

	#[async_trait::async_trait]
	impl PlatformAdapter for IdleAdapter {
		fn platform(&self) -> Platform {
			Platform::Twitch
		}

		async fn run(self: Box<Self>, mut control_rx: AdapterControlRx, events_tx: AdapterEventTx) -> anyhow::Result<()> {
			let _ = events_tx.try_send(status(Platform::Twitch, true, "idle"));
			while let Some(cmd) = control_rx.recv().await {
				match cmd {
					AdapterControl::Shutdown => break,
				}
			}
			let _ = events_tx.try_send(status(Platform::Twitch, false, "idle stopped"));
			Ok(())
		}
	}

	struct StubbornAdapter;

	#[async_trait::async_trait]
	impl PlatformAdapter for StubbornAdapter {
		fn platform(&self) -> Platform {
			Platform::YouTube
		}

		async fn run(self: Box<Self>, _control_rx: AdapterControlRx, _events_tx: AdapterEventTx) -> anyhow::Result<()> {
			std::future::pending::<()>().await;
			Ok(())
		}
	}

	#[test]
	fn secret_string_is_redacted() {
		let s = SecretString::new("hunter2");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.to_string(), "<redacted>");
		assert_eq!(s.expose(), "hunter2");
	}

	#[test]
	fn validate_rejects_empty_fields_and_bad_colors() {
		let ok = IncomingMessage::new(Platform::Twitch, "alice", "hi");
		assert!(validate_incoming(&ok).is_ok());

		let mut bad = ok.clone();
		bad.username = "  ".to_string();
		assert!(validate_incoming(&bad).is_err());

		let mut bad = ok.clone();
		bad.text.clear();
		assert!(validate_incoming(&bad).is_err());

		let mut bad = ok.clone();
		bad.color = Some("red".to_string());
		assert!(validate_incoming(&bad).is_err());

		let mut bad = ok;
		bad.color = Some("hsl(157, 82%, 61%)".to_string());
		assert!(validate_incoming(&bad).is_err());
	}

	#[test]
	fn youtube_messages_with_hashed_colors_are_emitted() {
		let (tx, mut rx) = mpsc::channel(4);
		let mut msg = IncomingMessage::new(Platform::YouTube, "Viewer", "hello");
		msg.color = Some(color::color_from_username("Viewer"));
		assert!(emit_message(&tx, msg));
		assert!(
			matches!(rx.try_recv(), Ok(AdapterEvent::Message(m)) if m.color.as_deref().is_some_and(|c| c.starts_with("hsl(")))
		);

		let mut twitch = IncomingMessage::new(Platform::Twitch, "alice", "hi");
		twitch.color = Some("#1E90FF".to_string());
		assert!(emit_message(&tx, twitch));
	}

	#[test]
	fn emit_message_drops_when_full() {
		let (tx, mut rx) = mpsc::channel(1);
		assert!(emit_message(&tx, IncomingMessage::new(Platform::YouTube, "a", "one")));
		assert!(!emit_message(&tx, IncomingMessage::new(Platform::YouTube, "a", "two")));
		assert!(matches!(rx.try_recv(), Ok(AdapterEvent::Message(m)) if m.text == "one"));
	}

	#[tokio::test]
	async fn handle_shutdown_is_graceful_and_idempotent() {
		let (tx, mut rx) = mpsc::channel(8);
		let mut handle = AdapterHandle::spawn(Box::new(IdleAdapter), new_session_id(), tx);

		assert!(matches!(rx.recv().await, Some(AdapterEvent::Status(s)) if s.connected));
		assert!(handle.is_running());

		handle.shutdown(Duration::from_secs(1)).await;
		assert!(!handle.is_running());
		assert!(matches!(rx.recv().await, Some(AdapterEvent::Status(s)) if !s.connected));

		handle.shutdown(Duration::from_secs(1)).await;
	}

	#[tokio::test(start_paused = true)]
	async fn handle_shutdown_aborts_unresponsive_adapters() {
		let (tx, _rx) = mpsc::channel(8);
		let mut handle = AdapterHandle::spawn(Box::new(StubbornAdapter), new_session_id(), tx);
		handle.shutdown(Duration::from_millis(50)).await;
		assert!(!handle.is_running());
	}
}
