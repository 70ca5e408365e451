#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chatmux_domain::ChatMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Callback invoked for every new message.
pub type ListenerFn = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// Opaque handle returned by [`FanoutHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerToken(u64);

/// Identifies one registered transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

/// Configuration for `FanoutHub`.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
	/// Maximum number of queued messages per connection.
	pub connection_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for FanoutConfig {
	fn default() -> Self {
		Self {
			connection_queue_capacity: 256,
			debug_logs: false,
		}
	}
}

/// Pushes each new message to every registered connection and listener.
#[derive(Clone)]
pub struct FanoutHub {
	inner: Arc<Mutex<Inner>>,
	cfg: FanoutConfig,
}

#[derive(Default)]
struct Inner {
	next_id: u64,
	connections: Vec<(ConnectionId, mpsc::Sender<Arc<ChatMessage>>)>,
	listeners: BTreeMap<ListenerToken, ListenerFn>,
}

impl Inner {
	fn next_id(&mut self) -> u64 {
		self.next_id += 1;
		self.next_id
	}
}

impl FanoutHub {
	pub fn new(cfg: FanoutConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a transport connection with its own bounded queue.
	pub fn register_connection(&self) -> (ConnectionId, mpsc::Receiver<Arc<ChatMessage>>) {
		let (tx, rx) = mpsc::channel(self.cfg.connection_queue_capacity);

		let mut inner = self.inner.lock();
		let id = ConnectionId(inner.next_id());
		inner.connections.push((id, tx));
		metrics::gauge!("chatmux_stream_connections").set(inner.connections.len() as f64);

		if self.cfg.debug_logs {
			debug!(connection = id.0, total = inner.connections.len(), "fanout: connection registered");
		}

		(id, rx)
	}

	/// Remove a connection; unknown ids are ignored.
	pub fn remove_connection(&self, id: ConnectionId) {
		let mut inner = self.inner.lock();
		inner.connections.retain(|(cid, _)| *cid != id);
		metrics::gauge!("chatmux_stream_connections").set(inner.connections.len() as f64);
	}

	pub fn subscribe(&self, listener: ListenerFn) -> ListenerToken {
		let mut inner = self.inner.lock();
		let token = ListenerToken(inner.next_id());
		inner.listeners.insert(token, listener);
		token
	}

	/// Returns whether the token was still registered.
	pub fn unsubscribe(&self, token: ListenerToken) -> bool {
		self.inner.lock().listeners.remove(&token).is_some()
	}

	/// Deliver `message` to every connection, then every listener.
	///
	/// A connection whose queue is full or closed is removed. Listeners run
	/// outside the registry lock and may subscribe or unsubscribe.
	pub fn notify(&self, message: &Arc<ChatMessage>) {
		let listeners: Vec<(ListenerToken, ListenerFn)> = {
			let mut inner = self.inner.lock();
			let before = inner.connections.len();

			inner.connections.retain(|(id, tx)| match tx.try_send(message.clone()) {
				Ok(()) => true,
				Err(mpsc::error::TrySendError::Full(_)) => {
					debug!(connection = id.0, "fanout: connection queue full; dropping connection");
					metrics::counter!("chatmux_stream_dropped_connections_total").increment(1);
					false
				}
				Err(mpsc::error::TrySendError::Closed(_)) => false,
			});

			if inner.connections.len() != before {
				metrics::gauge!("chatmux_stream_connections").set(inner.connections.len() as f64);
			}

			inner.listeners.iter().map(|(t, l)| (*t, l.clone())).collect()
		};

		for (token, listener) in listeners {
			// Skip listeners removed by an earlier callback in this round.
			if !self.inner.lock().listeners.contains_key(&token) {
				continue;
			}
			listener(message);
		}
	}

	pub fn connection_count(&self) -> usize {
		self.inner.lock().connections.iter().filter(|(_, tx)| !tx.is_closed()).count()
	}

	pub fn listener_count(&self) -> usize {
		self.inner.lock().listeners.len()
	}
}
