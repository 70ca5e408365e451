#![forbid(unsafe_code)]

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chatmux_domain::StreamEvent;
use chatmux_util::endpoint::{EndpointError, HttpEndpoint};
use futures::StreamExt as _;
use tracing::{debug, info, trace, warn};

pub mod feed;
pub mod reconnect;
pub mod sse;

use crate::reconnect::{ConnectionState, ReconnectMachine};
use crate::sse::{SseDecoder, SseError, SseItem, parse_event};

/// Default server endpoint for the standalone client.
pub const DEFAULT_SERVER_ENDPOINT: &str = "http://127.0.0.1:18480";

pub const STREAM_PATH: &str = "/api/chat/stream";

/// Push-stream client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub endpoint: HttpEndpoint,

	/// Timeout for establishing the TCP connection.
	pub connect_timeout: Duration,

	/// An open stream with no bytes (keepalives included) for this long is
	/// treated as dead.
	pub idle_timeout: Duration,

	pub max_event_bytes: usize,
}

impl ClientConfig {
	/// Convenience: create a config from `http://host:port`.
	pub fn from_http_endpoint(endpoint: &str) -> Result<Self, StreamClientError> {
		let endpoint = HttpEndpoint::parse(endpoint)?;
		Ok(Self {
			endpoint,
			..Self::default()
		})
	}

	pub fn stream_url(&self) -> String {
		self.endpoint.url(STREAM_PATH)
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			endpoint: HttpEndpoint::loopback(18480),
			connect_timeout: Duration::from_secs(15),
			idle_timeout: Duration::from_secs(45),
			max_event_bytes: sse::DEFAULT_MAX_EVENT_BYTES,
		}
	}
}

/// Errors for push-stream client operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
	#[error(transparent)]
	Endpoint(#[from] EndpointError),

	#[error("failed to connect: {0}")]
	Connect(String),

	#[error("unexpected HTTP status {0}")]
	Status(u16),

	#[error(transparent)]
	Decode(#[from] SseError),

	#[error("stream idle for {0:?}")]
	Idle(Duration),

	#[error("transport error: {0}")]
	Transport(String),
}

/// Current unix time in milliseconds.
pub fn unix_ms_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or(0)
}

/// Push-stream consumer that reconnects with exponential backoff.
pub struct StreamClient {
	cfg: ClientConfig,
	http: reqwest::Client,
	machine: ReconnectMachine,
}

impl StreamClient {
	pub fn new(cfg: ClientConfig) -> Result<Self, StreamClientError> {
		let http = reqwest::Client::builder()
			.connect_timeout(cfg.connect_timeout)
			.build()
			.map_err(|e| StreamClientError::Connect(e.to_string()))?;
		Ok(Self {
			cfg,
			http,
			machine: ReconnectMachine::new(),
		})
	}

	pub fn state(&self) -> ConnectionState {
		self.machine.state()
	}

	/// Consume the stream until `shutdown` resolves, reconnecting whenever it
	/// fails or the server closes it.
	pub async fn run<F, S>(&mut self, mut on_event: F, shutdown: S)
	where
		F: FnMut(StreamEvent),
		S: Future<Output = ()>,
	{
		tokio::pin!(shutdown);

		loop {
			let started = self.machine.begin();
			debug_assert!(started, "attempt started while another is in flight");

			let outcome = tokio::select! {
				_ = &mut shutdown => None,
				res = self.connect_once(&mut on_event) => Some(res),
			};
			let Some(res) = outcome else {
				break;
			};

			match res {
				Ok(()) => info!("push stream closed by server"),
				Err(e) => warn!(error = %e, "push stream failed"),
			}

			let delay = self.machine.failed();
			if let ConnectionState::Backoff { attempt } = self.machine.state() {
				info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
			}

			tokio::select! {
				_ = &mut shutdown => break,
				_ = tokio::time::sleep(delay) => {}
			}
		}

		self.machine.stop();
		info!("push stream client stopped");
	}

	/// One connection: returns `Ok` when the server ends the stream.
	pub(crate) async fn connect_once<F>(&mut self, on_event: &mut F) -> Result<(), StreamClientError>
	where
		F: FnMut(StreamEvent),
	{
		let url = self.cfg.stream_url();
		debug!(%url, "connecting to push stream");

		let resp = self
			.http
			.get(&url)
			.header(reqwest::header::ACCEPT, "text/event-stream")
			.send()
			.await
			.map_err(|e| StreamClientError::Connect(e.to_string()))?;
		if !resp.status().is_success() {
			return Err(StreamClientError::Status(resp.status().as_u16()));
		}

		self.machine.opened();
		info!(%url, "push stream open");

		let mut decoder = SseDecoder::new(self.cfg.max_event_bytes);
		let mut body = resp.bytes_stream();
		loop {
			let chunk = match tokio::time::timeout(self.cfg.idle_timeout, body.next()).await {
				Err(_) => return Err(StreamClientError::Idle(self.cfg.idle_timeout)),
				Ok(None) => return Ok(()),
				Ok(Some(Err(e))) => return Err(StreamClientError::Transport(e.to_string())),
				Ok(Some(Ok(chunk))) => chunk,
			};

			for item in decoder.push(&chunk)? {
				match item {
					SseItem::Comment => trace!("keepalive"),
					SseItem::Data(data) => match parse_event(&data) {
						Ok(event) => {
							debug!(kind = event.kind(), "stream event");
							on_event(event);
						}
						Err(e) => warn!(error = %e, raw = %data, "rejected stream event"),
					},
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::net::SocketAddr;

	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	use super::*;

	/// Serve one canned HTTP response, then close.
	async fn one_shot_server(response: &'static str) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = [0u8; 1024];
			let _ = sock.read(&mut buf).await;
			sock.write_all(response.as_bytes()).await.unwrap();
			let _ = sock.shutdown().await;
		});
		addr
	}

	fn client_for(addr: SocketAddr) -> StreamClient {
		let cfg = ClientConfig::from_http_endpoint(&format!("http://{addr}")).unwrap();
		StreamClient::new(cfg).unwrap()
	}

	#[test]
	fn default_config_is_sane() {
		let cfg = ClientConfig::default();
		assert_eq!(cfg.stream_url(), format!("{DEFAULT_SERVER_ENDPOINT}{STREAM_PATH}"));
		assert!(cfg.idle_timeout > Duration::from_secs(15));
		assert!(ClientConfig::from_http_endpoint("quic://127.0.0.1:1").is_err());
	}

	#[tokio::test]
	async fn reads_events_until_server_closes() {
		let addr = one_shot_server(
			"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n\
			 data: {\"type\":\"connected\"}\n\n\
			 : keepalive\n\n\
			 data: {\"type\":\"mystery\"}\n\n\
			 data: {\"type\":\"initial\",\"messages\":[]}\n\n",
		)
		.await;

		let mut client = client_for(addr);
		let mut events = Vec::new();
		let res = client.connect_once(&mut |ev| events.push(ev)).await;

		assert!(res.is_ok(), "got {res:?}");
		assert_eq!(
			events,
			vec![StreamEvent::Connected, StreamEvent::Initial { messages: Vec::new() }]
		);
		assert_eq!(client.state(), ConnectionState::Open);
	}

	#[tokio::test]
	async fn error_status_is_reported() {
		let addr = one_shot_server("HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n").await;

		let mut client = client_for(addr);
		let res = client.connect_once(&mut |_| {}).await;
		assert!(matches!(res, Err(StreamClientError::Status(503))), "got {res:?}");
	}

	#[tokio::test]
	async fn run_stops_on_shutdown() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let mut client = client_for(addr);
		let (tx, rx) = tokio::sync::oneshot::channel::<()>();
		let task = tokio::spawn(async move {
			client
				.run(|_| {}, async {
					let _ = rx.await;
				})
				.await;
			client.state()
		});

		tokio::time::sleep(Duration::from_millis(50)).await;
		tx.send(()).unwrap();
		let state = tokio::time::timeout(Duration::from_secs(2), task)
			.await
			.expect("run returns after shutdown")
			.unwrap();
		assert_eq!(state, ConnectionState::Idle);
	}
}
