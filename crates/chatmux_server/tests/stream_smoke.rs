#![forbid(unsafe_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chatmux_client_core::feed::{FeedView, render_line};
use chatmux_client_core::{ClientConfig, StreamClient, unix_ms_now};
use chatmux_domain::{ChannelName, Emote, Platform, StreamEvent};
use chatmux_platform::assets::{BadgeResolver, EmoteCatalog, EmoteSet};
use chatmux_platform::{
	AdapterControl, AdapterControlRx, AdapterEventTx, IncomingMessage, PlatformAdapter, emit_message, status,
};
use chatmux_server::server::context::{AppContext, ContextParts};
use chatmux_server::server::fanout::FanoutConfig;
use chatmux_server::server::http::spawn_http_server;
use chatmux_server::server::session::{AdapterFactory, ConnectTarget, PreparedSession, SessionConfig};
use chatmux_server::server::store::StoreLimits;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("CHATMUX_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

struct FeedAdapter {
	platform: Platform,
	feed: mpsc::Receiver<String>,
}

#[async_trait::async_trait]
impl PlatformAdapter for FeedAdapter {
	fn platform(&self) -> Platform {
		self.platform
	}

	async fn run(self: Box<Self>, mut control_rx: AdapterControlRx, events_tx: AdapterEventTx) -> anyhow::Result<()> {
		let FeedAdapter { platform, mut feed } = *self;
		let _ = events_tx.try_send(status(platform, true, "feed ready"));
		loop {
			tokio::select! {
				cmd = control_rx.recv() => match cmd {
					Some(AdapterControl::Shutdown) | None => break,
				},
				text = feed.recv() => {
					let Some(text) = text else { break };
					emit_message(&events_tx, IncomingMessage::new(platform, "viewer", text));
				}
			}
		}
		Ok(())
	}
}

#[derive(Default)]
struct FeedFactory {
	feeds: Mutex<Vec<mpsc::Sender<String>>>,
}

#[async_trait::async_trait]
impl AdapterFactory for FeedFactory {
	async fn prepare(&self, target: &ConnectTarget) -> anyhow::Result<PreparedSession> {
		let (tx, rx) = mpsc::channel(16);
		self.feeds.lock().push(tx);
		let identifier = match target {
			ConnectTarget::Twitch(channel) => channel.as_str().to_string(),
			ConnectTarget::YouTube(t) => t.as_str().to_string(),
		};
		Ok(PreparedSession {
			identifier,
			adapter: Box::new(FeedAdapter {
				platform: target.platform(),
				feed: rx,
			}),
		})
	}
}

struct StaticCatalog;

#[async_trait::async_trait]
impl EmoteCatalog for StaticCatalog {
	async fn fetch_all_emotes(&self, _channel: &ChannelName) -> anyhow::Result<EmoteSet> {
		Ok(Arc::from(vec![
			Emote::new("catJAM", "https://cdn.example/catJAM"),
			Emote::new("SoSnowy", "https://cdn.example/SoSnowy").zero_width(),
		]))
	}

	async fn fetch_global_emotes(&self) -> anyhow::Result<EmoteSet> {
		Ok(Arc::from(Vec::new()))
	}
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
	timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("event within timeout")
		.expect("client running")
}

#[tokio::test]
async fn push_stream_end_to_end() {
	init_test_logging();

	let factory = Arc::new(FeedFactory::default());
	let ctx = Arc::new(AppContext::new(ContextParts {
		factory: factory.clone(),
		catalog: Arc::new(StaticCatalog),
		badges: Arc::new(BadgeResolver::new(None)),
		store_limits: StoreLimits::default(),
		fanout: FanoutConfig::default(),
		session: SessionConfig::default(),
		heartbeat: Duration::from_secs(15),
	}));
	ctx.core()
		.ingest(IncomingMessage::new(Platform::YouTube, "Early", "already here"));

	let (addr, _server) = spawn_http_server("127.0.0.1:0".parse().unwrap(), ctx.clone())
		.await
		.expect("bind api");

	let (events_tx, mut events_rx) = mpsc::unbounded_channel();
	let (stop_tx, stop_rx) = oneshot::channel::<()>();
	let mut client = StreamClient::new(ClientConfig::from_http_endpoint(&format!("http://{addr}")).unwrap()).unwrap();
	let client_task = tokio::spawn(async move {
		client
			.run(
				move |ev| {
					let _ = events_tx.send(ev);
				},
				async {
					let _ = stop_rx.await;
				},
			)
			.await;
	});

	let mut feed = FeedView::new(Some(Duration::from_secs(60)));

	assert_eq!(next_event(&mut events_rx).await, StreamEvent::Connected);
	let initial = next_event(&mut events_rx).await;
	match &initial {
		StreamEvent::Initial { messages } => {
			assert_eq!(messages.len(), 1);
			assert_eq!(messages[0].raw_text, "already here");
		}
		other => panic!("expected initial, got {other:?}"),
	}
	feed.apply(initial, unix_ms_now());

	ctx.connect(ConnectTarget::Twitch(ChannelName::new("#SomeChannel").unwrap()))
		.await
		.expect("connect twitch");
	assert_eq!(ctx.status().twitch.identifier.as_deref(), Some("somechannel"));

	let feed_tx = factory.feeds.lock()[0].clone();
	feed_tx.send("hi catJAM SoSnowy".to_string()).await.unwrap();

	let live = next_event(&mut events_rx).await;
	let StreamEvent::NewMessage { message } = &live else {
		panic!("expected new-message, got {live:?}");
	};
	assert_eq!(message.platform, Platform::Twitch);
	assert_eq!(message.channel.as_deref(), Some("somechannel"));
	assert_eq!(message.raw_text, "hi catJAM SoSnowy");

	let line = feed.apply(live, unix_ms_now()).map(render_line);
	assert_eq!(line.as_deref(), Some("[twitch] viewer: hi [catJAM+SoSnowy] "));
	assert_eq!(feed.len(), 2);

	assert_eq!(ctx.core().hub().connection_count(), 1);
	stop_tx.send(()).unwrap();
	timeout(Duration::from_secs(2), client_task)
		.await
		.expect("client stops")
		.unwrap();

	timeout(Duration::from_secs(2), async {
		while ctx.core().hub().connection_count() > 0 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("subscriber unregistered after client left");

	ctx.shutdown().await;
	assert!(!ctx.status().twitch.connected);
}
