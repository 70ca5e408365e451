#![forbid(unsafe_code)]

use std::time::Duration;

use chatmux_client_core::feed::{FeedView, render_line};
use chatmux_client_core::{ClientConfig, DEFAULT_SERVER_ENDPOINT, StreamClient, unix_ms_now};
use chatmux_domain::StreamEvent;
use tracing::info;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatmux_tail [--connect http://host:port] [--fade-secs N]\n\
\n\
Options:\n\
	--connect    Server endpoint (alias: --endpoint) (default: {DEFAULT_SERVER_ENDPOINT})\n\
	             Format: http://host:port\n\
	--fade-secs  Drop messages older than N seconds (default: keep until evicted)\n\
	--help       Show this help\n\
\n\
Examples:\n\
	chatmux_tail --connect http://127.0.0.1:18480\n\
	chatmux_tail --fade-secs 30\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatmux_client_core=debug".to_string());
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

fn parse_args() -> (String, Option<Duration>) {
	let mut endpoint = DEFAULT_SERVER_ENDPOINT.to_string();
	let mut fade = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" | "--endpoint" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--connect must be non-empty (expected http://host:port)");
					usage_and_exit();
				}
				endpoint = v;
			}
			"--fade-secs" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let secs: u64 = v.trim().parse().unwrap_or_else(|_| {
					eprintln!("Invalid --fade-secs value: {v}");
					usage_and_exit()
				});
				fade = (secs > 0).then(|| Duration::from_secs(secs));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	(endpoint, fade)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let (endpoint, fade) = parse_args();

	let cfg = ClientConfig::from_http_endpoint(&endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});
	info!(url = %cfg.stream_url(), fade_secs = fade.map(|f| f.as_secs()), "tailing chat");

	let mut client = StreamClient::new(cfg)?;
	let mut feed = FeedView::new(fade);

	client
		.run(
			|event| {
				let now = unix_ms_now();
				match event {
					StreamEvent::Connected => info!("connected"),
					initial @ StreamEvent::Initial { .. } => {
						feed.apply(initial, now);
						for msg in feed.messages() {
							println!("{}", render_line(msg));
						}
					}
					new @ StreamEvent::NewMessage { .. } => {
						if let Some(msg) = feed.apply(new, now) {
							println!("{}", render_line(msg));
						}
					}
				}
			},
			async {
				let _ = tokio::signal::ctrl_c().await;
			},
		)
		.await;

	Ok(())
}
