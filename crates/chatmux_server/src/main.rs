#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use chatmux_server::config::{default_config_path, load_server_config_from_path};
use chatmux_server::server::context::AppContext;
use chatmux_server::server::health::bind_health_server;
use chatmux_server::server::http::serve;
use chatmux_util::endpoint::HttpEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_BIND: &str = "http://127.0.0.1:18480";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatmux_server [--bind http://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: {DEFAULT_BIND})\n\
\t         Format: http://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

/// Returns the `--bind` value, if one was given.
fn parse_args() -> Option<String> {
	let mut bind_endpoint = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected http://host:port)");
					usage_and_exit();
				}
				bind_endpoint = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind_endpoint
}

fn resolve_bind(endpoint: &str) -> SocketAddr {
	let bind = HttpEndpoint::parse(endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	bind.bind_addr().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatmux_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("chatmux_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let cli_bind = parse_args();

	let config_path = default_config_path()?;
	let server_cfg = load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	let bind_endpoint = cli_bind
		.or_else(|| server_cfg.server.http_bind.clone())
		.unwrap_or_else(|| DEFAULT_BIND.to_string());
	let bind_addr = resolve_bind(&bind_endpoint);

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let ctx = Arc::new(AppContext::from_config(&server_cfg)?);

	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				bind_health_server(addr, ctx.health().clone()).await?;
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let listener = TcpListener::bind(bind_addr).await?;
	info!(bind = %listener.local_addr()?, "chatmux_server: http api ready");
	ctx.health().mark_ready();

	tokio::select! {
		res = serve(listener, ctx.clone()) => {
			if let Err(e) = res {
				warn!(error = %e, "http server stopped");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			info!("ctrl-c received; shutting down");
		}
	}

	ctx.shutdown().await;
	Ok(())
}
