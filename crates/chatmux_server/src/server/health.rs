#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::server::http::{HttpBody, empty, text};

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn mark_not_ready(&self) {
		self.ready.store(false, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn spawn_health_server(listener: TcpListener, state: HealthState) -> JoinHandle<()> {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(listener, state).await {
			warn!(error = %err, "health server stopped");
		}
	})
}

/// Bind `addr` and serve `/healthz` and `/readyz` in the background.
pub async fn bind_health_server(addr: SocketAddr, state: HealthState) -> anyhow::Result<JoinHandle<()>> {
	let listener = TcpListener::bind(addr).await?;
	info!(addr = %listener.local_addr()?, "health server listening");
	Ok(spawn_health_server(listener, state))
}

async fn run_health_server(listener: TcpListener, state: HealthState) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

pub(crate) async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<HttpBody>, hyper::Error> {
	Ok(health_response(req.method(), req.uri().path(), &state))
}

pub(crate) fn health_response(method: &Method, path: &str, state: &HealthState) -> Response<HttpBody> {
	if method != Method::GET {
		return empty(StatusCode::METHOD_NOT_ALLOWED);
	}

	match path {
		"/healthz" => text(StatusCode::OK, Bytes::from_static(b"ok")),
		"/readyz" if state.is_ready() => text(StatusCode::OK, Bytes::from_static(b"ready")),
		"/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not-ready")),
		_ => empty(StatusCode::NOT_FOUND),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn readiness_follows_state() {
		let state = HealthState::new();
		assert_eq!(health_response(&Method::GET, "/healthz", &state).status(), StatusCode::OK);
		assert_eq!(
			health_response(&Method::GET, "/readyz", &state).status(),
			StatusCode::SERVICE_UNAVAILABLE
		);

		state.mark_ready();
		assert_eq!(health_response(&Method::GET, "/readyz", &state).status(), StatusCode::OK);

		state.mark_not_ready();
		assert!(!state.is_ready());
		assert_eq!(
			health_response(&Method::POST, "/healthz", &state).status(),
			StatusCode::METHOD_NOT_ALLOWED
		);
		assert_eq!(health_response(&Method::GET, "/nope", &state).status(), StatusCode::NOT_FOUND);
	}
}
