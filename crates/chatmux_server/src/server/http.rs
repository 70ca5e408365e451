#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chatmux_domain::{ChannelName, Platform};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::context::AppContext;
use crate::server::session::{ConnectTarget, SessionError};
use crate::server::stream::{open_stream, sse_body};

pub(crate) type HttpBody = UnsyncBoxBody<Bytes, Infallible>;

/// Upper bound on request bodies; every body here is a small JSON object.
const MAX_REQUEST_BODY: usize = 64 * 1024;

pub(crate) fn empty(status: StatusCode) -> Response<HttpBody> {
	let mut res = Response::new(Empty::<Bytes>::new().boxed_unsync());
	*res.status_mut() = status;
	res
}

pub(crate) fn text(status: StatusCode, body: Bytes) -> Response<HttpBody> {
	let mut res = Response::new(Full::new(body).boxed_unsync());
	*res.status_mut() = status;
	res.headers_mut()
		.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
	res
}

pub(crate) fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<HttpBody> {
	match serde_json::to_vec(value) {
		Ok(body) => {
			let mut res = Response::new(Full::new(Bytes::from(body)).boxed_unsync());
			*res.status_mut() = status;
			res.headers_mut()
				.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
			res
		}
		Err(e) => {
			warn!(error = %e, "failed to encode response body");
			empty(StatusCode::INTERNAL_SERVER_ERROR)
		}
	}
}

fn error(status: StatusCode, message: impl Into<String>) -> Response<HttpBody> {
	json(status, &json!({ "error": message.into() }))
}

fn outcome(success: bool, message: impl Into<String>) -> serde_json::Value {
	json!({ "success": success, "message": message.into() })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
	platform: String,
	#[serde(default)]
	channel: Option<String>,
	#[serde(default)]
	video_id: Option<String>,
	#[serde(default)]
	channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisconnectRequest {
	platform: String,
}

fn query_params(req: &Request<Incoming>) -> HashMap<String, String> {
	req.uri()
		.query()
		.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
		.unwrap_or_default()
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Incoming>) -> Result<T, Response<HttpBody>> {
	let body = Limited::new(req.into_body(), MAX_REQUEST_BODY)
		.collect()
		.await
		.map_err(|e| error(StatusCode::BAD_REQUEST, format!("unreadable body: {e}")))?
		.to_bytes();
	serde_json::from_slice(&body).map_err(|e| error(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")))
}

fn parse_platform(raw: &str) -> Result<Platform, Response<HttpBody>> {
	raw.parse::<Platform>()
		.map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))
}

fn platform_label(platform: Platform) -> &'static str {
	match platform {
		Platform::Twitch => "Twitch",
		Platform::YouTube => "YouTube",
	}
}

/// Route one request against the application context.
pub(crate) async fn route(req: Request<Incoming>, ctx: Arc<AppContext>) -> Result<Response<HttpBody>, Infallible> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	debug!(%method, %path, "http request");

	let res = match (&method, path.as_str()) {
		(&Method::GET, "/api/chat/stream") => stream(&ctx),
		(&Method::GET, "/api/chat/messages") => json(StatusCode::OK, &json!({ "messages": ctx.messages() })),
		(&Method::GET, "/api/chat/status") => json(StatusCode::OK, &ctx.status()),
		(&Method::POST, "/api/chat/connect") => connect(req, &ctx).await,
		(&Method::POST, "/api/chat/disconnect") => disconnect(req, &ctx).await,
		(&Method::POST, "/api/chat/clear") => {
			ctx.clear_all();
			json(StatusCode::OK, &outcome(true, "Messages cleared"))
		}
		(&Method::GET, "/api/badges") => badge_url(&req, &ctx).await,
		(&Method::GET, "/api/badges/global") => {
			let sets = ctx.badges().global_sets().await;
			json(StatusCode::OK, &json!({ "badges": &*sets }))
		}
		(&Method::GET, "/api/badges/channel") => channel_badges(&req, &ctx).await,
		(&Method::GET, p) if p.starts_with("/api/emotes/") => emotes(&p["/api/emotes/".len()..], &ctx).await,
		(_, p) if p.starts_with("/api/") => empty(StatusCode::METHOD_NOT_ALLOWED),
		_ => empty(StatusCode::NOT_FOUND),
	};

	Ok(res)
}

fn stream(ctx: &AppContext) -> Response<HttpBody> {
	let mut res = Response::new(sse_body(open_stream(ctx)));
	let headers = res.headers_mut();
	headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
	headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
	headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
	res
}

async fn connect(req: Request<Incoming>, ctx: &AppContext) -> Response<HttpBody> {
	let body: ConnectRequest = match read_json(req).await {
		Ok(body) => body,
		Err(res) => return res,
	};
	let platform = match parse_platform(&body.platform) {
		Ok(p) => p,
		Err(res) => return res,
	};

	let target = match ConnectTarget::from_parts(
		platform,
		body.channel.as_deref(),
		body.video_id.as_deref(),
		body.channel_id.as_deref(),
	) {
		Ok(target) => target,
		Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
	};

	match ctx.connect(target).await {
		Ok(_) => json(
			StatusCode::OK,
			&outcome(true, format!("Connected to {}", platform_label(platform))),
		),
		Err(e @ SessionError::InvalidTarget { .. }) => error(StatusCode::BAD_REQUEST, e.to_string()),
		Err(e @ SessionError::Setup { .. }) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
	}
}

async fn disconnect(req: Request<Incoming>, ctx: &AppContext) -> Response<HttpBody> {
	let body: DisconnectRequest = match read_json(req).await {
		Ok(body) => body,
		Err(res) => return res,
	};
	let platform = match parse_platform(&body.platform) {
		Ok(p) => p,
		Err(res) => return res,
	};

	ctx.disconnect(platform).await;
	json(
		StatusCode::OK,
		&outcome(true, format!("Disconnected from {}", platform_label(platform))),
	)
}

async fn badge_url(req: &Request<Incoming>, ctx: &AppContext) -> Response<HttpBody> {
	let params = query_params(req);
	let (Some(name), Some(version)) = (params.get("name"), params.get("version")) else {
		return error(StatusCode::BAD_REQUEST, "missing name or version");
	};
	let channel = params.get("channel").map(String::as_str).filter(|c| !c.is_empty());

	let url = ctx.badges().resolve_badge_url(name, version, channel).await;
	json(StatusCode::OK, &json!({ "url": url }))
}

async fn channel_badges(req: &Request<Incoming>, ctx: &AppContext) -> Response<HttpBody> {
	let params = query_params(req);
	let Some(login) = params.get("broadcaster_login").filter(|l| !l.is_empty()) else {
		return error(StatusCode::BAD_REQUEST, "missing broadcaster_login");
	};

	match ctx.badges().channel_sets(login).await {
		Ok(sets) => json(StatusCode::OK, &json!({ "badges": &*sets })),
		Err(e) => {
			warn!(login = %login, error = %e, "channel badge lookup failed");
			error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
		}
	}
}

async fn emotes(raw_channel: &str, ctx: &AppContext) -> Response<HttpBody> {
	let channel = match ChannelName::new(raw_channel) {
		Ok(c) => c,
		Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
	};

	match ctx.catalog().fetch_all_emotes(&channel).await {
		Ok(emotes) => json(
			StatusCode::OK,
			&json!({ "emotes": &*emotes, "count": emotes.len(), "channel": channel.as_str() }),
		),
		Err(e) => {
			warn!(channel = %channel, error = %e, "emote fetch failed");
			error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
		}
	}
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, ctx: Arc<AppContext>) -> anyhow::Result<()> {
	loop {
		let (stream, peer) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let ctx = ctx.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| route(req, ctx.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				debug!(%peer, error = %err, "http connection closed with error");
			}
		});
	}
}

/// Bind `addr` and serve the API in the background.
pub async fn spawn_http_server(addr: SocketAddr, ctx: Arc<AppContext>) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
	let listener = TcpListener::bind(addr).await?;
	let local = listener.local_addr()?;
	info!(addr = %local, "http api listening");
	let task = tokio::spawn(async move {
		if let Err(err) = serve(listener, ctx).await {
			warn!(error = %err, "http server stopped");
		}
	});
	Ok((local, task))
}
