#![forbid(unsafe_code)]

//! Server-sent event push stream.

use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use chatmux_domain::StreamEvent;
use chatmux_platform::task::RepeatingTask;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::server::context::AppContext;
use crate::server::http::HttpBody;

pub const KEEPALIVE_FRAME: &[u8] = b": keepalive\n\n";

/// Encoded frames buffered per subscriber.
const FRAME_QUEUE_CAPACITY: usize = 64;

/// Encode one event as an SSE `data:` frame.
pub fn sse_frame(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
	let json = serde_json::to_string(event)?;
	Ok(Bytes::from(format!("data: {json}\n\n")))
}

fn push_initial(frames_tx: &mpsc::Sender<Bytes>, event: &StreamEvent) {
	match sse_frame(event) {
		Ok(frame) => {
			let _ = frames_tx.try_send(frame);
		}
		Err(e) => warn!(kind = event.kind(), error = %e, "failed to encode stream event"),
	}
}

/// Register a subscriber and return the receiver of its encoded frames.
///
/// The stream starts with `connected` and `initial`, then carries each new
/// message. It ends when the client goes away or the hub drops the
/// subscriber.
pub fn open_stream(ctx: &AppContext) -> mpsc::Receiver<Bytes> {
	let hub = ctx.core().hub().clone();
	// Register before the snapshot so nothing falls between the two.
	let (conn_id, mut hub_rx) = hub.register_connection();
	let snapshot = ctx.messages();
	let mut seen: HashSet<String> = snapshot.iter().map(|m| m.id.clone()).collect();

	let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
	push_initial(&frames_tx, &StreamEvent::Connected);
	push_initial(&frames_tx, &StreamEvent::Initial { messages: snapshot });

	let heartbeat = ctx.heartbeat();
	metrics::gauge!("chatmux_stream_subscribers").increment(1.0);
	debug!(connection = ?conn_id, "stream subscriber opened");

	tokio::spawn(async move {
		let _heartbeat = spawn_heartbeat(frames_tx.clone(), heartbeat);

		loop {
			tokio::select! {
				_ = frames_tx.closed() => {
					debug!(connection = ?conn_id, "stream client went away");
					break;
				}
				msg = hub_rx.recv() => {
					let Some(msg) = msg else {
						debug!(connection = ?conn_id, "stream subscriber dropped by hub");
						break;
					};

					if !seen.is_empty() {
						if seen.contains(&msg.id) {
							continue;
						}
						seen.clear();
					}

					let frame = match sse_frame(&StreamEvent::NewMessage { message: (*msg).clone() }) {
						Ok(frame) => frame,
						Err(e) => {
							warn!(error = %e, "failed to encode stream event");
							continue;
						}
					};
					if frames_tx.send(frame).await.is_err() {
						break;
					}
				}
			}
		}

		hub.remove_connection(conn_id);
		metrics::gauge!("chatmux_stream_subscribers").decrement(1.0);
	});

	frames_rx
}

/// Comment frame every `every`; stops once the subscriber is gone.
fn spawn_heartbeat(frames_tx: mpsc::Sender<Bytes>, every: Duration) -> RepeatingTask {
	RepeatingTask::spawn("sse-heartbeat", every, move || {
		let tx = frames_tx.clone();
		async move {
			match tx.try_send(Bytes::from_static(KEEPALIVE_FRAME)) {
				// A full queue already has frames in flight.
				Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Some(every),
				Err(mpsc::error::TrySendError::Closed(_)) => None,
			}
		}
	})
}

/// Response body that yields frames until the sender side ends.
pub fn sse_body(frames_rx: mpsc::Receiver<Bytes>) -> HttpBody {
	let frames = futures::stream::unfold(frames_rx, |mut rx| async move {
		rx.recv().await.map(|bytes| (Ok::<_, Infallible>(Frame::data(bytes)), rx))
	});
	StreamBody::new(frames).boxed_unsync()
}
