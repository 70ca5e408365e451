#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Context;
use chatmux_domain::{ChannelName, Platform};
use chatmux_util::backoff::backoff_delay;
use futures_util::{SinkExt, StreamExt};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::irc::{self, IrcLine};
use crate::{
	AdapterControl, AdapterControlRx, AdapterEventTx, IncomingMessage, PlatformAdapter, emit_message, new_session_id,
	status, status_error,
};

type IrcWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Twitch IRC adapter configuration.
#[derive(Debug, Clone)]
pub struct TwitchIrcConfig {
	pub channel: ChannelName,
	pub ws_url: String,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

impl TwitchIrcConfig {
	pub fn new(channel: ChannelName) -> Self {
		Self {
			channel,
			ws_url: irc::TWITCH_IRC_WS_URL.to_string(),
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
		}
	}
}

/// Anonymous read-only Twitch chat adapter over IRC-WebSocket.
pub struct TwitchIrcAdapter {
	cfg: TwitchIrcConfig,
}

enum Disconnect {
	Shutdown,
	Lost,
}

impl TwitchIrcAdapter {
	pub fn new(cfg: TwitchIrcConfig) -> Self {
		Self { cfg }
	}

	async fn connect_irc_ws(&self) -> anyhow::Result<IrcWs> {
		let (mut ws, _resp) = tokio_tungstenite::connect_async(self.cfg.ws_url.as_str())
			.await
			.context("connect_async to twitch irc ws")?;

		let nick = irc::anonymous_nick();
		for line in irc::handshake_lines(&self.cfg.channel, &nick) {
			ws.send(Message::text(line)).await.context("send irc handshake")?;
		}

		Ok(ws)
	}

	fn to_incoming(&self, msg: irc::PrivMsg) -> IncomingMessage {
		let username = msg.username().to_string();
		let mut incoming = IncomingMessage::new(Platform::Twitch, username, msg.text);
		incoming.channel = Some(msg.channel);
		incoming.badges = msg.badges;
		incoming.color = msg.color;
		incoming.native_emotes = msg.emotes;
		incoming
	}

	/// Pump one connected socket until it is lost or shutdown is requested.
	async fn pump(&self, ws: &mut IrcWs, control_rx: &mut AdapterControlRx, events_tx: &AdapterEventTx) -> Disconnect {
		let platform = Platform::Twitch;
		let mut dropped: u64 = 0;

		loop {
			tokio::select! {
				cmd = control_rx.recv() => {
					match cmd {
						Some(AdapterControl::Shutdown) | None => {
							info!(%platform, channel = %self.cfg.channel, "twitch adapter received Shutdown");
							let _ = ws.close(None).await;
							return Disconnect::Shutdown;
						}
					}
				}

				msg = ws.next() => {
					let Some(msg) = msg else {
						let _ = events_tx.try_send(status(platform, false, "twitch irc ws ended"));
						return Disconnect::Lost;
					};

					let msg = match msg {
						Ok(m) => m,
						Err(e) => {
							let _ = events_tx.try_send(status_error(platform, "twitch irc ws read error", e));
							return Disconnect::Lost;
						}
					};

					match msg {
						Message::Text(t) => {
							for line in irc::split_frame(t.as_str()) {
								match irc::parse_line(line) {
									IrcLine::Ping => {
										if let Err(e) = ws.send(Message::text(irc::PONG_REPLY.to_string())).await {
											let _ = events_tx.try_send(status_error(platform, "twitch irc pong failed", e));
											return Disconnect::Lost;
										}
									}
									IrcLine::Privmsg(m) => {
										if !emit_message(events_tx, self.to_incoming(*m)) {
											dropped = dropped.saturating_add(1);
											if dropped.is_power_of_two() {
												warn!(%platform, dropped, "twitch messages dropped");
											}
										}
									}
									IrcLine::Other => {
										debug!(%platform, line, "irc line ignored");
									}
								}
							}
						}

						Message::Ping(p) => {
							let _ = ws.send(Message::Pong(p)).await;
						}

						Message::Close(frame) => {
							let _ = events_tx.try_send(status(platform, false, format!("twitch irc ws closed: {frame:?}")));
							return Disconnect::Lost;
						}

						_ => {}
					}
				}
			}
		}
	}

	async fn run_loop(self, mut control_rx: AdapterControlRx, events_tx: AdapterEventTx) -> anyhow::Result<()> {
		let platform = Platform::Twitch;
		let adapter_session_id = new_session_id();
		let mut reconnect_attempt: u32 = 0;

		info!(%platform, channel = %self.cfg.channel, session_id = %adapter_session_id, "twitch adapter starting");

		loop {
			if reconnect_attempt > 0 {
				let delay = backoff_delay(
					reconnect_attempt - 1,
					self.cfg.reconnect_min_delay,
					self.cfg.reconnect_max_delay,
				);
				let _ = events_tx.try_send(status(
					platform,
					false,
					format!("reconnecting in {delay:?} (attempt={reconnect_attempt})"),
				));

				tokio::select! {
					cmd = control_rx.recv() => {
						if matches!(cmd, Some(AdapterControl::Shutdown) | None) {
							break;
						}
					}
					_ = sleep(delay) => {}
				}
			}

			let connected = tokio::select! {
				cmd = control_rx.recv() => {
					if matches!(cmd, Some(AdapterControl::Shutdown) | None) {
						break;
					}
					continue;
				}
				res = self.connect_irc_ws() => res,
			};

			let mut ws = match connected {
				Ok(ws) => ws,
				Err(e) => {
					reconnect_attempt = reconnect_attempt.saturating_add(1);
					warn!(%platform, error = %e, attempt = reconnect_attempt, "twitch irc connect failed");
					let _ = events_tx.try_send(status_error(platform, "failed to connect twitch irc ws", e));
					continue;
				}
			};

			reconnect_attempt = 0;
			let _ = events_tx.try_send(status(
				platform,
				true,
				format!("joined #{} (session_id={adapter_session_id})", self.cfg.channel),
			));

			match self.pump(&mut ws, &mut control_rx, &events_tx).await {
				Disconnect::Shutdown => break,
				Disconnect::Lost => {
					reconnect_attempt = reconnect_attempt.saturating_add(1);
				}
			}
		}

		let _ = events_tx.try_send(status(platform, false, "twitch adapter stopped"));
		Ok(())
	}
}

#[async_trait::async_trait]
impl PlatformAdapter for TwitchIrcAdapter {
	fn platform(&self) -> Platform {
		Platform::Twitch
	}

	async fn run(self: Box<Self>, control_rx: AdapterControlRx, events_tx: AdapterEventTx) -> anyhow::Result<()> {
		self.run_loop(control_rx, events_tx).await
	}
}
