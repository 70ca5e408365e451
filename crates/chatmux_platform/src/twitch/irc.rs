#![forbid(unsafe_code)]

//! Twitch IRC-over-WebSocket line protocol (anonymous, read-only).

use std::collections::HashMap;

use chatmux_domain::{Badge, ChannelName, EmoteSpan, NativeEmote};

use crate::color::is_hex_color;

pub const TWITCH_IRC_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
pub const ANONYMOUS_PASS: &str = "SCHMOOPIIE";
pub const PONG_REPLY: &str = "PONG :tmi.twitch.tv";

const CAP_REQ: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands";

/// URL template for platform-native emote images.
pub fn native_emote_url(id: &str) -> String {
	format!("https://static-cdn.jtvnw.net/emoticons/v2/{id}/default/dark/2.0")
}

/// Random anonymous login, `justinfan<0..100000>`.
pub fn anonymous_nick() -> String {
	use rand::Rng;
	format!("justinfan{}", rand::rng().random_range(0..100_000u32))
}

/// Lines sent after the socket opens, in order.
pub fn handshake_lines(channel: &ChannelName, nick: &str) -> [String; 4] {
	[
		CAP_REQ.to_string(),
		format!("PASS {ANONYMOUS_PASS}"),
		format!("NICK {nick}"),
		format!("JOIN #{}", channel.as_str()),
	]
}

/// Split one WebSocket text frame into IRC lines.
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
	frame.split("\r\n").filter(|l| !l.is_empty())
}

/// A classified IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcLine {
	Ping,
	Privmsg(Box<PrivMsg>),
	Other,
}

/// A parsed `PRIVMSG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivMsg {
	pub login: String,
	pub channel: String,
	pub display_name: Option<String>,
	pub text: String,
	pub badges: Vec<Badge>,
	pub color: Option<String>,
	pub emotes: Vec<NativeEmote>,
}

impl PrivMsg {
	/// Display name when present, otherwise the login.
	pub fn username(&self) -> &str {
		self.display_name.as_deref().unwrap_or(&self.login)
	}
}

pub fn parse_line(line: &str) -> IrcLine {
	if line.starts_with("PING") {
		return IrcLine::Ping;
	}

	match parse_privmsg(line) {
		Some(msg) => IrcLine::Privmsg(Box::new(msg)),
		None => IrcLine::Other,
	}
}

fn parse_privmsg(line: &str) -> Option<PrivMsg> {
	let (tags_raw, rest) = match line.strip_prefix('@') {
		Some(tagged) => tagged.split_once(' ')?,
		None => ("", line),
	};

	let (prefix, rest) = rest.strip_prefix(':')?.split_once(' ')?;
	let (login, _) = prefix.split_once('!')?;
	if login.is_empty() || !login.chars().all(|c| c.is_alphanumeric() || c == '_') {
		return None;
	}

	let (command, params) = rest.split_once(' ')?;
	if command != "PRIVMSG" {
		return None;
	}

	let (target, text) = params.split_once(" :")?;
	let channel = target.trim().strip_prefix('#')?;
	if channel.is_empty() || text.is_empty() {
		return None;
	}

	let tags = parse_tags(tags_raw);

	let display_name = tags
		.get("display-name")
		.filter(|v| !v.is_empty())
		.map(|v| v.to_string());

	let color = tags.get("color").filter(|v| is_hex_color(v)).map(|v| v.to_string());

	let subscriber_months = tags.get("badge-info").and_then(|info| subscriber_months(info));
	let badges = tags
		.get("badges")
		.map(|raw| parse_badges(raw, subscriber_months.as_deref()))
		.unwrap_or_default();

	let emotes = tags.get("emotes").map(|raw| parse_emotes(raw, text)).unwrap_or_default();

	Some(PrivMsg {
		login: login.to_string(),
		channel: channel.to_string(),
		display_name,
		text: text.to_string(),
		badges,
		color,
		emotes,
	})
}

fn parse_tags(raw: &str) -> HashMap<&str, String> {
	raw.split(';')
		.filter_map(|kv| kv.split_once('='))
		.map(|(k, v)| (k, unescape_tag_value(v)))
		.collect()
}

fn unescape_tag_value(v: &str) -> String {
	if !v.contains('\\') {
		return v.to_string();
	}

	let mut out = String::with_capacity(v.len());
	let mut chars = v.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some(':') => out.push(';'),
			Some('s') => out.push(' '),
			Some('r') => out.push('\r'),
			Some('n') => out.push('\n'),
			Some(other) => out.push(other),
			None => {}
		}
	}
	out
}

fn subscriber_months(badge_info: &str) -> Option<String> {
	badge_info
		.split(',')
		.filter_map(|entry| entry.split_once('/'))
		.find(|(name, value)| *name == "subscriber" && !value.is_empty())
		.map(|(_, value)| value.to_string())
}

/// `name/version,...`; the subscriber version becomes the tenure in months
/// when `badge-info` carries it.
fn parse_badges(raw: &str, subscriber_months: Option<&str>) -> Vec<Badge> {
	raw.split(',')
		.filter_map(|entry| entry.split_once('/'))
		.filter(|(name, version)| !name.is_empty() && !version.is_empty())
		.map(|(name, version)| match subscriber_months {
			Some(months) if name == "subscriber" => Badge::new(name, months),
			_ => Badge::new(name, version),
		})
		.collect()
}

/// `id:s-e,s-e/id:s-e`, with code points as positions.
fn parse_emotes(raw: &str, text: &str) -> Vec<NativeEmote> {
	let chars: Vec<char> = text.chars().collect();

	raw.split('/')
		.filter_map(|group| {
			let (id, positions) = group.split_once(':')?;
			if id.is_empty() {
				return None;
			}

			let positions: Vec<EmoteSpan> = positions
				.split(',')
				.filter_map(|pos| {
					let (start, end) = pos.split_once('-')?;
					let start = start.parse().ok()?;
					let end = end.parse().ok()?;
					(start <= end).then_some(EmoteSpan { start, end })
				})
				.collect();

			let first = positions.first()?;
			let code = chars
				.get(first.start..=first.end)
				.map(|c| c.iter().collect())
				.unwrap_or_default();

			Some(NativeEmote {
				id: id.to_string(),
				code,
				positions,
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = "@badge-info=subscriber/14;badges=subscriber/12,premium/1;color=#1E90FF;display-name=SomeUser;emotes=25:0-4,12-16/1902:6-10;id=abc;mod=0 :someuser!someuser@someuser.tmi.twitch.tv PRIVMSG #somechannel :Kappa Keepo Kappa";

	fn privmsg(line: &str) -> PrivMsg {
		match parse_line(line) {
			IrcLine::Privmsg(m) => *m,
			other => panic!("expected privmsg, got {other:?}"),
		}
	}

	#[test]
	fn handshake_order() {
		let channel = ChannelName::new("SomeChannel").unwrap();
		let lines = handshake_lines(&channel, "justinfan123");
		assert_eq!(lines[0], "CAP REQ :twitch.tv/tags twitch.tv/commands");
		assert_eq!(lines[1], "PASS SCHMOOPIIE");
		assert_eq!(lines[2], "NICK justinfan123");
		assert_eq!(lines[3], "JOIN #somechannel");
	}

	#[test]
	fn anonymous_nick_shape() {
		let nick = anonymous_nick();
		let n: u32 = nick.strip_prefix("justinfan").unwrap().parse().unwrap();
		assert!(n < 100_000);
	}

	#[test]
	fn ping_and_other_lines() {
		assert_eq!(parse_line("PING :tmi.twitch.tv"), IrcLine::Ping);
		assert_eq!(parse_line(":tmi.twitch.tv 001 justinfan1 :Welcome, GLHF!"), IrcLine::Other);
		assert_eq!(
			parse_line("@emote-only=0 :tmi.twitch.tv ROOMSTATE #somechannel"),
			IrcLine::Other
		);
	}

	#[test]
	fn frames_split_on_crlf() {
		let frame = "PING :tmi.twitch.tv\r\n:a!a@a.tmi.twitch.tv PRIVMSG #c :hi\r\n";
		let lines: Vec<&str> = split_frame(frame).collect();
		assert_eq!(lines.len(), 2);
		assert_eq!(parse_line(lines[0]), IrcLine::Ping);
	}

	#[test]
	fn full_privmsg() {
		let m = privmsg(SAMPLE);
		assert_eq!(m.username(), "SomeUser");
		assert_eq!(m.login, "someuser");
		assert_eq!(m.channel, "somechannel");
		assert_eq!(m.text, "Kappa Keepo Kappa");
		assert_eq!(m.color.as_deref(), Some("#1E90FF"));
		assert_eq!(m.badges, vec![Badge::new("subscriber", "14"), Badge::new("premium", "1")]);

		assert_eq!(m.emotes.len(), 2);
		assert_eq!(m.emotes[0].id, "25");
		assert_eq!(m.emotes[0].code, "Kappa");
		assert_eq!(
			m.emotes[0].positions,
			vec![EmoteSpan { start: 0, end: 4 }, EmoteSpan { start: 12, end: 16 }]
		);
		assert_eq!(m.emotes[1].code, "Keepo");
	}

	#[test]
	fn login_used_when_display_name_missing_and_color_invalid() {
		let m = privmsg("@badges=;color=;display-name= :viewer_1!viewer_1@viewer_1.tmi.twitch.tv PRIVMSG #c :hello there");
		assert_eq!(m.username(), "viewer_1");
		assert!(m.color.is_none());
		assert!(m.badges.is_empty());
		assert!(m.emotes.is_empty());

		let m = privmsg("@color=red :v!v@v.tmi.twitch.tv PRIVMSG #c :x");
		assert!(m.color.is_none());
	}

	#[test]
	fn untagged_privmsg() {
		let m = privmsg(":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #c :a :colon in text");
		assert_eq!(m.text, "a :colon in text");
		assert!(m.display_name.is_none());
	}

	#[test]
	fn subscriber_version_kept_without_badge_info() {
		let m = privmsg("@badge-info=;badges=subscriber/3012 :v!v@v.tmi.twitch.tv PRIVMSG #c :hi");
		assert_eq!(m.badges, vec![Badge::new("subscriber", "3012")]);
	}

	#[test]
	fn display_name_is_unescaped() {
		let m = privmsg("@display-name=Some\\sUser :v!v@v.tmi.twitch.tv PRIVMSG #c :hi");
		assert_eq!(m.username(), "Some User");
	}

	#[test]
	fn emote_positions_count_code_points() {
		let m = privmsg("@emotes=25:3-7 :v!v@v.tmi.twitch.tv PRIVMSG #c :é🙂 Kappa");
		assert_eq!(m.emotes[0].code, "Kappa");

		let m = privmsg("@emotes=25:40-44 :v!v@v.tmi.twitch.tv PRIVMSG #c :short");
		assert_eq!(m.emotes[0].code, "");
	}

	#[test]
	fn malformed_emote_groups_are_skipped() {
		let m = privmsg("@emotes=25:x-y/:1-2/7:0-1 :v!v@v.tmi.twitch.tv PRIVMSG #c :hi there");
		assert_eq!(m.emotes.len(), 1);
		assert_eq!(m.emotes[0].id, "7");
		assert_eq!(m.emotes[0].code, "hi");
	}

	#[test]
	fn empty_text_is_not_a_message() {
		assert_eq!(parse_line(":v!v@v.tmi.twitch.tv PRIVMSG #c :"), IrcLine::Other);
	}
}
