#![forbid(unsafe_code)]

pub mod markup;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
	Twitch,
	#[serde(rename = "youtube")]
	YouTube,
}

impl Platform {
	pub const ALL: [Platform; 2] = [Platform::Twitch, Platform::YouTube];

	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Platform::Twitch => "twitch",
			Platform::YouTube => "youtube",
		}
	}
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown platform: {0}")]
	UnknownPlatform(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

impl FromStr for Platform {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"twitch" => Ok(Platform::Twitch),
			"youtube" | "you_tube" | "yt" => Ok(Platform::YouTube),
			other => Err(ParseIdError::UnknownPlatform(other.to_string())),
		}
	}
}

/// Twitch channel login, normalized to lowercase without a leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
	pub fn new(name: impl AsRef<str>) -> Result<Self, ParseIdError> {
		let name = name.as_ref().trim().trim_start_matches('#');
		if name.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if name.chars().any(char::is_whitespace) {
			return Err(ParseIdError::InvalidFormat(format!("channel contains whitespace: {name}")));
		}
		Ok(Self(name.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::new(s)
	}
}

/// Sender badge as `(name, version)`, e.g. `subscriber/12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Badge {
	pub name: String,
	pub version: String,
}

impl Badge {
	pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			version: version.into(),
		}
	}
}

/// Third-party catalog emote, matched against free text by code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emote {
	pub id: String,
	pub code: String,
	pub url: String,
	#[serde(default)]
	pub animated: bool,
	#[serde(default)]
	pub zero_width: bool,
}

impl Emote {
	pub fn new(code: impl Into<String>, url: impl Into<String>) -> Self {
		let code = code.into();
		Self {
			id: code.clone(),
			code,
			url: url.into(),
			animated: false,
			zero_width: false,
		}
	}

	pub fn zero_width(mut self) -> Self {
		self.zero_width = true;
		self
	}
}

/// Inclusive code-point span `[start, end]` within a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmoteSpan {
	pub start: usize,
	pub end: usize,
}

/// Platform-native inline emote with the spans it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeEmote {
	pub id: String,
	/// Literal text at the first span; empty when it could not be recovered.
	pub code: String,
	pub positions: Vec<EmoteSpan>,
}

/// Normalized chat message as stored and fanned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	pub id: String,
	pub platform: Platform,
	pub username: String,
	pub raw_text: String,
	pub rendered_text: String,
	#[serde(default)]
	pub badges: Vec<Badge>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub color: Option<String>,
	/// Unix milliseconds at ingest.
	pub created_at: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel: Option<String>,
}

/// Connection state of one platform slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStatus {
	pub connected: bool,
	/// Channel name (Twitch) or video id (YouTube).
	pub identifier: Option<String>,
}

impl PlatformStatus {
	pub fn connected(identifier: impl Into<String>) -> Self {
		Self {
			connected: true,
			identifier: Some(identifier.into()),
		}
	}
}

/// Status of both platform slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
	pub twitch: PlatformStatus,
	pub youtube: PlatformStatus,
}

impl StatusSnapshot {
	pub fn get(&self, platform: Platform) -> &PlatformStatus {
		match platform {
			Platform::Twitch => &self.twitch,
			Platform::YouTube => &self.youtube,
		}
	}

	pub fn get_mut(&mut self, platform: Platform) -> &mut PlatformStatus {
		match platform {
			Platform::Twitch => &mut self.twitch,
			Platform::YouTube => &mut self.youtube,
		}
	}
}

/// Events carried on the push stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
	/// First event on every stream.
	Connected,

	/// Snapshot of the store at subscribe time.
	Initial { messages: Vec<ChatMessage> },

	NewMessage { message: ChatMessage },
}

impl StreamEvent {
	pub fn kind(&self) -> &'static str {
		match self {
			StreamEvent::Connected => "connected",
			StreamEvent::Initial { .. } => "initial",
			StreamEvent::NewMessage { .. } => "new-message",
		}
	}
}
