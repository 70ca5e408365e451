#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::time::Duration;

use chatmux_domain::markup::{RenderNode, compose};
use chatmux_domain::{ChatMessage, StreamEvent};

/// Entries kept regardless of fade settings.
pub const DEFAULT_FEED_CAPACITY: usize = 200;

/// Client-side message window fed by stream events.
///
/// With a fade window, messages older than it (by `created_at`) are dropped.
#[derive(Debug, Clone)]
pub struct FeedView {
	messages: VecDeque<ChatMessage>,
	fade_after: Option<Duration>,
	capacity: usize,
}

impl FeedView {
	pub fn new(fade_after: Option<Duration>) -> Self {
		Self {
			messages: VecDeque::new(),
			fade_after,
			capacity: DEFAULT_FEED_CAPACITY,
		}
	}

	pub fn with_capacity(mut self, capacity: usize) -> Self {
		self.capacity = capacity.max(1);
		self
	}

	fn is_live(&self, msg: &ChatMessage, now_ms: i64) -> bool {
		match self.fade_after {
			Some(fade) => now_ms.saturating_sub(msg.created_at) < fade.as_millis() as i64,
			None => true,
		}
	}

	/// Apply one stream event. Returns the message it added, if any.
	pub fn apply(&mut self, event: StreamEvent, now_ms: i64) -> Option<&ChatMessage> {
		match event {
			StreamEvent::Connected => None,
			StreamEvent::Initial { messages } => {
				self.messages = messages.into_iter().filter(|m| self.is_live(m, now_ms)).collect();
				self.trim();
				None
			}
			StreamEvent::NewMessage { message } => {
				self.prune(now_ms);
				if !self.is_live(&message, now_ms) || self.messages.iter().any(|m| m.id == message.id) {
					return None;
				}
				self.messages.push_back(message);
				self.trim();
				self.messages.back()
			}
		}
	}

	/// Drop faded messages; returns how many were removed.
	pub fn prune(&mut self, now_ms: i64) -> usize {
		let before = self.messages.len();
		let fade_after = self.fade_after;
		self.messages.retain(|m| match fade_after {
			Some(fade) => now_ms.saturating_sub(m.created_at) < fade.as_millis() as i64,
			None => true,
		});
		before - self.messages.len()
	}

	fn trim(&mut self) {
		while self.messages.len() > self.capacity {
			self.messages.pop_front();
		}
	}

	pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
		self.messages.iter()
	}

	pub fn len(&self) -> usize {
		self.messages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.messages.is_empty()
	}
}

/// Render a message body for a terminal: emotes as `[code]`, zero-width
/// overlays stacked as `[code+overlay]`.
pub fn render_body(rendered_text: &str) -> String {
	let mut out = String::new();
	for node in compose(rendered_text) {
		match node {
			RenderNode::Text(t) => out.push_str(&t),
			RenderNode::Emote { code, overlays, .. } => {
				out.push('[');
				out.push_str(&code);
				for o in overlays {
					out.push('+');
					out.push_str(&o.code);
				}
				out.push(']');
			}
		}
	}
	out
}

/// One display line: `[platform] user: body`.
pub fn render_line(msg: &ChatMessage) -> String {
	format!("[{}] {}: {}", msg.platform, msg.username, render_body(&msg.rendered_text))
}

#[cfg(test)]
mod tests {
	use chatmux_domain::Platform;
	use chatmux_domain::markup::EmoteMarker;

	use super::*;

	fn msg(id: &str, created_at: i64, text: &str) -> ChatMessage {
		ChatMessage {
			id: id.to_string(),
			platform: Platform::Twitch,
			username: "viewer".to_string(),
			raw_text: text.to_string(),
			rendered_text: text.to_string(),
			badges: Vec::new(),
			color: None,
			created_at,
			channel: None,
		}
	}

	#[test]
	fn initial_replaces_and_filters_faded() {
		let mut feed = FeedView::new(Some(Duration::from_secs(10)));
		feed.apply(StreamEvent::NewMessage { message: msg("old", 0, "x") }, 0);

		let snapshot = vec![msg("a", 1_000, "a"), msg("b", 15_000, "b")];
		feed.apply(StreamEvent::Initial { messages: snapshot }, 20_000);

		let ids: Vec<_> = feed.messages().map(|m| m.id.as_str()).collect();
		assert_eq!(ids, ["b"]);
	}

	#[test]
	fn new_messages_append_once_and_fade() {
		let mut feed = FeedView::new(Some(Duration::from_secs(10)));
		assert!(feed.apply(StreamEvent::NewMessage { message: msg("a", 0, "a") }, 0).is_some());
		assert!(feed.apply(StreamEvent::NewMessage { message: msg("a", 0, "a") }, 0).is_none());
		feed.apply(StreamEvent::NewMessage { message: msg("b", 5_000, "b") }, 5_000);
		assert_eq!(feed.len(), 2);

		assert_eq!(feed.prune(12_000), 1);
		assert_eq!(feed.messages().next().map(|m| m.id.as_str()), Some("b"));
		assert_eq!(feed.prune(16_000), 1);
		assert!(feed.is_empty());
	}

	#[test]
	fn already_faded_message_is_not_added() {
		let mut feed = FeedView::new(Some(Duration::from_secs(10)));
		feed.apply(StreamEvent::NewMessage { message: msg("a", 50_000, "a") }, 50_000);
		assert!(feed.apply(StreamEvent::NewMessage { message: msg("b", 0, "b") }, 50_000).is_none());
		assert_eq!(feed.messages().next().map(|m| m.id.as_str()), Some("a"));
		assert_eq!(feed.len(), 1);
	}

	#[test]
	fn without_fade_only_capacity_bounds() {
		let mut feed = FeedView::new(None).with_capacity(2);
		for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
			feed.apply(StreamEvent::NewMessage { message: msg(id, i as i64, id) }, i64::MAX);
		}
		let ids: Vec<_> = feed.messages().map(|m| m.id.as_str()).collect();
		assert_eq!(ids, ["b", "c"]);
	}

	#[test]
	fn renders_emotes_with_overlays() {
		let text = format!(
			"{} {}{} hi",
			EmoteMarker::new("Kappa", "u1", false).encode(),
			EmoteMarker::new("catJAM", "u2", false).encode(),
			EmoteMarker::new("SoSnowy", "u3", true).encode(),
		);
		let line = render_line(&msg("m", 0, &text));
		assert_eq!(line, "[twitch] viewer: [Kappa] [catJAM+SoSnowy] hi");
	}
}
