#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::time::Duration;

use chatmux_domain::{Badge, ChatMessage, Platform};
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::util::time::is_expired;

/// Bounds applied to the message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
	pub max_messages: usize,
	pub max_age: Duration,
}

impl Default for StoreLimits {
	fn default() -> Self {
		Self {
			max_messages: 100,
			max_age: Duration::from_secs(30),
		}
	}
}

/// A rewritten message waiting for an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
	pub platform: Platform,
	pub username: String,
	pub raw_text: String,
	pub rendered_text: String,
	pub badges: Vec<Badge>,
	pub color: Option<String>,
	pub channel: Option<String>,
}

/// Bounded, oldest-first message buffer.
///
/// The count bound is enforced on every append; the age bound on every read.
#[derive(Debug)]
pub struct MessageStore {
	messages: VecDeque<ChatMessage>,
	limits: StoreLimits,
	last_created_at: i64,
}

fn id_suffix() -> String {
	rand::rng()
		.sample_iter(&Alphanumeric)
		.take(9)
		.map(|b| char::from(b).to_ascii_lowercase())
		.collect()
}

impl MessageStore {
	pub fn new(limits: StoreLimits) -> Self {
		Self {
			messages: VecDeque::with_capacity(limits.max_messages.min(1024)),
			limits,
			last_created_at: i64::MIN,
		}
	}

	pub fn limits(&self) -> StoreLimits {
		self.limits
	}

	/// Stamp `draft` and append it, dropping the oldest entries past the bound.
	pub fn append(&mut self, draft: MessageDraft, now_ms: i64) -> ChatMessage {
		let created_at = now_ms.max(self.last_created_at);
		self.last_created_at = created_at;

		let message = ChatMessage {
			id: format!("{}-{}-{}", draft.platform, created_at, id_suffix()),
			platform: draft.platform,
			username: draft.username,
			raw_text: draft.raw_text,
			rendered_text: draft.rendered_text,
			badges: draft.badges,
			color: draft.color,
			created_at,
			channel: draft.channel,
		};

		self.messages.push_back(message.clone());
		while self.messages.len() > self.limits.max_messages {
			self.messages.pop_front();
		}

		message
	}

	/// Evict expired messages from the front, then return the rest oldest-first.
	pub fn read(&mut self, now_ms: i64) -> Vec<ChatMessage> {
		self.evict_expired(now_ms);
		self.messages.iter().cloned().collect()
	}

	fn evict_expired(&mut self, now_ms: i64) {
		while let Some(front) = self.messages.front() {
			if !is_expired(front.created_at, now_ms, self.limits.max_age) {
				break;
			}
			self.messages.pop_front();
		}
	}

	pub fn clear(&mut self) {
		self.messages.clear();
	}

	pub fn len(&self) -> usize {
		self.messages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.messages.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	fn draft(text: &str) -> MessageDraft {
		MessageDraft {
			platform: Platform::Twitch,
			username: "viewer".to_string(),
			raw_text: text.to_string(),
			rendered_text: text.to_string(),
			badges: Vec::new(),
			color: None,
			channel: Some("somechannel".to_string()),
		}
	}

	#[test]
	fn overflow_keeps_the_newest_hundred() {
		let mut store = MessageStore::new(StoreLimits::default());
		for i in 0..101 {
			store.append(draft(&format!("m{i}")), 1_000 + i);
		}

		let msgs = store.read(1_200);
		assert_eq!(msgs.len(), 100);
		assert_eq!(msgs[0].raw_text, "m1");
		assert_eq!(msgs[99].raw_text, "m100");
	}

	#[test]
	fn read_evicts_expired_messages() {
		let mut store = MessageStore::new(StoreLimits::default());
		store.append(draft("old"), 0);
		store.append(draft("new"), 20_000);

		assert_eq!(store.read(30_000).len(), 2);

		let msgs = store.read(30_001);
		assert_eq!(msgs.len(), 1);
		assert_eq!(msgs[0].raw_text, "new");
		assert_eq!(store.len(), 1);

		assert!(store.read(60_000).is_empty());
	}

	#[test]
	fn ids_and_timestamps() {
		let mut store = MessageStore::new(StoreLimits::default());
		let a = store.append(draft("a"), 5_000);
		let b = store.append(draft("b"), 4_000);

		assert!(a.id.starts_with("twitch-5000-"));
		assert_eq!(a.id.len(), "twitch-5000-".len() + 9);
		assert_ne!(a.id, b.id);
		assert_eq!(b.created_at, 5_000);
		assert_eq!(a.channel.as_deref(), Some("somechannel"));
	}

	#[test]
	fn clear_empties_the_store() {
		let mut store = MessageStore::new(StoreLimits::default());
		store.append(draft("a"), 1);
		store.clear();
		assert!(store.is_empty());
		assert!(store.read(1).is_empty());
	}

	proptest! {
		#[test]
		fn buffer_stays_bounded_and_ordered(max in 1usize..20, steps in proptest::collection::vec(0i64..50, 0..80)) {
			let mut store = MessageStore::new(StoreLimits { max_messages: max, max_age: Duration::from_secs(3600) });
			let mut now = 0;
			for (i, step) in steps.iter().enumerate() {
				now += step;
				store.append(draft(&i.to_string()), now);
				prop_assert!(store.len() <= max);
			}

			let msgs = store.read(now);
			prop_assert_eq!(msgs.len(), steps.len().min(max));
			prop_assert!(msgs.windows(2).all(|w| w[0].created_at <= w[1].created_at));
			if let Some(last) = msgs.last() {
				prop_assert_eq!(last.raw_text.clone(), (steps.len() - 1).to_string());
			}
		}
	}
}
