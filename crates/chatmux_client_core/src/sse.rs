#![forbid(unsafe_code)]

//! Incremental `text/event-stream` decoding.

use bytes::{Buf, BytesMut};
use chatmux_domain::StreamEvent;

/// Largest event block accepted before the buffer is discarded.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024;

/// One decoded event block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseItem {
	/// Joined `data:` lines.
	Data(String),
	/// Comment-only block such as a keepalive.
	Comment,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SseError {
	#[error("event block exceeds {max} bytes")]
	TooLarge { max: usize },

	#[error("event block is not valid UTF-8")]
	InvalidUtf8,
}

/// Buffers chunks and yields complete event blocks.
///
/// Blocks end at a blank line. `\r\n` line endings are accepted.
#[derive(Debug)]
pub struct SseDecoder {
	buf: BytesMut,
	max_event_bytes: usize,
}

impl Default for SseDecoder {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_EVENT_BYTES)
	}
}

impl SseDecoder {
	pub fn new(max_event_bytes: usize) -> Self {
		Self {
			buf: BytesMut::new(),
			max_event_bytes,
		}
	}

	/// Feed a chunk and return every block it completes.
	pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseItem>, SseError> {
		self.buf.extend_from_slice(chunk);

		let mut items = Vec::new();
		while let Some((block_len, sep_len)) = find_block_end(&self.buf) {
			let block = self.buf.split_to(block_len);
			self.buf.advance(sep_len);

			let text = std::str::from_utf8(&block).map_err(|_| SseError::InvalidUtf8)?;
			if let Some(item) = parse_block(text) {
				items.push(item);
			}
		}

		if self.buf.len() > self.max_event_bytes {
			self.buf.clear();
			return Err(SseError::TooLarge {
				max: self.max_event_bytes,
			});
		}

		Ok(items)
	}

	/// Bytes of an incomplete block still buffered.
	pub fn pending(&self) -> usize {
		self.buf.len()
	}
}

/// Position of the first blank line: `(block length, separator length)`.
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
	let mut i = 0;
	while i < buf.len() {
		if buf[i] == b'\n' {
			if buf.get(i + 1) == Some(&b'\n') {
				return Some((i, 2));
			}
			if buf.get(i + 1) == Some(&b'\r') && buf.get(i + 2) == Some(&b'\n') {
				return Some((i, 3));
			}
		}
		i += 1;
	}
	None
}

fn parse_block(block: &str) -> Option<SseItem> {
	let mut data: Option<String> = None;
	let mut saw_comment = false;

	for line in block.split('\n') {
		let line = line.strip_suffix('\r').unwrap_or(line);
		if line.starts_with(':') {
			saw_comment = true;
			continue;
		}

		let (field, value) = match line.split_once(':') {
			Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
			None => (line, ""),
		};
		if field == "data" {
			match &mut data {
				Some(d) => {
					d.push('\n');
					d.push_str(value);
				}
				None => data = Some(value.to_string()),
			}
		}
	}

	match data {
		Some(d) => Some(SseItem::Data(d)),
		None if saw_comment => Some(SseItem::Comment),
		None => None,
	}
}

/// Parse a `data:` payload into a stream event.
pub fn parse_event(data: &str) -> Result<StreamEvent, serde_json::Error> {
	serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn decodes_data_and_keepalive_blocks() {
		let mut dec = SseDecoder::default();
		let items = dec
			.push(b"data: {\"type\":\"connected\"}\n\n: keepalive\n\n")
			.unwrap();
		assert_eq!(
			items,
			vec![SseItem::Data("{\"type\":\"connected\"}".to_string()), SseItem::Comment]
		);
		assert_eq!(dec.pending(), 0);
	}

	#[test]
	fn blocks_may_span_chunks() {
		let mut dec = SseDecoder::default();
		assert!(dec.push(b"data: {\"ty").unwrap().is_empty());
		assert!(dec.push(b"pe\":\"connected\"}\r\n").unwrap().is_empty());
		let items = dec.push(b"\r\n").unwrap();
		assert_eq!(items, vec![SseItem::Data("{\"type\":\"connected\"}".to_string())]);
	}

	#[test]
	fn multiple_data_lines_are_joined() {
		let mut dec = SseDecoder::default();
		let items = dec.push(b"event: x\ndata: a\ndata:b\n\n").unwrap();
		assert_eq!(items, vec![SseItem::Data("a\nb".to_string())]);
	}

	#[test]
	fn oversized_blocks_are_rejected() {
		let mut dec = SseDecoder::new(8);
		assert_eq!(dec.push(b"data: 0123456789"), Err(SseError::TooLarge { max: 8 }));
		assert_eq!(dec.pending(), 0);
	}

	#[test]
	fn unknown_event_shapes_are_rejected() {
		assert!(parse_event("{\"type\":\"connected\"}").is_ok());
		assert!(parse_event("{\"type\":\"bogus\"}").is_err());
		assert!(parse_event("{\"type\":\"new-message\"}").is_err());
	}

	proptest! {
		#[test]
		fn chunking_does_not_change_output(split in 0usize..64) {
			let stream = b"data: {\"type\":\"connected\"}\n\n: keepalive\n\ndata: x\n\n";
			let split = split.min(stream.len());

			let mut whole = SseDecoder::default();
			let expected = whole.push(stream).unwrap();

			let mut parts = SseDecoder::default();
			let mut got = parts.push(&stream[..split]).unwrap();
			got.extend(parts.push(&stream[split..]).unwrap());

			prop_assert_eq!(got, expected);
		}
	}
}
