#![forbid(unsafe_code)]

//! Inline emote markers embedded in rendered message text.
//!
//! A marker is `U+E000 EMOTE U+E001 code U+E001 url U+E001 flag U+E002` where
//! `flag` is `0` or `1` (zero-width). All delimiters are private-use code points.

use std::borrow::Cow;

pub const MARKER_START: char = '\u{E000}';
pub const MARKER_SEP: char = '\u{E001}';
pub const MARKER_END: char = '\u{E002}';

const MARKER_TAG: &str = "EMOTE";

fn is_delimiter(c: char) -> bool {
	matches!(c, MARKER_START | MARKER_SEP | MARKER_END)
}

/// Replace delimiter code points so a code can be embedded verbatim.
pub fn sanitize_code(code: &str) -> Cow<'_, str> {
	if code.chars().any(is_delimiter) {
		Cow::Owned(
			code.chars()
				.map(|c| if is_delimiter(c) { char::REPLACEMENT_CHARACTER } else { c })
				.collect(),
		)
	} else {
		Cow::Borrowed(code)
	}
}

/// A decoded emote marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteMarker {
	pub code: String,
	pub url: String,
	pub zero_width: bool,
}

impl EmoteMarker {
	pub fn new(code: impl Into<String>, url: impl Into<String>, zero_width: bool) -> Self {
		Self {
			code: code.into(),
			url: url.into(),
			zero_width,
		}
	}

	/// Append the encoded marker to `out`.
	pub fn write_to(&self, out: &mut String) {
		out.push(MARKER_START);
		out.push_str(MARKER_TAG);
		out.push(MARKER_SEP);
		out.push_str(&sanitize_code(&self.code));
		out.push(MARKER_SEP);
		out.push_str(&sanitize_code(&self.url));
		out.push(MARKER_SEP);
		out.push(if self.zero_width { '1' } else { '0' });
		out.push(MARKER_END);
	}

	pub fn encode(&self) -> String {
		let mut out = String::with_capacity(self.code.len() + self.url.len() + 16);
		self.write_to(&mut out);
		out
	}
}

/// A piece of rendered text: literal text or a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
	Text(&'a str),
	Marker {
		/// Exact encoded slice, including delimiters.
		raw: &'a str,
		marker: EmoteMarker,
	},
}

impl Segment<'_> {
	pub fn as_raw(&self) -> &str {
		match self {
			Segment::Text(t) => t,
			Segment::Marker { raw, .. } => raw,
		}
	}
}

fn parse_marker_body(body: &str) -> Option<EmoteMarker> {
	if body.contains(MARKER_START) {
		return None;
	}

	let mut parts = body.split(MARKER_SEP);
	let tag = parts.next()?;
	let code = parts.next()?;
	let url = parts.next()?;
	let flag = parts.next()?;
	if parts.next().is_some() || tag != MARKER_TAG {
		return None;
	}

	let zero_width = match flag {
		"0" => false,
		"1" => true,
		_ => return None,
	};

	Some(EmoteMarker::new(code, url, zero_width))
}

/// Split rendered text into literal and marker segments, left to right.
///
/// Malformed markers are kept as literal text.
pub fn segments(input: &str) -> Vec<Segment<'_>> {
	let mut out = Vec::new();
	let mut text_start = 0;
	let mut cursor = 0;

	while let Some(rel) = input[cursor..].find(MARKER_START) {
		let open = cursor + rel;
		let body_start = open + MARKER_START.len_utf8();
		let Some(close_rel) = input[body_start..].find(MARKER_END) else {
			break;
		};
		let close = body_start + close_rel;
		let after = close + MARKER_END.len_utf8();

		match parse_marker_body(&input[body_start..close]) {
			Some(marker) => {
				if open > text_start {
					out.push(Segment::Text(&input[text_start..open]));
				}
				out.push(Segment::Marker {
					raw: &input[open..after],
					marker,
				});
				cursor = after;
				text_start = after;
			}
			None => cursor = body_start,
		}
	}

	if text_start < input.len() {
		out.push(Segment::Text(&input[text_start..]));
	}

	out
}

/// Every marker in `input`, in order.
pub fn markers(input: &str) -> Vec<EmoteMarker> {
	segments(input)
		.into_iter()
		.filter_map(|s| match s {
			Segment::Marker { marker, .. } => Some(marker),
			Segment::Text(_) => None,
		})
		.collect()
}

/// Rendered text with every marker replaced by its code.
pub fn plain_text(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	for seg in segments(input) {
		match seg {
			Segment::Text(t) => out.push_str(t),
			Segment::Marker { marker, .. } => out.push_str(&marker.code),
		}
	}
	out
}

/// A node of composed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderNode {
	Text(String),
	Emote {
		code: String,
		url: String,
		/// Zero-width emotes stacked on top of this one, in order.
		overlays: Vec<EmoteMarker>,
	},
}

/// Compose rendered text into display nodes.
///
/// A zero-width marker never becomes its own node: it is stacked onto the most
/// recent non-zero-width emote node. Without such a node it is dropped.
pub fn compose(input: &str) -> Vec<RenderNode> {
	let mut nodes: Vec<RenderNode> = Vec::new();
	let mut last_emote: Option<usize> = None;

	for seg in segments(input) {
		match seg {
			Segment::Text(t) => nodes.push(RenderNode::Text(t.to_string())),
			Segment::Marker { marker, .. } if marker.zero_width => {
				if let Some(idx) = last_emote
					&& let Some(RenderNode::Emote { overlays, .. }) = nodes.get_mut(idx)
				{
					overlays.push(marker);
				}
			}
			Segment::Marker { marker, .. } => {
				nodes.push(RenderNode::Emote {
					code: marker.code,
					url: marker.url,
					overlays: Vec::new(),
				});
				last_emote = Some(nodes.len() - 1);
			}
		}
	}

	nodes
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn parses_text_and_markers_in_order() {
		let kappa = EmoteMarker::new("Kappa", "u", false).encode();
		let input = format!("{kappa} test {kappa}");
		let segs = segments(&input);

		assert_eq!(segs.len(), 3);
		assert!(matches!(&segs[0], Segment::Marker { marker, .. } if marker.code == "Kappa"));
		assert_eq!(segs[1], Segment::Text(" test "));
		assert!(matches!(&segs[2], Segment::Marker { marker, .. } if marker.url == "u"));

		let joined: String = segs.iter().map(Segment::as_raw).collect();
		assert_eq!(joined, input);
	}

	#[test]
	fn codes_with_bracket_and_pipe_survive() {
		let m = EmoteMarker::new("[a|b]", "https://cdn.example/x.webp", true);
		let parsed = markers(&m.encode());
		assert_eq!(parsed, vec![m]);
	}

	#[test]
	fn delimiters_inside_code_are_replaced() {
		let code = format!("ab{MARKER_END}c");
		let m = EmoteMarker::new(code, "u", false);
		let parsed = markers(&m.encode());
		assert_eq!(parsed.len(), 1);
		assert_eq!(parsed[0].code, "ab\u{FFFD}c");
	}

	#[test]
	fn malformed_markers_stay_literal() {
		let input = format!("x {MARKER_START}EMOTE{MARKER_SEP}a{MARKER_END} y");
		let segs = segments(&input);
		assert_eq!(segs, vec![Segment::Text(&input)]);

		let unterminated = format!("{MARKER_START}EMOTE{MARKER_SEP}a{MARKER_SEP}u{MARKER_SEP}0");
		assert_eq!(segments(&unterminated), vec![Segment::Text(&unterminated)]);
	}

	#[test]
	fn plain_text_replaces_markers_with_codes() {
		let input = format!("hi {} there", EmoteMarker::new("PogChamp", "u", false).encode());
		assert_eq!(plain_text(&input), "hi PogChamp there");
	}

	#[test]
	fn zero_width_attaches_to_preceding_emote() {
		let base = EmoteMarker::new("Kappa", "https://native/kappa", false);
		let overlay = EmoteMarker::new("SoSnowy", "https://3p/snow", true);
		let input = format!("{}{}", base.encode(), overlay.encode());

		let nodes = compose(&input);
		assert_eq!(
			nodes,
			vec![RenderNode::Emote {
				code: "Kappa".to_string(),
				url: "https://native/kappa".to_string(),
				overlays: vec![overlay],
			}]
		);
	}

	#[test]
	fn zero_width_skips_over_text_to_last_emote() {
		let base = EmoteMarker::new("Kappa", "k", false);
		let overlay = EmoteMarker::new("RainTime", "r", true);
		let input = format!("{} {}", base.encode(), overlay.encode());

		let nodes = compose(&input);
		assert_eq!(nodes.len(), 2);
		assert!(matches!(&nodes[0], RenderNode::Emote { overlays, .. } if overlays.len() == 1));
		assert_eq!(nodes[1], RenderNode::Text(" ".to_string()));
	}

	#[test]
	fn zero_width_without_predecessor_is_dropped() {
		let overlay = EmoteMarker::new("SoSnowy", "s", true);
		let input = format!("{} hello", overlay.encode());
		assert_eq!(compose(&input), vec![RenderNode::Text(" hello".to_string())]);
		assert!(compose(&overlay.encode()).is_empty());
	}

	proptest! {
		#[test]
		fn delimiter_free_text_is_one_segment(s in "[^\u{E000}-\u{E002}]{1,64}") {
			prop_assert_eq!(segments(&s), vec![Segment::Text(&s)]);
		}

		#[test]
		fn markers_between_text_parse_back(
			code in "[A-Za-z0-9:()|\\[\\]]{1,12}",
			left in "[a-z ]{0,8}",
			right in "[a-z ]{0,8}",
			zw in any::<bool>(),
		) {
			let m = EmoteMarker::new(code, "https://cdn.example/e/1", zw);
			let input = format!("{left}{}{right}", m.encode());
			prop_assert_eq!(markers(&input), vec![m]);
			let raw: String = segments(&input).iter().map(Segment::as_raw).collect();
			prop_assert_eq!(raw, input);
		}
	}
}
