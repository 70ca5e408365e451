#![forbid(unsafe_code)]

//! Splices emote markers into message text.

use std::cmp::Reverse;

use chatmux_domain::markup::{EmoteMarker, Segment, sanitize_code, segments};
use chatmux_domain::{Emote, NativeEmote};
use chatmux_platform::twitch::irc::native_emote_url;
use regex::Regex;
use tracing::debug;

/// Rewrite `text` with native emotes first, then third-party emotes.
///
/// Delimiter code points typed by the sender become U+FFFD first, so only
/// markers placed here can appear in the output. The replacement is one code
/// point for one, which keeps native positions valid.
pub fn rewrite(text: &str, third_party: &[Emote], native: &[NativeEmote]) -> String {
	let text = sanitize_code(text);
	let mut out = if native.is_empty() {
		text.into_owned()
	} else {
		replace_native(&text, native)
	};

	if !third_party.is_empty() {
		out = replace_third_party(&out, third_party);
	}

	out
}

struct NativeSpan<'a> {
	start: usize,
	end: usize,
	emote: &'a NativeEmote,
}

fn replace_native(text: &str, native: &[NativeEmote]) -> String {
	// Byte offset of every code point, plus the end of the string.
	let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).chain([text.len()]).collect();
	let char_count = offsets.len() - 1;

	let mut spans: Vec<NativeSpan<'_>> = native
		.iter()
		.flat_map(|emote| {
			emote.positions.iter().map(move |p| NativeSpan {
				start: p.start,
				end: p.end,
				emote,
			})
		})
		.collect();
	spans.sort_by_key(|s| Reverse(s.start));

	let mut out = text.to_string();
	let mut placed: Vec<(usize, usize)> = Vec::new();

	for span in spans {
		if span.start > span.end || span.end >= char_count {
			debug!(id = %span.emote.id, start = span.start, end = span.end, "native emote span out of range");
			continue;
		}
		if placed.iter().any(|&(s, e)| span.start <= e && s <= span.end) {
			continue;
		}

		let byte_start = offsets[span.start];
		let byte_end = offsets[span.end + 1];
		let code = if span.emote.code.is_empty() {
			&text[byte_start..byte_end]
		} else {
			span.emote.code.as_str()
		};

		let marker = EmoteMarker::new(code, native_emote_url(&span.emote.id), false).encode();
		out.replace_range(byte_start..byte_end, &marker);
		placed.push((span.start, span.end));
	}

	out
}

fn is_word_char(c: char) -> bool {
	c.is_alphanumeric() || c == '_'
}

/// `\b` on each side whose edge character is a word character.
fn word_pattern(code: &str) -> Option<Regex> {
	let lead = if code.chars().next().is_some_and(is_word_char) { r"\b" } else { "" };
	let trail = if code.chars().next_back().is_some_and(is_word_char) { r"\b" } else { "" };
	Regex::new(&format!("{lead}{}{trail}", regex::escape(code))).ok()
}

/// Non-word edges need whitespace or the segment edge next to them.
fn has_free_edges(text: &str, start: usize, end: usize, code: &str) -> bool {
	let lead_ok = code.chars().next().is_some_and(is_word_char)
		|| text[..start].chars().next_back().is_none_or(char::is_whitespace);
	let trail_ok = code.chars().next_back().is_some_and(is_word_char)
		|| text[end..].chars().next().is_none_or(char::is_whitespace);
	lead_ok && trail_ok
}

fn replace_in_free_text(text: &str, pattern: &Regex, emote: &Emote, out: &mut String) {
	let mut last = 0;
	for m in pattern.find_iter(text) {
		if !has_free_edges(text, m.start(), m.end(), &emote.code) {
			continue;
		}
		out.push_str(&text[last..m.start()]);
		EmoteMarker::new(emote.code.as_str(), emote.url.as_str(), emote.zero_width).write_to(out);
		last = m.end();
	}
	out.push_str(&text[last..]);
}

fn replace_third_party(text: &str, third_party: &[Emote]) -> String {
	let mut ordered: Vec<&Emote> = third_party.iter().filter(|e| !e.code.is_empty()).collect();
	ordered.sort_by_key(|e| Reverse(e.code.chars().count()));

	let mut current = text.to_string();
	for emote in ordered {
		if !current.contains(emote.code.as_str()) {
			continue;
		}
		let Some(pattern) = word_pattern(&emote.code) else {
			continue;
		};

		let mut next = String::with_capacity(current.len());
		for seg in segments(&current) {
			match seg {
				Segment::Text(t) => replace_in_free_text(t, &pattern, emote, &mut next),
				marker @ Segment::Marker { .. } => next.push_str(marker.as_raw()),
			}
		}
		current = next;
	}

	current
}
