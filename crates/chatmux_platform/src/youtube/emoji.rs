#![forbid(unsafe_code)]

use std::borrow::Cow;

/// Colon shortcodes YouTube leaves in `displayMessage`, mapped to emoji.
const SHORTCODES: &[(&str, &str)] = &[
	(":yougotthis:", "💪"),
	(":elbowcough:", "😷"),
	(":clappinghands:", "👏"),
	(":heart:", "❤️"),
	(":fire:", "🔥"),
	(":thumbsup:", "👍"),
	(":thumbsdown:", "👎"),
	(":smilingface:", "😊"),
	(":laughingface:", "😂"),
	(":crying:", "😢"),
	(":thinking:", "🤔"),
	(":shocked:", "😱"),
	(":partying:", "🥳"),
	(":cool:", "😎"),
	(":winking:", "😉"),
	(":love:", "😍"),
	(":angry:", "😠"),
	(":sleepy:", "😴"),
	(":surprised:", "😮"),
	(":confused:", "😕"),
	(":starstruck:", "🤩"),
	(":money:", "💰"),
	(":star:", "⭐"),
	(":rocket:", "🚀"),
	(":trophy:", "🏆"),
	(":crown:", "👑"),
	(":gift:", "🎁"),
	(":cake:", "🎂"),
	(":pizza:", "🍕"),
	(":coffee:", "☕"),
	(":musical:", "🎵"),
	(":gaming:", "🎮"),
	(":wave:", "👋"),
	(":victory:", "✌️"),
	(":ok:", "👌"),
	(":pray:", "🙏"),
	(":muscle:", "💪"),
	(":rainbow:", "🌈"),
	(":sun:", "☀️"),
	(":moon:", "🌙"),
];

fn lookup(shortcode: &str) -> Option<&'static str> {
	SHORTCODES.iter().find(|(code, _)| *code == shortcode).map(|(_, emoji)| *emoji)
}

/// Replace known `:shortcode:` tokens with their emoji; unknown ones stay.
pub fn replace_shortcodes(text: &str) -> Cow<'_, str> {
	if !text.contains(':') {
		return Cow::Borrowed(text);
	}

	let mut out = String::with_capacity(text.len());
	let mut rest = text;
	let mut changed = false;

	while let Some(open) = rest.find(':') {
		let after_open = open + 1;
		let Some(len) = rest[after_open..].find(':') else {
			break;
		};
		let close = after_open + len;

		match lookup(&rest[open..=close]) {
			Some(emoji) => {
				out.push_str(&rest[..open]);
				out.push_str(emoji);
				rest = &rest[close + 1..];
				changed = true;
			}
			None => {
				out.push_str(&rest[..after_open]);
				rest = &rest[after_open..];
			}
		}
	}

	if !changed {
		return Cow::Borrowed(text);
	}

	out.push_str(rest);
	Cow::Owned(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn replaces_known_codes() {
		assert_eq!(replace_shortcodes("gg :fire::fire: nice"), "gg 🔥🔥 nice");
		assert_eq!(replace_shortcodes(":heart:"), "❤️");
	}

	#[test]
	fn unknown_codes_and_stray_colons_are_kept() {
		assert_eq!(replace_shortcodes("time 12:30 :notreal: ok"), "time 12:30 :notreal: ok");
		assert_eq!(replace_shortcodes("a:b:rocket:"), "a:b🚀");
		assert!(matches!(replace_shortcodes("plain"), Cow::Borrowed(_)));
		assert!(matches!(replace_shortcodes("12:30"), Cow::Borrowed(_)));
	}
}
