#![forbid(unsafe_code)]

/// Deterministic display color for a username.
///
/// Hashes the UTF-16 code units of `username` the way a JavaScript number
/// would: only `hash << 5` is truncated to 32 bits, the running sum is not.
/// The hash maps onto `hsl(h, s%, l%)` with `h` in `0..360`, `s` in `65..85`
/// and `l` in `55..70`.
pub fn color_from_username(username: &str) -> String {
	let mut hash: i64 = 0;
	for unit in username.encode_utf16() {
		let shifted = i64::from(to_int32(hash).wrapping_shl(5));
		hash = i64::from(unit).wrapping_add(shifted.wrapping_sub(hash));
	}

	let hue = (hash % 360).unsigned_abs();
	let saturation = 65 + hash.unsigned_abs() % 20;
	let lightness = 55 + (to_int32(hash) >> 8).unsigned_abs() % 15;

	format!("hsl({hue}, {saturation}%, {lightness}%)")
}

/// Low 32 bits as a signed integer.
fn to_int32(v: i64) -> i32 {
	v as i32
}

/// `#RRGGBB` check.
pub fn is_hex_color(s: &str) -> bool {
	s.len() == 7 && s.starts_with('#') && s[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// `hsl(h, s%, l%)` check, the shape `color_from_username` produces.
pub fn is_hsl_color(s: &str) -> bool {
	let Some(inner) = s.strip_prefix("hsl(").and_then(|s| s.strip_suffix(')')) else {
		return false;
	};
	let parts: Vec<&str> = inner.split(", ").collect();
	let [h, sat, light] = parts.as_slice() else {
		return false;
	};
	let percent = |p: &str| p.strip_suffix('%').is_some_and(|n| n.parse::<u8>().is_ok_and(|n| n <= 100));
	h.parse::<u16>().is_ok_and(|h| h < 360) && percent(sat) && percent(light)
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn known_values() {
		assert_eq!(color_from_username("bob"), "hsl(157, 82%, 61%)");
		assert_eq!(color_from_username("alice"), "hsl(0, 65%, 62%)");
		assert_eq!(color_from_username(""), "hsl(0, 65%, 55%)");
	}

	#[test]
	fn long_names_keep_the_running_sum_untruncated() {
		assert_eq!(color_from_username("averyveryverylongusername"), "hsl(117, 82%, 56%)");
		assert_eq!(color_from_username("StreamElements"), "hsl(135, 80%, 66%)");
	}

	#[test]
	fn hsl_color_check() {
		assert!(is_hsl_color("hsl(157, 82%, 61%)"));
		assert!(is_hsl_color(&color_from_username("Viewer")));
		assert!(!is_hsl_color("hsl(400, 82%, 61%)"));
		assert!(!is_hsl_color("hsl(157, 82, 61%)"));
		assert!(!is_hsl_color("hsl(157, 82%)"));
		assert!(!is_hsl_color("#1E90FF"));
	}

	#[test]
	fn hex_color_check() {
		assert!(is_hex_color("#1E90FF"));
		assert!(is_hex_color("#abcdef"));
		assert!(!is_hex_color("1E90FF"));
		assert!(!is_hex_color("#1E90F"));
		assert!(!is_hex_color("#GGGGGG"));
		assert!(!is_hex_color("#ÿÿÿ"));
	}

	proptest! {
		#[test]
		fn stays_in_range_and_is_stable(name in "\\PC{0,40}") {
			let c = color_from_username(&name);
			prop_assert_eq!(&c, &color_from_username(&name));
			prop_assert!(is_hsl_color(&c));

			let inner = c.strip_prefix("hsl(").and_then(|s| s.strip_suffix("%)")).unwrap();
			let parts: Vec<&str> = inner.split(", ").collect();
			prop_assert_eq!(parts.len(), 3);
			let h: u32 = parts[0].parse().unwrap();
			let s: u32 = parts[1].trim_end_matches('%').parse().unwrap();
			let l: u32 = parts[2].parse().unwrap();
			prop_assert!(h < 360);
			prop_assert!((65..85).contains(&s));
			prop_assert!((55..70).contains(&l));
		}
	}
}
