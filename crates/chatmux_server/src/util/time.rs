#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
#[inline]
pub fn unix_ms_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::from_secs(0))
		.as_millis() as i64
}

/// Whether a timestamp taken at `created_at_ms` is strictly older than `max_age` at `now_ms`.
#[inline]
pub fn is_expired(created_at_ms: i64, now_ms: i64, max_age: Duration) -> bool {
	let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
	now_ms.saturating_sub(created_at_ms) > max_age_ms
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expiry_is_strict() {
		let age = Duration::from_secs(30);
		assert!(!is_expired(1_000, 31_000, age));
		assert!(is_expired(1_000, 31_001, age));
		assert!(!is_expired(5_000, 1_000, age));
	}
}
