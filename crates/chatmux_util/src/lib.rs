#![forbid(unsafe_code)]

pub mod endpoint;

pub mod backoff {
	use std::time::Duration;

	/// `min * 2^attempt`, clamped to `[min, max]`.
	pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
		let pow = attempt.min(16);
		let ms = min.as_millis().saturating_mul(1u128 << pow);
		let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
		d.min(max).max(min)
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn doubles_until_capped() {
			let min = Duration::from_secs(1);
			let max = Duration::from_secs(30);
			assert_eq!(backoff_delay(0, min, max), Duration::from_secs(1));
			assert_eq!(backoff_delay(1, min, max), Duration::from_secs(2));
			assert_eq!(backoff_delay(4, min, max), Duration::from_secs(16));
			assert_eq!(backoff_delay(5, min, max), Duration::from_secs(30));
			assert_eq!(backoff_delay(u32::MAX, min, max), Duration::from_secs(30));
		}
	}
}
