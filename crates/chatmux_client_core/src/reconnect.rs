#![forbid(unsafe_code)]

use std::time::Duration;

/// Base of the exponential reconnect delay.
pub const RECONNECT_BASE: Duration = Duration::from_millis(1000);
/// Reconnect delays never exceed this.
pub const RECONNECT_CAP: Duration = Duration::from_millis(30_000);

/// `min(1000 * 2^attempt, 30000)` milliseconds.
pub fn reconnect_delay(attempt: u32) -> Duration {
	let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
	let ms = (RECONNECT_BASE.as_millis() as u64).saturating_mul(factor);
	Duration::from_millis(ms).min(RECONNECT_CAP)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	Connecting,
	Open,
	/// Waiting before the next attempt; `attempt` counts failures since the
	/// last successful open.
	Backoff { attempt: u32 },
}

/// Push-stream connection lifecycle.
///
/// Only one attempt is in flight at a time: `begin` refuses while already
/// connecting or open.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
	state: ConnectionState,
	failures: u32,
}

impl Default for ReconnectMachine {
	fn default() -> Self {
		Self::new()
	}
}

impl ReconnectMachine {
	pub fn new() -> Self {
		Self {
			state: ConnectionState::Idle,
			failures: 0,
		}
	}

	pub fn state(&self) -> ConnectionState {
		self.state
	}

	/// Start an attempt. Returns false if one is already in progress.
	pub fn begin(&mut self) -> bool {
		match self.state {
			ConnectionState::Idle | ConnectionState::Backoff { .. } => {
				self.state = ConnectionState::Connecting;
				true
			}
			ConnectionState::Connecting | ConnectionState::Open => false,
		}
	}

	/// The stream is up; resets the failure count.
	pub fn opened(&mut self) {
		self.failures = 0;
		self.state = ConnectionState::Open;
	}

	/// The attempt failed or the open stream ended. Returns the delay before
	/// the next attempt.
	pub fn failed(&mut self) -> Duration {
		self.failures = self.failures.saturating_add(1);
		self.state = ConnectionState::Backoff { attempt: self.failures };
		reconnect_delay(self.failures)
	}

	/// Caller-initiated stop.
	pub fn stop(&mut self) {
		self.failures = 0;
		self.state = ConnectionState::Idle;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_doubles_then_caps() {
		assert_eq!(reconnect_delay(0), Duration::from_millis(1000));
		assert_eq!(reconnect_delay(1), Duration::from_millis(2000));
		assert_eq!(reconnect_delay(4), Duration::from_millis(16_000));
		assert_eq!(reconnect_delay(5), RECONNECT_CAP);
		assert_eq!(reconnect_delay(200), RECONNECT_CAP);
	}

	#[test]
	fn failures_count_up_and_reset_on_open() {
		let mut m = ReconnectMachine::new();
		assert_eq!(m.state(), ConnectionState::Idle);

		assert!(m.begin());
		assert!(!m.begin());
		assert_eq!(m.failed(), Duration::from_millis(2000));
		assert_eq!(m.state(), ConnectionState::Backoff { attempt: 1 });

		assert!(m.begin());
		assert_eq!(m.failed(), Duration::from_millis(4000));
		assert_eq!(m.state(), ConnectionState::Backoff { attempt: 2 });

		assert!(m.begin());
		m.opened();
		assert_eq!(m.state(), ConnectionState::Open);
		assert!(!m.begin());

		assert_eq!(m.failed(), Duration::from_millis(2000));
		m.stop();
		assert_eq!(m.state(), ConnectionState::Idle);
	}
}
