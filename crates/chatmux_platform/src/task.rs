#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a background task that runs a cycle, sleeps for the delay the
/// cycle returns, and repeats until the cycle returns `None` or the handle is
/// cancelled.
///
/// Cycles never overlap: the next delay starts only after the previous cycle
/// completed. Cancelling drops any in-flight cycle, so no further work runs
/// after [`RepeatingTask::cancel`] returns. Dropping the handle cancels it.
#[derive(Debug)]
pub struct RepeatingTask {
	label: &'static str,
	cancel_tx: watch::Sender<bool>,
	handle: Option<JoinHandle<()>>,
}

impl RepeatingTask {
	pub fn spawn<F, Fut>(label: &'static str, initial_delay: Duration, mut cycle: F) -> Self
	where
		F: FnMut() -> Fut + Send + 'static,
		Fut: Future<Output = Option<Duration>> + Send + 'static,
	{
		let (cancel_tx, mut cancel_rx) = watch::channel(false);

		let handle = tokio::spawn(async move {
			let mut delay = initial_delay;
			loop {
				if !delay.is_zero() {
					tokio::select! {
						biased;
						_ = cancel_rx.changed() => break,
						_ = tokio::time::sleep(delay) => {}
					}
				}

				if *cancel_rx.borrow() {
					break;
				}

				let next = tokio::select! {
					biased;
					_ = cancel_rx.changed() => break,
					next = cycle() => next,
				};

				match next {
					Some(d) => delay = d,
					None => {
						debug!(task = label, "repeating task finished");
						break;
					}
				}
			}
		});

		Self {
			label,
			cancel_tx,
			handle: Some(handle),
		}
	}

	pub fn label(&self) -> &'static str {
		self.label
	}

	/// Stop the task. Idempotent.
	pub fn cancel(&mut self) {
		let _ = self.cancel_tx.send(true);
		if let Some(handle) = self.handle.take() {
			handle.abort();
			debug!(task = self.label, "repeating task cancelled");
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.handle.is_none()
	}

	/// True once the task has stopped for any reason.
	pub fn is_finished(&self) -> bool {
		self.handle.as_ref().is_none_or(|h| h.is_finished())
	}
}

impl Drop for RepeatingTask {
	fn drop(&mut self) {
		self.cancel();
	}
}
