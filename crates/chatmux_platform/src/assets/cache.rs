#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::task::RepeatingTask;

pub const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// A cache that can drop its expired entries.
pub trait PrunableCache: Send + Sync + 'static {
	fn prune(&self);
}

/// Periodically prune `caches` until the returned task is dropped.
pub fn spawn_cache_pruner(caches: Vec<Arc<dyn PrunableCache>>, every: Duration) -> RepeatingTask {
	RepeatingTask::spawn("asset-cache-pruner", every, move || {
		let caches = caches.clone();
		async move {
			for cache in &caches {
				cache.prune();
			}
			debug!(cache_count = caches.len(), "asset caches pruned");
			Some(every)
		}
	})
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[derive(Default)]
	struct Counting(AtomicUsize);

	impl PrunableCache for Counting {
		fn prune(&self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn prunes_on_interval() {
		let cache = Arc::new(Counting::default());
		let _pruner = spawn_cache_pruner(vec![cache.clone() as Arc<dyn PrunableCache>], Duration::from_secs(10));

		tokio::time::sleep(Duration::from_secs(25)).await;
		assert_eq!(cache.0.load(Ordering::SeqCst), 2);
	}
}
