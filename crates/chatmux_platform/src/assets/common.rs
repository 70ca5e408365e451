#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// A cached value and when it was fetched.
pub(crate) struct Cached<T> {
	pub(crate) fetched_at: Instant,
	pub(crate) value: T,
}

impl<T: Clone> Cached<T> {
	pub(crate) fn new(value: T) -> Self {
		Self {
			fetched_at: Instant::now(),
			value,
		}
	}

	pub(crate) fn fresh(&self, ttl: Duration) -> Option<T> {
		(self.fetched_at.elapsed() <= ttl).then(|| self.value.clone())
	}
}

pub(crate) fn get_map_cache<T: Clone>(cache: &Mutex<HashMap<String, Cached<T>>>, key: &str, ttl: Duration) -> Option<T> {
	cache.lock().get(key).and_then(|entry| entry.fresh(ttl))
}

pub(crate) fn set_map_cache<T: Clone>(cache: &Mutex<HashMap<String, Cached<T>>>, key: &str, value: T) {
	cache.lock().insert(key.to_string(), Cached::new(value));
}

pub(crate) fn get_optional_cache<T: Clone>(cache: &Mutex<Option<Cached<T>>>, ttl: Duration) -> Option<T> {
	cache.lock().as_ref().and_then(|entry| entry.fresh(ttl))
}

pub(crate) fn set_optional_cache<T: Clone>(cache: &Mutex<Option<Cached<T>>>, value: T) {
	*cache.lock() = Some(Cached::new(value));
}

pub(crate) fn prune_map_cache<T>(cache: &Mutex<HashMap<String, Cached<T>>>, ttl: Duration) {
	let mut guard = cache.lock();
	guard.retain(|_, entry| entry.fetched_at.elapsed() <= ttl);
}

pub(crate) fn prune_optional_cache<T>(cache: &Mutex<Option<Cached<T>>>, ttl: Duration) {
	let mut guard = cache.lock();
	if let Some(entry) = guard.as_ref()
		&& entry.fetched_at.elapsed() > ttl
	{
		*guard = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn entries_expire_after_ttl() {
		let ttl = Duration::from_secs(10);
		let map: Mutex<HashMap<String, Cached<u32>>> = Mutex::new(HashMap::new());
		let single: Mutex<Option<Cached<u32>>> = Mutex::new(None);

		set_map_cache(&map, "a", 1);
		set_optional_cache(&single, 2);
		assert_eq!(get_map_cache(&map, "a", ttl), Some(1));
		assert_eq!(get_optional_cache(&single, ttl), Some(2));

		tokio::time::advance(Duration::from_secs(11)).await;
		assert_eq!(get_map_cache(&map, "a", ttl), None);
		assert_eq!(get_optional_cache(&single, ttl), None);

		prune_map_cache(&map, ttl);
		prune_optional_cache(&single, ttl);
		assert!(map.lock().is_empty());
		assert!(single.lock().is_none());
	}
}
