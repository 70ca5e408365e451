#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::cache::PrunableCache;
use super::common::{Cached, get_map_cache, get_optional_cache, prune_map_cache, prune_optional_cache, set_map_cache, set_optional_cache};
use crate::twitch::{BadgeSets, HelixClient};

const BADGES_TTL: Duration = Duration::from_secs(3600);

/// Badge image ids used when Helix is not configured or unreachable.
const STATIC_BADGE_IDS: &[(&str, &[(&str, &str)])] = &[
	("staff", &[("1", "d97c37bd-a6f5-4c38-8f57-4e4bef88af34")]),
	("partner", &[("1", "d12a2e27-16f6-41d0-ab77-b780518f00a3")]),
	("premium", &[("1", "bbbe0db0-a598-423e-86d0-f9fb98ca1933")]),
	("broadcaster", &[("1", "5527c58c-fb7d-422d-b71b-f309dcb85cc1")]),
	("moderator", &[("1", "3267646d-33f0-4b17-b3df-f923a41db1d0")]),
	("vip", &[("1", "b817aba4-fad8-49e2-b88a-7cc744dfa6ec")]),
	("founder", &[("1", "511b78a9-ab37-472f-9569-457753bbe7d3")]),
	("artist-badge", &[("1", "4300a897-03dc-4e83-8c0e-c332fee7057f")]),
	("no_audio", &[("1", "aef2cd08-f29b-45a1-8c12-d44d7fd5e6f0")]),
	("no_video", &[("1", "199a0dba-58f3-494e-a7fc-1fa0a1001fb8")]),
	("subscriber", &[("0", "5d9f2208-5dd8-11e7-8513-2ff4adfae661")]),
	(
		"sub-gifter",
		&[
			("1", "f1d8486f-eb2e-4553-b44f-4d614617afc1"),
			("5", "3e638e02-b765-4070-81bd-a73d1ae34965"),
			("10", "bffca343-9d7d-49b4-a1ca-90af2c6a1639"),
			("25", "17e09e26-2528-4a04-9c7f-8518348324d1"),
			("50", "47308ed4-c979-4f3f-ad20-35a8ab76d85d"),
			("100", "5056c366-7299-4b3c-a15a-a18573650bfb"),
			("250", "df25dded-df81-408e-a2d3-40d48f0d529f"),
			("500", "f440decb-7468-4bf9-8666-98ba74f6eab5"),
			("1000", "b8c76744-c7e9-44be-90d0-08840a8f6e39"),
		],
	),
	(
		"bits",
		&[
			("1", "73b5c3fb-24f9-4a82-a852-2f475b59411c"),
			("100", "09d93036-e7ce-431c-9a9e-7044297133f2"),
			("1000", "0d85a29e-79ad-4c63-a285-3acd2c66f2ba"),
			("5000", "57cd97fc-3e9e-4c6d-9d41-60147137234e"),
			("10000", "68af213b-a771-4124-b6e3-9bb6d98aa732"),
			("25000", "64ca5920-c663-4bd8-bfb1-751b4caea2dd"),
			("50000", "62310ba7-9916-4235-9eba-40110d67f85d"),
			("75000", "ce491fa4-b24f-4f3b-b6ff-44b080202792"),
			("100000", "96f0540f-aa63-49e1-a8b3-259ece3bd098"),
			("200000", "4a0b90c4-e4ef-407f-84fe-36b14aebdbb6"),
			("300000", "ac13372d-2e94-41d1-ae11-ecd677f69bb6"),
			("400000", "a8f393af-76e6-4aa2-9dd0-7dcc1c34f036"),
			("500000", "f6932b57-6a6e-4062-a770-dfbd9f4302e5"),
			("600000", "4d908059-f91c-4aef-9acb-634434f4c32e"),
			("700000", "a1d2a824-f216-4b9f-9642-3de8ed370957"),
			("800000", "5ec2ee3e-5633-4c2a-8e77-77473fe409e6"),
			("900000", "088c58c6-7c38-45ba-8f73-63ef24189b84"),
			("1000000", "494d1c8e-c3b2-4d88-8528-baff57c9bd3f"),
		],
	),
];

static STATIC_BADGES: LazyLock<Arc<BadgeSets>> = LazyLock::new(|| {
	let sets: BadgeSets = STATIC_BADGE_IDS
		.iter()
		.map(|(name, versions)| {
			let versions: BTreeMap<String, String> =
				versions.iter().map(|(v, id)| (v.to_string(), id.to_string())).collect();
			(name.to_string(), versions)
		})
		.collect();
	Arc::new(sets)
});

fn static_badge_url(image_id: &str) -> String {
	format!("https://static-cdn.jtvnw.net/badges/v1/{image_id}/1")
}

/// Versions sorted numerically; non-numeric ones are ignored.
fn numeric_versions(set: &BTreeMap<String, String>) -> Vec<(u64, &String)> {
	let mut out: Vec<(u64, &String)> = set
		.iter()
		.filter_map(|(v, url)| v.parse::<u64>().ok().map(|n| (n, url)))
		.collect();
	out.sort_by_key(|(n, _)| *n);
	out
}

/// Resolve a badge image from already-loaded sets.
///
/// Subscriber badges look at the channel set first (exact version, then the
/// largest version not above the requested one). Otherwise the global set is
/// used: exact version, the lowest subscriber version, then `1` or `0`.
/// Entries that are not URLs are static image ids.
pub fn resolve_in(global: &BadgeSets, channel: Option<&BadgeSets>, name: &str, version: &str) -> Option<String> {
	if name == "subscriber"
		&& let Some(set) = channel.and_then(|c| c.get(name))
	{
		let exact = set.get(version);
		let below = || {
			let requested: u64 = version.parse().ok()?;
			numeric_versions(set)
				.into_iter()
				.rev()
				.find(|(n, _)| *n <= requested)
				.map(|(_, url)| url)
		};
		if let Some(url) = exact.or_else(below)
			&& url.starts_with("http")
		{
			return Some(url.clone());
		}
	}

	let set = global.get(name)?;
	let mut found = set.get(version);
	if found.is_none() && name == "subscriber" {
		found = numeric_versions(set).first().map(|(_, url)| *url);
	}
	let found = found.or_else(|| set.get("1")).or_else(|| set.get("0"))?;

	if found.starts_with("http") {
		Some(found.clone())
	} else {
		Some(static_badge_url(found))
	}
}

/// Badge image resolver backed by Helix with a static fallback.
pub struct BadgeResolver {
	helix: Option<HelixClient>,
	global: Mutex<Option<Cached<Arc<BadgeSets>>>>,
	channels: Mutex<HashMap<String, Cached<Arc<BadgeSets>>>>,
}

impl BadgeResolver {
	pub fn new(helix: Option<HelixClient>) -> Self {
		Self {
			helix,
			global: Mutex::new(None),
			channels: Mutex::new(HashMap::new()),
		}
	}

	/// Global badge sets; the static table when Helix is unavailable.
	pub async fn global_sets(&self) -> Arc<BadgeSets> {
		if let Some(sets) = get_optional_cache(&self.global, BADGES_TTL) {
			return sets;
		}

		let Some(helix) = &self.helix else {
			return STATIC_BADGES.clone();
		};

		match helix.global_badges().await {
			Ok(sets) => {
				let sets = Arc::new(sets);
				info!(set_count = sets.len(), "twitch global badges loaded");
				set_optional_cache(&self.global, sets.clone());
				sets
			}
			Err(e) => {
				warn!(error = %e, "twitch global badges unavailable; using static fallback");
				STATIC_BADGES.clone()
			}
		}
	}

	/// Channel badge sets for a broadcaster login.
	pub async fn channel_sets(&self, login: &str) -> anyhow::Result<Arc<BadgeSets>> {
		let key = login.to_ascii_lowercase();
		if let Some(sets) = get_map_cache(&self.channels, &key, BADGES_TTL) {
			return Ok(sets);
		}

		let helix = self
			.helix
			.as_ref()
			.ok_or_else(|| anyhow!("TWITCH_CLIENT_ID and TWITCH_CLIENT_SECRET must be set"))?;

		let broadcaster_id = helix
			.user_id_for_login(&key)
			.await?
			.ok_or_else(|| anyhow!("broadcaster not found: {key}"))?;

		let sets = Arc::new(helix.channel_badges(&broadcaster_id).await?);
		info!(channel = %key, set_count = sets.len(), "twitch channel badges loaded");
		set_map_cache(&self.channels, &key, sets.clone());
		Ok(sets)
	}

	/// Warm the global and channel caches.
	pub async fn preload_channel(&self, login: &str) -> anyhow::Result<()> {
		self.global_sets().await;
		self.channel_sets(login).await.map(|_| ())
	}

	pub async fn resolve_badge_url(&self, name: &str, version: &str, channel: Option<&str>) -> Option<String> {
		let global = self.global_sets().await;
		let channel_sets = match channel {
			Some(login) if name == "subscriber" => match self.channel_sets(login).await {
				Ok(sets) => Some(sets),
				Err(e) => {
					warn!(channel = login, error = %e, "channel badges unavailable");
					None
				}
			},
			_ => None,
		};
		resolve_in(&global, channel_sets.as_deref(), name, version)
	}
}

impl PrunableCache for BadgeResolver {
	fn prune(&self) {
		prune_optional_cache(&self.global, BADGES_TTL);
		prune_map_cache(&self.channels, BADGES_TTL);
	}
}
