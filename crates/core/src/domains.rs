//! Allow-list of lockdown query domains.
//!
//! Queries against a domain outside this list are still sent; the list only
//! decides whether a warning is emitted first.

use std::collections::BTreeSet;

/// Domains lockdown is known to answer.
pub const STANDARD_DOMAINS: &[&str] = &[
	"com.apple.disk_usage",
	"com.apple.disk_usage.factory",
	"com.apple.mobile.battery",
	"com.apple.iqagent",
	"com.apple.purplebuddy",
	"com.apple.PurpleBuddy",
	"com.apple.mobile.chaperone",
	"com.apple.mobile.third_party_termination",
	"com.apple.mobile.lockdownd",
	"com.apple.mobile.lockdown_cache",
	"com.apple.xcode.developerdomain",
	"com.apple.international",
	"com.apple.mobile.data_sync",
	"com.apple.mobile.tethered_sync",
	"com.apple.mobile.mobile_application_usage",
	"com.apple.mobile.backup",
	"com.apple.mobile.nikita",
	"com.apple.mobile.restriction",
	"com.apple.mobile.user_preferences",
	"com.apple.mobile.sync_data_class",
	"com.apple.mobile.software_behavior",
	"com.apple.mobile.iTunes.SQLMusicLibraryPostProcessCommands",
	"com.apple.mobile.iTunes.accessories",
	"com.apple.mobile.internal",
	"com.apple.mobile.wireless_lockdown",
	"com.apple.fairplay",
	"com.apple.iTunes",
	"com.apple.mobile.iTunes.store",
	"com.apple.mobile.iTunes",
];

/// Immutable set of recognised domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownDomainSet {
	entries: BTreeSet<String>,
}

impl KnownDomainSet {
	/// The built-in lockdown domains.
	pub fn standard() -> Self {
		STANDARD_DOMAINS.iter().copied().collect()
	}

	/// Returns a new set with `domain` added.
	pub fn with(mut self, domain: impl Into<String>) -> Self {
		self.entries.insert(domain.into());
		self
	}

	/// Whether `domain` is recognised.
	///
	/// A domain counts as known when it contains a listed entry, so
	/// sub-domains such as `com.apple.mobile.battery.details` match too.
	pub fn contains(&self, domain: &str) -> bool {
		self.entries.iter().any(|known| domain.contains(known.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(String::as_str)
	}
}

impl Default for KnownDomainSet {
	fn default() -> Self {
		Self::standard()
	}
}

impl<S: Into<String>> FromIterator<S> for KnownDomainSet {
	fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
		Self {
			entries: iter.into_iter().map(Into::into).collect(),
		}
	}
}
