//! Crawler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Tunables for one work coordinator.
///
/// Deserializes from TOML with kebab-case keys; every key is optional.
///
/// ```toml
/// enabled = true
/// all-files-backoff-ms = 1500
/// entire-project-backoff-ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerOptions {
	/// When false, registration creates no coordinator.
	pub enabled: bool,
	/// Normal-priority backoff while an active, visible, or high-priority document is pending.
	pub active_file_backoff_ms: u64,
	/// Normal-priority backoff.
	pub all_files_backoff_ms: u64,
	/// Low-priority (whole project) backoff.
	pub entire_project_backoff_ms: u64,
	pub semantic_change_backoff_ms: u64,
	pub project_propagation_backoff_ms: u64,
	/// Upper bound on a blocking shutdown.
	pub shutdown_timeout_ms: u64,
}

impl Default for CrawlerOptions {
	fn default() -> Self {
		Self {
			enabled: true,
			active_file_backoff_ms: 100,
			all_files_backoff_ms: 1500,
			entire_project_backoff_ms: 5000,
			semantic_change_backoff_ms: 100,
			project_propagation_backoff_ms: 500,
			shutdown_timeout_ms: 5000,
		}
	}
}

impl CrawlerOptions {
	/// Parses options from TOML text.
	pub fn from_toml_str(text: &str) -> Result<Self> {
		Ok(toml::from_str(text)?)
	}

	/// Sets every processor backoff to `backoff`. Handy for tests and headless hosts.
	#[must_use]
	pub fn with_uniform_backoff(mut self, backoff: Duration) -> Self {
		let ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
		self.active_file_backoff_ms = ms;
		self.all_files_backoff_ms = ms;
		self.entire_project_backoff_ms = ms;
		self.semantic_change_backoff_ms = ms;
		self.project_propagation_backoff_ms = ms;
		self
	}

	pub fn active_file_backoff(&self) -> Duration {
		Duration::from_millis(self.active_file_backoff_ms)
	}

	pub fn all_files_backoff(&self) -> Duration {
		Duration::from_millis(self.all_files_backoff_ms)
	}

	pub fn entire_project_backoff(&self) -> Duration {
		Duration::from_millis(self.entire_project_backoff_ms)
	}

	pub fn semantic_change_backoff(&self) -> Duration {
		Duration::from_millis(self.semantic_change_backoff_ms)
	}

	pub fn project_propagation_backoff(&self) -> Duration {
		Duration::from_millis(self.project_propagation_backoff_ms)
	}

	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_millis(self.shutdown_timeout_ms)
	}
}
