//! Navigation bar configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Debounce delays for the two controller queues.
///
/// ```toml
/// model-delay-ms = 250
/// selection-delay-ms = 50
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NavigationBarOptions {
	/// Delay between a text change and recomputing the item list.
	pub model_delay_ms: u64,
	/// Delay between a caret move or model update and recomputing the selection.
	pub selection_delay_ms: u64,
}

impl Default for NavigationBarOptions {
	fn default() -> Self {
		Self {
			model_delay_ms: 250,
			selection_delay_ms: 50,
		}
	}
}

impl NavigationBarOptions {
	pub fn from_toml_str(text: &str) -> Result<Self> {
		Ok(toml::from_str(text)?)
	}

	pub fn model_delay(&self) -> Duration {
		Duration::from_millis(self.model_delay_ms)
	}

	pub fn selection_delay(&self) -> Duration {
		Duration::from_millis(self.selection_delay_ms)
	}
}
