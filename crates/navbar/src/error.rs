use std::error::Error as StdError;

use thiserror::Error;

/// Errors surfaced by the navigation bar.
#[derive(Debug, Error)]
pub enum NavigationBarError {
	/// The item computation observed its cancellation token.
	#[error("navigation bar computation cancelled")]
	Cancelled,

	/// The item service failed.
	#[error("navigation bar item service failed: {0}")]
	Service(Box<dyn StdError + Send + Sync>),

	/// Options could not be parsed.
	#[error("invalid navigation bar options: {0}")]
	Config(#[from] toml::de::Error),
}

impl NavigationBarError {
	pub fn service(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
		Self::Service(err.into())
	}
}

pub type Result<T> = std::result::Result<T, NavigationBarError>;
