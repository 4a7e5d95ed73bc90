//! Error types for the crawler and its analyzers.

use std::error::Error as StdError;

use thiserror::Error;

/// Error returned by an [`IncrementalAnalyzer`](crate::IncrementalAnalyzer) call.
#[derive(Debug, Error)]
pub enum AnalyzerError {
	/// The call observed its cancellation token.
	#[error("analyzer operation cancelled")]
	Cancelled,

	/// Several parallel sub-operations failed together.
	#[error("{} analyzer operations failed", .0.len())]
	Aggregate(Vec<AnalyzerError>),

	/// Any other failure. The crawler treats this as fatal.
	#[error("analyzer fault: {0}")]
	Fault(Box<dyn StdError + Send + Sync>),
}

impl AnalyzerError {
	/// Wraps an arbitrary error as a fault.
	pub fn fault(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
		Self::Fault(err.into())
	}

	/// Plain cancellation, or an aggregate whose every inner error is a cancellation.
	pub fn is_cancellation(&self) -> bool {
		match self {
			Self::Cancelled => true,
			Self::Aggregate(inner) => !inner.is_empty() && inner.iter().all(Self::is_cancellation),
			Self::Fault(_) => false,
		}
	}
}

/// Result of one analyzer call.
pub type AnalyzerResult = std::result::Result<(), AnalyzerError>;

/// Errors surfaced by the crawler itself.
#[derive(Debug, Error)]
pub enum CrawlerError {
	/// The owning coordinator is shutting down.
	#[error("solution crawler is shutting down")]
	Shutdown,

	/// Work was cancelled by a token the crawler issued.
	#[error("work item cancelled")]
	Cancelled,

	/// A non-cancellation error escaped an analyzer. The processor stops after this.
	#[error("unreachable: analyzer {analyzer} faulted")]
	AnalyzerFault {
		analyzer: String,
		#[source]
		source: AnalyzerError,
	},

	/// Options could not be parsed.
	#[error("invalid crawler options: {0}")]
	Config(#[from] toml::de::Error),
}

impl CrawlerError {
	/// Cancellation and shutdown are expected outcomes, not faults.
	pub fn is_cancellation(&self) -> bool {
		matches!(self, Self::Shutdown | Self::Cancelled)
	}
}

/// Result type for crawler operations.
pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Sink for faults the crawler cannot recover from.
pub trait FatalErrorReporter: Send + Sync {
	fn report(&self, analyzer: &str, error: &AnalyzerError);
}

/// Default reporter: logs the fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFatalErrorReporter;

impl FatalErrorReporter for TracingFatalErrorReporter {
	fn report(&self, analyzer: &str, error: &AnalyzerError) {
		tracing::error!(analyzer, error = %error, "crawler.analyzer.fatal");
	}
}
