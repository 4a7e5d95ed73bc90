use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use trawl_worker::AsyncListener;

use crate::global_operation::GlobalOperationService;
use crate::metrics::CrawlerMetrics;
use crate::options::CrawlerOptions;
use crate::progress::ProgressReporter;
use crate::registration::Registration;
use crate::services::HostServices;
use crate::workspace::{Solution, TextDocument};

/// State shared by one coordinator and all of its processors.
pub(crate) struct CrawlerContext {
	pub(crate) registration: Arc<Registration>,
	pub(crate) options: CrawlerOptions,
	pub(crate) listener: AsyncListener,
	pub(crate) metrics: Arc<CrawlerMetrics>,
	/// Parent of every run token a queue mints.
	pub(crate) shutdown: CancellationToken,
	pub(crate) global_ops: GlobalOperationService,
}

impl CrawlerContext {
	pub(crate) fn services(&self) -> &HostServices {
		self.registration.services()
	}

	pub(crate) fn progress(&self) -> &ProgressReporter {
		self.registration.progress()
	}

	/// Snapshot to analyze against, read at the moment work runs.
	pub(crate) fn current_solution(&self) -> Arc<Solution> {
		self.registration.current_solution()
	}

	/// Publishes how many items wait in the priority queues.
	pub(crate) fn report_pending_item_count(&self) {
		let pending = self.metrics.pending_items.load(Ordering::Relaxed);
		self.progress().update_pending_item_count(usize::try_from(pending).unwrap_or(usize::MAX));
	}

	pub(crate) fn is_shutting_down(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	/// Asks the language's priority service about `document`. Non-source
	/// documents and languages without the service are normal priority.
	pub(crate) async fn is_low_priority(&self, language: &str, document: &TextDocument) -> bool {
		if !document.is_source() {
			return false;
		}
		let Some(priority) = self.services().language(language).and_then(|l| l.priority.clone()) else {
			return false;
		};
		priority.is_low_priority(document, &self.shutdown).await
	}
}
