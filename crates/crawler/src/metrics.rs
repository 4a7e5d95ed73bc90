//! Crawler counters.
//!
//! Relaxed atomics: exact counts under contention are not important, trends are.
//! [`CrawlerMetrics::log_summary`] emits the counters as one tracing event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one work coordinator.
#[derive(Debug, Default)]
pub struct CrawlerMetrics {
	/// Workspace change events received.
	pub workspace_events: AtomicU64,
	/// Work items that created a new queue entry.
	pub enqueued: AtomicU64,
	/// Work items merged into an existing entry.
	pub coalesced: AtomicU64,
	pub documents_processed: AtomicU64,
	pub projects_processed: AtomicU64,
	/// Low-priority project passes consumed without calling analyzers.
	pub project_passes_skipped: AtomicU64,
	pub retries: AtomicU64,
	pub cancellations: AtomicU64,
	/// Documents gone by the time their item was dequeued.
	pub documents_not_found: AtomicU64,
	/// Projects gone by the time their item was dequeued.
	pub projects_not_found: AtomicU64,
	pub reanalyze_requests: AtomicU64,
	/// Work items produced by semantic fan-out.
	pub fanout_items: AtomicU64,
	/// Items waiting in either priority queue. A gauge, not a counter.
	pub pending_items: AtomicU64,
}

/// Point-in-time copy of [`CrawlerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
	pub workspace_events: u64,
	pub enqueued: u64,
	pub coalesced: u64,
	pub documents_processed: u64,
	pub projects_processed: u64,
	pub project_passes_skipped: u64,
	pub retries: u64,
	pub cancellations: u64,
	pub documents_not_found: u64,
	pub projects_not_found: u64,
	pub reanalyze_requests: u64,
	pub fanout_items: u64,
	pub pending_items: u64,
}

impl CrawlerMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn inc(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn sub(gauge: &AtomicU64, n: u64) {
		gauge.fetch_sub(n, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
		MetricsSnapshot {
			workspace_events: load(&self.workspace_events),
			enqueued: load(&self.enqueued),
			coalesced: load(&self.coalesced),
			documents_processed: load(&self.documents_processed),
			projects_processed: load(&self.projects_processed),
			project_passes_skipped: load(&self.project_passes_skipped),
			retries: load(&self.retries),
			cancellations: load(&self.cancellations),
			documents_not_found: load(&self.documents_not_found),
			projects_not_found: load(&self.projects_not_found),
			reanalyze_requests: load(&self.reanalyze_requests),
			fanout_items: load(&self.fanout_items),
			pending_items: load(&self.pending_items),
		}
	}

	pub fn log_summary(&self) {
		let s = self.snapshot();
		tracing::debug!(
			events = s.workspace_events,
			enqueued = s.enqueued,
			coalesced = s.coalesced,
			documents = s.documents_processed,
			projects = s.projects_processed,
			skipped = s.project_passes_skipped,
			retries = s.retries,
			cancellations = s.cancellations,
			documents_not_found = s.documents_not_found,
			projects_not_found = s.projects_not_found,
			reanalyze = s.reanalyze_requests,
			fanout = s.fanout_items,
			pending = s.pending_items,
			"crawler.metrics"
		);
	}
}
