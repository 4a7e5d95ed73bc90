//! Reference-counted busy/idle reporting.
//!
//! Both priority queues report into one reporter. Each queue calls
//! [`ProgressReporter::start`] when a key enters it and
//! [`ProgressReporter::stop`] when that key is done, so the reporter is busy
//! while any key is pending anywhere. Only the 0 -> 1 and 1 -> 0 transitions
//! are published.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
	Started,
	Paused,
	Evaluating,
	PendingItemCountUpdated,
	Stopped,
}

/// One progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressData {
	pub status: ProgressStatus,
	pub pending_item_count: Option<usize>,
}

impl ProgressData {
	fn status(status: ProgressStatus) -> Self {
		Self {
			status,
			pending_item_count: None,
		}
	}
}

struct ReporterInner {
	count: Mutex<usize>,
	events: broadcast::Sender<ProgressData>,
}

/// Shared busy counter with a broadcast event stream.
#[derive(Clone)]
pub struct ProgressReporter {
	inner: Arc<ReporterInner>,
}

impl Default for ProgressReporter {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for ProgressReporter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProgressReporter").field("count", &*self.inner.count.lock()).finish()
	}
}

impl ProgressReporter {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
		Self {
			inner: Arc::new(ReporterInner {
				count: Mutex::new(0),
				events,
			}),
		}
	}

	/// Subscribes to future progress events.
	pub fn subscribe(&self) -> broadcast::Receiver<ProgressData> {
		self.inner.events.subscribe()
	}

	pub fn in_progress(&self) -> bool {
		*self.inner.count.lock() > 0
	}

	pub fn start(&self) {
		let mut count = self.inner.count.lock();
		*count += 1;
		if *count == 1 {
			self.publish(ProgressData::status(ProgressStatus::Started));
		}
	}

	pub fn stop(&self) {
		let mut count = self.inner.count.lock();
		match *count {
			0 => tracing::warn!("crawler.progress.unbalanced_stop"),
			1 => {
				*count = 0;
				self.publish(ProgressData::status(ProgressStatus::Stopped));
			}
			_ => *count -= 1,
		}
	}

	pub fn pause(&self) {
		self.publish_if_busy(ProgressData::status(ProgressStatus::Paused));
	}

	pub fn evaluate(&self) {
		self.publish_if_busy(ProgressData::status(ProgressStatus::Evaluating));
	}

	pub fn update_pending_item_count(&self, pending: usize) {
		self.publish_if_busy(ProgressData {
			status: ProgressStatus::PendingItemCountUpdated,
			pending_item_count: Some(pending),
		});
	}

	fn publish_if_busy(&self, data: ProgressData) {
		let count = self.inner.count.lock();
		if *count > 0 {
			self.publish(data);
		}
	}

	fn publish(&self, data: ProgressData) {
		tracing::trace!(status = ?data.status, pending = ?data.pending_item_count, "crawler.progress");
		// No receivers is fine.
		let _ = self.inner.events.send(data);
	}
}
