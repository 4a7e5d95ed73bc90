//! Completion accounting for asynchronously enqueued work.
//!
//! Every unit of deferred work holds an [`AsyncToken`] from the moment it is
//! enqueued until it has been fully accounted for. Dropping the token is its
//! disposal, so a token can never be completed twice. [`AsyncListener::wait_idle`]
//! resolves once no tokens are outstanding, which is how hosts and tests detect
//! that a pipeline has drained.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
struct ListenerInner {
	outstanding: AtomicUsize,
	begun: AtomicU64,
	completed: AtomicU64,
	idle: Notify,
}

/// Issues [`AsyncToken`]s and observes their completion.
#[derive(Clone, Default)]
pub struct AsyncListener {
	inner: Arc<ListenerInner>,
}

impl fmt::Debug for AsyncListener {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AsyncListener")
			.field("outstanding", &self.outstanding())
			.field("completed", &self.completed())
			.finish()
	}
}

impl AsyncListener {
	/// Creates a listener with no outstanding work.
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts tracking one unit of work.
	pub fn begin(&self, name: &'static str) -> AsyncToken {
		self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
		self.inner.begun.fetch_add(1, Ordering::Relaxed);
		tracing::trace!(token = name, "worker.listener.begin");
		AsyncToken {
			inner: Arc::clone(&self.inner),
			name,
		}
	}

	/// Number of tokens issued and not yet dropped.
	pub fn outstanding(&self) -> usize {
		self.inner.outstanding.load(Ordering::Acquire)
	}

	/// Number of tokens issued so far.
	pub fn begun(&self) -> u64 {
		self.inner.begun.load(Ordering::Relaxed)
	}

	/// Number of tokens dropped so far.
	pub fn completed(&self) -> u64 {
		self.inner.completed.load(Ordering::Acquire)
	}

	/// Waits until no tokens are outstanding.
	pub async fn wait_idle(&self) {
		loop {
			// Created before the check so a concurrent final drop cannot be missed.
			let notified = self.inner.idle.notified();
			if self.outstanding() == 0 {
				return;
			}
			notified.await;
		}
	}
}

/// Handle for one unit of tracked work. Dropping it marks the work as accounted for.
#[must_use = "dropping the token immediately marks the work as complete"]
pub struct AsyncToken {
	inner: Arc<ListenerInner>,
	name: &'static str,
}

impl AsyncToken {
	/// Label given when the token was issued.
	pub fn name(&self) -> &'static str {
		self.name
	}
}

impl fmt::Debug for AsyncToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("AsyncToken").field(&self.name).finish()
	}
}

impl Drop for AsyncToken {
	fn drop(&mut self) {
		self.inner.completed.fetch_add(1, Ordering::AcqRel);
		if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.inner.idle.notify_waiters();
		}
	}
}
