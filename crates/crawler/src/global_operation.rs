//! Global operations: host-signalled periods (bulk rebuilds, branch switches)
//! during which background analysis pauses.

use std::sync::Arc;

use tokio::sync::watch;

/// Counts running global operations and publishes the count.
#[derive(Debug, Clone)]
pub struct GlobalOperationService {
	active: Arc<watch::Sender<usize>>,
}

impl Default for GlobalOperationService {
	fn default() -> Self {
		Self::new()
	}
}

impl GlobalOperationService {
	pub fn new() -> Self {
		let (active, _) = watch::channel(0);
		Self { active: Arc::new(active) }
	}

	/// Starts a global operation. Analysis stays paused until every returned
	/// registration is dropped.
	pub fn start(&self, reason: &str) -> GlobalOperationRegistration {
		let mut now = 0;
		self.active.send_modify(|n| {
			*n += 1;
			now = *n;
		});
		tracing::debug!(reason, active = now, "crawler.global_operation.start");
		GlobalOperationRegistration {
			active: Arc::clone(&self.active),
			reason: reason.to_owned(),
		}
	}

	pub fn is_running(&self) -> bool {
		*self.active.borrow() > 0
	}

	/// Receiver of the running-operation count.
	pub fn subscribe(&self) -> watch::Receiver<usize> {
		self.active.subscribe()
	}
}

/// Scope of one global operation; dropping it ends the operation.
#[must_use = "dropping the registration ends the global operation"]
#[derive(Debug)]
pub struct GlobalOperationRegistration {
	active: Arc<watch::Sender<usize>>,
	reason: String,
}

impl Drop for GlobalOperationRegistration {
	fn drop(&mut self) {
		let mut now = 0;
		self.active.send_modify(|n| {
			*n = n.saturating_sub(1);
			now = *n;
		});
		tracing::debug!(reason = %self.reason, active = now, "crawler.global_operation.stop");
	}
}

/// Waits until no global operation is running. Returns `false` if the service is gone.
pub(crate) async fn wait_until_resumed(rx: &mut watch::Receiver<usize>) -> bool {
	rx.wait_for(|n| *n == 0).await.is_ok()
}
