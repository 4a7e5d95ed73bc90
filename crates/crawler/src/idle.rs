//! Debounced consumer loops.
//!
//! Every processor runs the same loop: wait for a new-work signal, wait until
//! no global operation is running and the processor has been quiet for its
//! backoff, then execute one unit. Each enqueue moves the quiet point forward,
//! so a burst of edits keeps pushing execution out until it settles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use trawl_worker::TaskClass;

use crate::Result;
use crate::global_operation::wait_until_resumed;

/// Backoff bookkeeping shared by a processor and its producers.
#[derive(Debug)]
pub(crate) struct IdleState {
	last_access: Mutex<Instant>,
	backoff: Mutex<Duration>,
}

impl IdleState {
	pub(crate) fn new(backoff: Duration) -> Self {
		Self {
			last_access: Mutex::new(Instant::now()),
			backoff: Mutex::new(backoff),
		}
	}

	/// Records activity, restarting the quiet period.
	pub(crate) fn touch(&self) {
		*self.last_access.lock() = Instant::now();
	}

	pub(crate) fn set_backoff(&self, backoff: Duration) {
		*self.backoff.lock() = backoff;
	}

	fn remaining(&self) -> Duration {
		let backoff = *self.backoff.lock();
		let elapsed = self.last_access.lock().elapsed();
		backoff.saturating_sub(elapsed)
	}

	/// Waits until no global operation runs and the backoff has elapsed since
	/// the last [`touch`](Self::touch). Returns `false` on shutdown.
	pub(crate) async fn wait_for_idle(&self, shutdown: &CancellationToken, paused: &mut watch::Receiver<usize>) -> bool {
		loop {
			if *paused.borrow() > 0 {
				tracing::trace!("crawler.idle.paused");
				tokio::select! {
					biased;
					_ = shutdown.cancelled() => return false,
					resumed = wait_until_resumed(paused) => if !resumed { return false },
				}
				continue;
			}

			let remaining = self.remaining();
			if remaining.is_zero() {
				return !shutdown.is_cancelled();
			}
			tokio::select! {
				biased;
				_ = shutdown.cancelled() => return false,
				_ = tokio::time::sleep(remaining) => {}
			}
		}
	}
}

/// One debounced consumer.
#[async_trait]
pub(crate) trait IdleProcessor: Send + Sync + 'static {
	fn name(&self) -> &'static str;

	fn idle(&self) -> &IdleState;

	/// Resolves on the next new-work signal; `false` once the source is closed.
	async fn wait_for_work(&self) -> bool;

	/// Processes one unit. Cancellation errors are expected; any other error stops the loop.
	async fn execute(&self) -> Result<()>;
}

/// Spawns the consumer loop for `processor`.
pub(crate) fn spawn_idle_loop<P: IdleProcessor>(
	processor: Arc<P>,
	class: TaskClass,
	shutdown: CancellationToken,
	mut paused: watch::Receiver<usize>,
) -> JoinHandle<()> {
	let name = processor.name();
	trawl_worker::spawn(class, name, async move {
		loop {
			let woke = tokio::select! {
				biased;
				_ = shutdown.cancelled() => false,
				woke = processor.wait_for_work() => woke,
			};
			if !woke || !processor.idle().wait_for_idle(&shutdown, &mut paused).await {
				break;
			}

			match processor.execute().await {
				Ok(()) => {}
				Err(err) if err.is_cancellation() => {
					if shutdown.is_cancelled() {
						break;
					}
				}
				Err(err) => {
					tracing::error!(processor = name, error = %err, "crawler.idle.fault");
					break;
				}
			}
		}
		tracing::debug!(processor = name, "crawler.idle.stopped");
	})
}
