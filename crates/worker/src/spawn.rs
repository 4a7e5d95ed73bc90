use std::future::Future;

use tokio::task::JoinHandle;

use crate::TaskClass;

/// Spawns an async task on the current runtime, tagged with its class and name.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime, like [`tokio::spawn`].
pub fn spawn<F>(class: TaskClass, name: &'static str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), task = name, "worker.spawn");
	tokio::spawn(fut)
}

/// Joins a task spawned with [`spawn`], logging abnormal exits instead of propagating them.
///
/// Returns `true` when the task ran to completion.
pub async fn join_logged(name: &'static str, handle: JoinHandle<()>) -> bool {
	match handle.await {
		Ok(()) => true,
		Err(err) if err.is_cancelled() => {
			tracing::debug!(task = name, "worker.join.cancelled");
			false
		}
		Err(err) => {
			tracing::error!(task = name, error = %err, "worker.join.panicked");
			false
		}
	}
}
