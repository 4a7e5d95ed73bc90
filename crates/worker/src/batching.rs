//! Debounced batch consumer.
//!
//! [`BatchingWorkQueue`] collects items and hands them to a processor in
//! batches, at most one batch at a time. A batch starts `delay` after the first
//! item that arrived while the consumer was idle, so bursts collapse into one
//! call. Items added while a batch runs go into the next batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::listener::{AsyncListener, AsyncToken};
use crate::{TaskClass, join_logged, spawn};

type BatchFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type BatchFn<T> = dyn Fn(Vec<T>, CancellationToken) -> BatchFuture + Send + Sync;

struct BatchState<T> {
	pending: Vec<T>,
	tokens: Vec<AsyncToken>,
	batch_cancel: CancellationToken,
}

struct BatchInner<T> {
	name: &'static str,
	state: Mutex<BatchState<T>>,
	wake: Notify,
	shutdown: CancellationToken,
	listener: Option<AsyncListener>,
}

/// Serial, debounced batch consumer running on its own task.
pub struct BatchingWorkQueue<T: Send + 'static> {
	inner: Arc<BatchInner<T>>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchingWorkQueue<T> {
	/// Creates the queue and spawns its consumer task.
	///
	/// `shutdown` stops the consumer; batch tokens handed to `process` are
	/// children of it.
	pub fn new<F, Fut>(
		name: &'static str,
		class: TaskClass,
		delay: Duration,
		shutdown: CancellationToken,
		listener: Option<AsyncListener>,
		process: F,
	) -> Self
	where
		F: Fn(Vec<T>, CancellationToken) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let inner = Arc::new(BatchInner {
			name,
			state: Mutex::new(BatchState {
				pending: Vec::new(),
				tokens: Vec::new(),
				batch_cancel: shutdown.child_token(),
			}),
			wake: Notify::new(),
			shutdown,
			listener,
		});
		let process: Arc<BatchFn<T>> = Arc::new(move |items, cancel| Box::pin(process(items, cancel)));
		let task = spawn(class, name, run_batches(Arc::clone(&inner), delay, process));
		Self {
			inner,
			task: Mutex::new(Some(task)),
		}
	}

	/// Adds one item to the next batch.
	pub fn add_work(&self, item: T) {
		let token = self.inner.listener.as_ref().map(|l| l.begin(self.inner.name));
		let mut state = self.inner.state.lock();
		state.pending.push(item);
		state.tokens.extend(token);
		drop(state);
		self.inner.wake.notify_one();
	}

	/// Adds one item and cancels the batch currently being processed, if any.
	pub fn add_work_cancelling(&self, item: T) {
		let token = self.inner.listener.as_ref().map(|l| l.begin(self.inner.name));
		let mut state = self.inner.state.lock();
		let stale = std::mem::replace(&mut state.batch_cancel, self.inner.shutdown.child_token());
		state.pending.push(item);
		state.tokens.extend(token);
		drop(state);
		stale.cancel();
		self.inner.wake.notify_one();
	}

	/// Returns the number of items waiting for the next batch.
	pub fn pending(&self) -> usize {
		self.inner.state.lock().pending.len()
	}

	/// Stops the consumer and waits for it to exit. Pending items are dropped.
	pub async fn shutdown(&self) {
		self.inner.shutdown.cancel();
		let task = self.task.lock().take();
		if let Some(task) = task {
			join_logged(self.inner.name, task).await;
		}
		let mut state = self.inner.state.lock();
		state.pending.clear();
		state.tokens.clear();
	}
}

async fn run_batches<T: Send + 'static>(inner: Arc<BatchInner<T>>, delay: Duration, process: Arc<BatchFn<T>>) {
	loop {
		tokio::select! {
			biased;
			_ = inner.shutdown.cancelled() => break,
			_ = inner.wake.notified() => {}
		}
		tokio::select! {
			biased;
			_ = inner.shutdown.cancelled() => break,
			_ = tokio::time::sleep(delay) => {}
		}

		let (items, tokens, cancel) = {
			let mut state = inner.state.lock();
			let items = std::mem::take(&mut state.pending);
			let tokens = std::mem::take(&mut state.tokens);
			(items, tokens, state.batch_cancel.clone())
		};
		if items.is_empty() {
			continue;
		}

		tracing::trace!(queue = inner.name, items = items.len(), "worker.batch.start");
		process(items, cancel).await;
		drop(tokens);
	}
	tracing::debug!(queue = inner.name, "worker.batch.stopped");
}
