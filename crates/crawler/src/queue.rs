//! Keyed, coalescing work queues.
//!
//! An [`AsyncWorkItemQueue`] maps each key to the latest [`WorkItem`] for it.
//! Adding a key that is already pending merges into the pending item instead
//! of queueing a second one. Taking an item mints a cancellation token for the
//! run, recorded against the key until [`AsyncWorkItemQueue::mark_work_item_done_for`].
//!
//! The monitor is a `parking_lot` mutex. It is never held across an await,
//! and tokens are always cancelled after the guard is released.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use trawl_worker::AsyncListener;

use crate::metrics::CrawlerMetrics;
use crate::progress::ProgressReporter;
use crate::work_item::{WorkItem, WorkItemKey};
use crate::workspace::{DocumentId, ProjectId};

/// Storage layout of a queue.
pub(crate) trait WorkItemStore: Default + Send + 'static {
	fn get_mut(&mut self, key: WorkItemKey) -> Option<&mut WorkItem>;
	fn insert(&mut self, item: WorkItem);
	fn remove(&mut self, key: WorkItemKey) -> Option<WorkItem>;
	/// Removes the best candidate, favouring `preferred` project.
	fn take_any(&mut self, preferred: Option<ProjectId>) -> Option<WorkItem>;
	fn len(&self) -> usize;
	fn drain(&mut self) -> Vec<WorkItem>;
	fn contains(&self, key: WorkItemKey) -> bool;
}

/// Document-keyed layout: project, then document.
#[derive(Default)]
pub(crate) struct DocumentStore {
	projects: IndexMap<ProjectId, IndexMap<DocumentId, WorkItem>>,
}

impl WorkItemStore for DocumentStore {
	fn get_mut(&mut self, key: WorkItemKey) -> Option<&mut WorkItem> {
		let WorkItemKey::Document(id) = key else { return None };
		self.projects.get_mut(&id.project_id())?.get_mut(&id)
	}

	fn insert(&mut self, item: WorkItem) {
		let Some(id) = item.document_id() else {
			debug_assert!(false, "project item in a document queue");
			return;
		};
		self.projects.entry(id.project_id()).or_default().insert(id, item);
	}

	fn remove(&mut self, key: WorkItemKey) -> Option<WorkItem> {
		let WorkItemKey::Document(id) = key else { return None };
		let documents = self.projects.get_mut(&id.project_id())?;
		let item = documents.shift_remove(&id);
		if documents.is_empty() {
			self.projects.shift_remove(&id.project_id());
		}
		item
	}

	fn take_any(&mut self, preferred: Option<ProjectId>) -> Option<WorkItem> {
		let project = preferred
			.filter(|p| self.projects.contains_key(p))
			.or_else(|| self.projects.keys().next().copied())?;
		let documents = self.projects.get(&project)?;
		let id = documents
			.iter()
			.find(|(_, item)| !item.is_low_priority())
			.or_else(|| documents.first())
			.map(|(id, _)| *id)?;
		self.remove(WorkItemKey::Document(id))
	}

	fn len(&self) -> usize {
		self.projects.values().map(IndexMap::len).sum()
	}

	fn drain(&mut self) -> Vec<WorkItem> {
		self.projects.drain(..).flat_map(|(_, docs)| docs.into_values()).collect()
	}

	fn contains(&self, key: WorkItemKey) -> bool {
		match key {
			WorkItemKey::Document(id) => self.projects.get(&id.project_id()).is_some_and(|docs| docs.contains_key(&id)),
			WorkItemKey::Project(_) => false,
		}
	}
}

/// Project-keyed layout.
#[derive(Default)]
pub(crate) struct ProjectStore {
	projects: IndexMap<ProjectId, WorkItem>,
}

impl WorkItemStore for ProjectStore {
	fn get_mut(&mut self, key: WorkItemKey) -> Option<&mut WorkItem> {
		let WorkItemKey::Project(id) = key else { return None };
		self.projects.get_mut(&id)
	}

	fn insert(&mut self, item: WorkItem) {
		debug_assert!(item.document_id().is_none(), "document item in a project queue");
		self.projects.insert(item.project_id(), item);
	}

	fn remove(&mut self, key: WorkItemKey) -> Option<WorkItem> {
		let WorkItemKey::Project(id) = key else { return None };
		self.projects.shift_remove(&id)
	}

	fn take_any(&mut self, preferred: Option<ProjectId>) -> Option<WorkItem> {
		let id = preferred
			.filter(|p| self.projects.contains_key(p))
			.or_else(|| self.projects.keys().next().copied())?;
		self.projects.shift_remove(&id)
	}

	fn len(&self) -> usize {
		self.projects.len()
	}

	fn drain(&mut self) -> Vec<WorkItem> {
		self.projects.drain(..).map(|(_, item)| item).collect()
	}

	fn contains(&self, key: WorkItemKey) -> bool {
		matches!(key, WorkItemKey::Project(id) if self.projects.contains_key(&id))
	}
}

struct QueueState<S> {
	items: S,
	running: FxHashMap<WorkItemKey, CancellationToken>,
	disposed: bool,
}

/// Semaphore-gated map from key to latest work item.
pub(crate) struct AsyncWorkItemQueue<S: WorkItemStore> {
	name: &'static str,
	state: Mutex<QueueState<S>>,
	wake: Semaphore,
	progress: ProgressReporter,
	listener: AsyncListener,
	metrics: Arc<CrawlerMetrics>,
	shutdown: CancellationToken,
}

pub(crate) type DocumentQueue = AsyncWorkItemQueue<DocumentStore>;
pub(crate) type ProjectQueue = AsyncWorkItemQueue<ProjectStore>;

impl<S: WorkItemStore> AsyncWorkItemQueue<S> {
	pub(crate) fn new(
		name: &'static str,
		progress: ProgressReporter,
		listener: AsyncListener,
		metrics: Arc<CrawlerMetrics>,
		shutdown: CancellationToken,
	) -> Self {
		Self {
			name,
			state: Mutex::new(QueueState {
				items: S::default(),
				running: FxHashMap::default(),
				disposed: false,
			}),
			wake: Semaphore::new(0),
			progress,
			listener,
			metrics,
			shutdown,
		}
	}

	/// Inserts `item`, or merges it into the pending item for its key.
	///
	/// Returns `true` when the key was not pending.
	pub(crate) fn add_or_replace(&self, item: WorkItem) -> bool {
		let key = item.key();
		let mut state = self.state.lock();
		if state.disposed {
			return false;
		}

		if let Some(pending) = state.items.get_mut(key) {
			let stale = pending.absorb(item);
			drop(state);
			drop(stale);
			CrawlerMetrics::inc(&self.metrics.coalesced);
			tracing::trace!(queue = self.name, ?key, "crawler.queue.merge");
			return false;
		}

		state.items.insert(item);
		CrawlerMetrics::inc(&self.metrics.pending_items);
		self.progress.start();
		drop(state);
		self.wake.add_permits(1);
		CrawlerMetrics::inc(&self.metrics.enqueued);
		tracing::trace!(queue = self.name, ?key, "crawler.queue.add");
		true
	}

	/// Removes the item for `key` and records a fresh run token against it.
	///
	/// The returned item carries a new execution token; the enqueue token is
	/// dropped only after the new one exists.
	pub(crate) fn try_take(&self, key: WorkItemKey) -> Option<(WorkItem, CancellationToken)> {
		let mut state = self.state.lock();
		let item = state.items.remove(key)?;
		Some(self.start_run(&mut state, item))
	}

	/// Removes the best pending item, favouring `preferred` project and, within
	/// a project, normal-priority documents over low-priority ones.
	pub(crate) fn try_take_any_work(&self, preferred: Option<ProjectId>) -> Option<(WorkItem, CancellationToken)> {
		let mut state = self.state.lock();
		let item = state.items.take_any(preferred)?;
		Some(self.start_run(&mut state, item))
	}

	fn start_run(&self, state: &mut QueueState<S>, item: WorkItem) -> (WorkItem, CancellationToken) {
		let key = item.key();
		CrawlerMetrics::sub(&self.metrics.pending_items, 1);
		let cancel = self.shutdown.child_token();
		let previous = state.running.insert(key, cancel.clone());
		debug_assert!(previous.is_none(), "second live run token for {key:?}");
		let (item, stale) = item.with_token(self.listener.begin("crawler.execute"));
		drop(stale);
		(item, cancel)
	}

	/// Cancels every in-flight run and forgets the tokens.
	pub(crate) fn request_cancellation_on_running_tasks(&self) {
		let running: Vec<CancellationToken> = {
			let mut state = self.state.lock();
			state.running.drain().map(|(_, token)| token).collect()
		};
		if !running.is_empty() {
			tracing::debug!(queue = self.name, count = running.len(), "crawler.queue.cancel_running");
		}
		for token in running {
			token.cancel();
		}
	}

	/// Ends the run for `key` without cancelling its token.
	pub(crate) fn mark_work_item_done_for(&self, key: WorkItemKey) {
		let mut state = self.state.lock();
		state.running.remove(&key);
		self.progress.stop();
	}

	/// Cancels in-flight runs and drops every pending item.
	pub(crate) fn dispose(&self) {
		let (running, items) = {
			let mut state = self.state.lock();
			state.disposed = true;
			let running: Vec<CancellationToken> = state.running.values().cloned().collect();
			let items = state.items.drain();
			CrawlerMetrics::sub(&self.metrics.pending_items, items.len() as u64);
			for _ in &items {
				self.progress.stop();
			}
			(running, items)
		};
		for token in running {
			token.cancel();
		}
		// Dropping the items disposes their tokens.
		drop(items);
		self.wake.close();
	}

	pub(crate) fn has_any_work(&self) -> bool {
		self.state.lock().items.len() > 0
	}

	pub(crate) fn work_item_count(&self) -> usize {
		self.state.lock().items.len()
	}

	pub(crate) fn contains(&self, key: WorkItemKey) -> bool {
		self.state.lock().items.contains(key)
	}

	/// Waits for one new-key signal. Returns `false` once the queue is disposed.
	pub(crate) async fn wait_for_work(&self) -> bool {
		match self.wake.acquire().await {
			Ok(permit) => {
				permit.forget();
				true
			}
			Err(_) => false,
		}
	}
}
