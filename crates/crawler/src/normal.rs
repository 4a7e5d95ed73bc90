//! Normal-priority document processing.
//!
//! Documents the user is looking at go first: the active document, then
//! visible documents, then anything flagged high priority. Everything else is
//! taken from the general queue, favouring the project processed last.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::context::CrawlerContext;
use crate::error::CrawlerError;
use crate::idle::{IdleProcessor, IdleState};
use crate::processor::{AnalyzerCall, AnalyzerDispatcher};
use crate::queue::DocumentQueue;
use crate::reasons::InvocationReasons;
use crate::work_item::{WorkItem, WorkItemKey};
use crate::workspace::{DocumentId, ProjectId};
use crate::{CrawlerMetrics, Result};

pub(crate) struct NormalPriorityProcessor {
	ctx: Arc<CrawlerContext>,
	dispatcher: Arc<AnalyzerDispatcher>,
	queue: DocumentQueue,
	idle: IdleState,
	/// Flagged documents not yet processed.
	higher_priority: Mutex<IndexSet<DocumentId>>,
	/// Document being processed and whether it was flagged.
	current: Mutex<Option<(DocumentId, bool)>>,
	current_project: Mutex<Option<ProjectId>>,
	running: watch::Sender<bool>,
}

impl NormalPriorityProcessor {
	pub(crate) fn new(ctx: Arc<CrawlerContext>, dispatcher: Arc<AnalyzerDispatcher>) -> Self {
		let queue = DocumentQueue::new(
			"crawler.normal",
			ctx.progress().clone(),
			ctx.listener.clone(),
			Arc::clone(&ctx.metrics),
			ctx.shutdown.clone(),
		);
		let idle = IdleState::new(ctx.options.all_files_backoff());
		let (running, _) = watch::channel(false);
		Self {
			ctx,
			dispatcher,
			queue,
			idle,
			higher_priority: Mutex::new(IndexSet::new()),
			current: Mutex::new(None),
			current_project: Mutex::new(None),
			running,
		}
	}

	/// Queues a document item. Returns `true` when the item is high priority.
	///
	/// A high-priority item cancels the document being processed unless that
	/// one is high priority too; the interrupted document is retried.
	pub(crate) fn enqueue(&self, item: WorkItem) -> bool {
		let Some(document_id) = item.document_id() else {
			debug_assert!(false, "project item sent to the document queue");
			return false;
		};
		self.idle.touch();

		let flagged = item.is_high_priority() || self.is_active_or_visible(document_id);
		if flagged {
			self.higher_priority.lock().insert(document_id);
		}
		let added = self.queue.add_or_replace(item);
		tracing::trace!(document = ?document_id, added, flagged, pending = self.queue.work_item_count(), "crawler.normal.enqueue");
		self.refresh_backoff();

		if flagged {
			let preempt = matches!(*self.current.lock(), Some((current, false)) if current != document_id);
			if preempt {
				self.queue.request_cancellation_on_running_tasks();
			}
		}
		flagged
	}

	fn is_active_or_visible(&self, document_id: DocumentId) -> bool {
		let Some(tracker) = self.ctx.services().document_tracker() else {
			return false;
		};
		tracker.active_document() == Some(document_id) || tracker.visible_documents().contains(&document_id)
	}

	fn refresh_backoff(&self) {
		let backoff = if self.higher_priority.lock().is_empty() {
			self.ctx.options.all_files_backoff()
		} else {
			self.ctx.options.active_file_backoff()
		};
		self.idle.set_backoff(backoff);
	}

	pub(crate) fn has_any_work(&self) -> bool {
		self.queue.has_any_work()
	}

	/// Receiver that is `true` while a document is being processed.
	pub(crate) fn subscribe_running(&self) -> watch::Receiver<bool> {
		self.running.subscribe()
	}

	pub(crate) fn request_cancellation_on_running_tasks(&self) {
		self.queue.request_cancellation_on_running_tasks();
	}

	pub(crate) fn shutdown(&self) {
		self.queue.dispose();
		self.higher_priority.lock().clear();
	}

	fn try_take_higher_priority(&self) -> Option<(WorkItem, CancellationToken)> {
		if let Some(tracker) = self.ctx.services().document_tracker() {
			let active = tracker.active_document();
			for id in active.into_iter().chain(tracker.visible_documents()) {
				if let Some(taken) = self.queue.try_take(WorkItemKey::Document(id)) {
					return Some(taken);
				}
			}
		}

		let flagged: Vec<DocumentId> = self.higher_priority.lock().iter().copied().collect();
		for id in flagged {
			if let Some(taken) = self.queue.try_take(WorkItemKey::Document(id)) {
				return Some(taken);
			}
			// Already consumed through another path.
			self.higher_priority.lock().shift_remove(&id);
		}
		None
	}

	async fn process_document(&self, item: WorkItem, cancel: CancellationToken) -> Result<()> {
		let key = item.key();
		let Some(document_id) = item.document_id() else {
			self.queue.mark_work_item_done_for(key);
			return Ok(());
		};
		let flagged = self.higher_priority.lock().shift_remove(&document_id);
		*self.current.lock() = Some((document_id, flagged || item.is_high_priority()));
		*self.current_project.lock() = Some(document_id.project_id());

		let solution = self.ctx.current_solution();
		let all = self.dispatcher.analyzers();
		let outcome = match solution.document(document_id) {
			Some(document) => {
				let analyzers = item.applicable_analyzers(&all);
				tracing::debug!(document = ?document_id, reasons = %item.reasons(), retry = item.is_retry(), "crawler.normal.process");
				let result = self
					.dispatcher
					.process_document_analyzers(&analyzers, &item, document, item.language(), &cancel)
					.await;
				if result.is_ok() {
					CrawlerMetrics::inc(&self.ctx.metrics.documents_processed);
				}
				result
			}
			None => {
				tracing::debug!(document = ?document_id, "crawler.normal.document_not_found");
				CrawlerMetrics::inc(&self.ctx.metrics.documents_not_found);
				self.dispatcher
					.run_analyzers(&all, AnalyzerCall::RemoveDocument(document_id), &InvocationReasons::empty(), &cancel)
					.await
			}
		};
		let outcome = match outcome {
			Ok(()) if cancel.is_cancelled() => Err(CrawlerError::Cancelled),
			other => other,
		};
		*self.current.lock() = None;

		let result = match outcome {
			Err(err) if err.is_cancellation() => {
				CrawlerMetrics::inc(&self.ctx.metrics.cancellations);
				if !self.ctx.is_shutting_down() {
					CrawlerMetrics::inc(&self.ctx.metrics.retries);
					tracing::debug!(document = ?document_id, "crawler.normal.retry");
					let (retry, stale) = item.into_retry(self.ctx.listener.begin("crawler.normal.retry"));
					self.enqueue(retry);
					drop(stale);
				}
				Ok(())
			}
			other => other,
		};
		self.queue.mark_work_item_done_for(key);
		self.refresh_backoff();
		result
	}
}

#[async_trait]
impl IdleProcessor for NormalPriorityProcessor {
	fn name(&self) -> &'static str {
		"crawler.normal"
	}

	fn idle(&self) -> &IdleState {
		&self.idle
	}

	async fn wait_for_work(&self) -> bool {
		self.queue.wait_for_work().await
	}

	async fn execute(&self) -> Result<()> {
		if self.ctx.is_shutting_down() {
			return Err(CrawlerError::Shutdown);
		}
		self.running.send_replace(true);
		let taken = self.try_take_higher_priority().or_else(|| {
			let preferred = *self.current_project.lock();
			self.queue.try_take_any_work(preferred)
		});
		let result = match taken {
			Some((item, cancel)) => {
				self.ctx.progress().evaluate();
				self.ctx.report_pending_item_count();
				self.process_document(item, cancel).await
			}
			None => Ok(()),
		};
		self.running.send_replace(false);
		result
	}
}
