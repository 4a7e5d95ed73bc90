//! Low-priority project passes.
//!
//! Every document item is mirrored here as a project item. A pass only starts
//! once the normal-priority processor is idle with an empty queue; until then
//! this processor backs off and rechecks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::CrawlerContext;
use crate::error::CrawlerError;
use crate::idle::{IdleProcessor, IdleState};
use crate::normal::NormalPriorityProcessor;
use crate::processor::{AnalyzerCall, AnalyzerDispatcher};
use crate::queue::ProjectQueue;
use crate::reasons::predefined;
use crate::work_item::WorkItem;
use crate::{CrawlerMetrics, Result};

pub(crate) struct LowPriorityProcessor {
	ctx: Arc<CrawlerContext>,
	dispatcher: Arc<AnalyzerDispatcher>,
	queue: ProjectQueue,
	idle: IdleState,
	higher: Arc<NormalPriorityProcessor>,
}

impl LowPriorityProcessor {
	pub(crate) fn new(ctx: Arc<CrawlerContext>, dispatcher: Arc<AnalyzerDispatcher>, higher: Arc<NormalPriorityProcessor>) -> Self {
		let queue = ProjectQueue::new(
			"crawler.low",
			ctx.progress().clone(),
			ctx.listener.clone(),
			Arc::clone(&ctx.metrics),
			ctx.shutdown.clone(),
		);
		let idle = IdleState::new(ctx.options.entire_project_backoff());
		Self {
			ctx,
			dispatcher,
			queue,
			idle,
			higher,
		}
	}

	/// Queues a project item.
	pub(crate) fn enqueue(&self, item: WorkItem) {
		debug_assert!(item.document_id().is_none(), "document item sent to the project queue");
		self.idle.touch();
		let project = item.project_id();
		let added = self.queue.add_or_replace(item);
		tracing::trace!(project = ?project, added, pending = self.queue.work_item_count(), "crawler.low.enqueue");
	}

	pub(crate) fn request_cancellation_on_running_tasks(&self) {
		self.queue.request_cancellation_on_running_tasks();
	}

	pub(crate) fn shutdown(&self) {
		self.queue.dispose();
	}

	/// Waits until the normal-priority processor is idle with nothing queued.
	/// Returns `false` on shutdown.
	async fn wait_for_higher_priority_operations(&self) -> bool {
		let mut running = self.higher.subscribe_running();
		let mut paused = self.ctx.global_ops.subscribe();
		loop {
			if self.ctx.is_shutting_down() {
				return false;
			}
			let idle = tokio::select! {
				biased;
				_ = self.ctx.shutdown.cancelled() => false,
				done = running.wait_for(|r| !*r) => done.is_ok(),
			};
			if !idle {
				return false;
			}
			// Normal flags itself running before it takes, so an empty queue
			// read first and a clear flag read second mean it is truly idle.
			if !self.higher.has_any_work() && !*running.borrow() {
				return true;
			}
			tracing::trace!("crawler.low.yield");
			self.idle.touch();
			if !self.idle.wait_for_idle(&self.ctx.shutdown, &mut paused).await {
				return false;
			}
		}
	}

	async fn process_project(&self, item: WorkItem, cancel: CancellationToken) -> Result<()> {
		let key = item.key();
		let project_id = item.project_id();
		let reasons = item.reasons().clone();
		let solution = self.ctx.current_solution();
		let all = self.dispatcher.analyzers();

		let outcome = match solution.project(project_id) {
			Some(project) if reasons.requires_project_analysis() => {
				let semantics_changed = reasons.contains(predefined::SEMANTIC_CHANGED) || reasons.contains(predefined::SOLUTION_REMOVED);
				let analyzers = item.applicable_analyzers(&all);
				tracing::debug!(project = ?project_id, %reasons, semantics_changed, "crawler.low.process");
				let result = self
					.dispatcher
					.run_analyzers(&analyzers, AnalyzerCall::Project(project, semantics_changed), &reasons, &cancel)
					.await;
				if result.is_ok() {
					CrawlerMetrics::inc(&self.ctx.metrics.projects_processed);
				}
				result
			}
			Some(_) => {
				tracing::trace!(project = ?project_id, %reasons, "crawler.low.skip");
				CrawlerMetrics::inc(&self.ctx.metrics.project_passes_skipped);
				Ok(())
			}
			None => {
				tracing::debug!(project = ?project_id, "crawler.low.project_not_found");
				CrawlerMetrics::inc(&self.ctx.metrics.projects_not_found);
				self.dispatcher
					.run_analyzers(&all, AnalyzerCall::RemoveProject(project_id), &reasons, &cancel)
					.await
			}
		};
		let outcome = match outcome {
			Ok(()) if cancel.is_cancelled() => Err(CrawlerError::Cancelled),
			other => other,
		};

		let result = match outcome {
			Err(err) if err.is_cancellation() => {
				CrawlerMetrics::inc(&self.ctx.metrics.cancellations);
				if !self.ctx.is_shutting_down() {
					CrawlerMetrics::inc(&self.ctx.metrics.retries);
					tracing::debug!(project = ?project_id, "crawler.low.retry");
					let (retry, stale) = item.into_retry(self.ctx.listener.begin("crawler.low.retry"));
					self.enqueue(retry);
					drop(stale);
				}
				Ok(())
			}
			other => other,
		};
		self.queue.mark_work_item_done_for(key);
		result
	}
}

#[async_trait]
impl IdleProcessor for LowPriorityProcessor {
	fn name(&self) -> &'static str {
		"crawler.low"
	}

	fn idle(&self) -> &IdleState {
		&self.idle
	}

	async fn wait_for_work(&self) -> bool {
		self.queue.wait_for_work().await
	}

	async fn execute(&self) -> Result<()> {
		if !self.wait_for_higher_priority_operations().await {
			return Err(CrawlerError::Shutdown);
		}
		let preferred = self
			.ctx
			.services()
			.document_tracker()
			.and_then(|tracker| tracker.active_document())
			.map(|doc| doc.project_id());
		match self.queue.try_take_any_work(preferred) {
			Some((item, cancel)) => {
				self.ctx.progress().evaluate();
				self.ctx.report_pending_item_count();
				self.process_project(item, cancel).await
			}
			None => Ok(()),
		}
	}
}
