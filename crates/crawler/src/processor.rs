//! Analyzer dispatch.
//!
//! [`IncrementalAnalyzerProcessor`] mirrors every document item into the
//! normal-priority document queue and, demoted to a project item, into the
//! low-priority project queue. [`AnalyzerDispatcher`] owns the analyzer list
//! and turns one dequeued item into the sequence of analyzer calls it needs.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trawl_worker::TaskClass;

use crate::analyzer::{AnalyzerRef, IncrementalAnalyzer, ProviderEntry};
use crate::context::CrawlerContext;
use crate::error::{AnalyzerResult, CrawlerError};
use crate::idle::spawn_idle_loop;
use crate::low::LowPriorityProcessor;
use crate::normal::NormalPriorityProcessor;
use crate::reasons::{InvocationReasons, predefined};
use crate::services::SyntaxPath;
use crate::work_item::WorkItem;
use crate::workspace::{DocumentId, Project, ProjectId, TextDocument};
use crate::{CrawlerMetrics, Result};

/// One analyzer entry point with its arguments.
#[derive(Clone, Copy)]
pub(crate) enum AnalyzerCall<'a> {
	Open(&'a TextDocument),
	Close(&'a TextDocument),
	Reset(&'a TextDocument),
	Syntax(&'a TextDocument),
	Document(&'a TextDocument, Option<&'a SyntaxPath>),
	Project(&'a Project, bool),
	RemoveDocument(DocumentId),
	RemoveProject(ProjectId),
}

impl AnalyzerCall<'_> {
	async fn invoke(self, analyzer: &dyn IncrementalAnalyzer, reasons: &InvocationReasons, cancel: &CancellationToken) -> AnalyzerResult {
		match self {
			Self::Open(doc) => analyzer.document_open(doc, cancel).await,
			Self::Close(doc) => analyzer.document_close(doc, cancel).await,
			Self::Reset(doc) => analyzer.document_reset(doc, cancel).await,
			Self::Syntax(doc) => analyzer.analyze_syntax(doc, reasons, cancel).await,
			Self::Document(doc, body) => analyzer.analyze_document(doc, body, reasons, cancel).await,
			Self::Project(project, semantics_changed) => analyzer.analyze_project(project, semantics_changed, reasons, cancel).await,
			Self::RemoveDocument(id) => analyzer.remove_document(id, cancel).await,
			Self::RemoveProject(id) => analyzer.remove_project(id, cancel).await,
		}
	}

	fn label(self) -> &'static str {
		match self {
			Self::Open(_) => "open",
			Self::Close(_) => "close",
			Self::Reset(_) => "reset",
			Self::Syntax(_) => "syntax",
			Self::Document(_, None) => "document",
			Self::Document(_, Some(_)) => "body",
			Self::Project(..) => "project",
			Self::RemoveDocument(_) => "remove_document",
			Self::RemoveProject(_) => "remove_project",
		}
	}
}

/// Owns the analyzer list and runs analyzers for dequeued items.
pub(crate) struct AnalyzerDispatcher {
	ctx: Arc<CrawlerContext>,
	providers: Vec<ProviderEntry>,
	analyzers: Mutex<Option<Vec<AnalyzerRef>>>,
}

impl AnalyzerDispatcher {
	pub(crate) fn new(ctx: Arc<CrawlerContext>, providers: Vec<ProviderEntry>) -> Self {
		Self {
			ctx,
			providers,
			analyzers: Mutex::new(None),
		}
	}

	/// Registered analyzers, created from the providers on first use.
	pub(crate) fn analyzers(&self) -> Vec<AnalyzerRef> {
		if let Some(list) = &*self.analyzers.lock() {
			return list.clone();
		}
		let created = self.create_analyzers();
		self.analyzers.lock().get_or_insert(created).clone()
	}

	fn create_analyzers(&self) -> Vec<AnalyzerRef> {
		let kind = self.ctx.registration.workspace_kind();
		let analyzers: Vec<AnalyzerRef> = self
			.providers
			.iter()
			.filter_map(|entry| entry.provider.create_incremental_analyzer(kind))
			.map(AnalyzerRef::new)
			.collect();
		tracing::debug!(workspace_kind = kind, count = analyzers.len(), "crawler.analyzers.created");
		analyzers
	}

	pub(crate) fn add_analyzer(&self, analyzer: Arc<dyn IncrementalAnalyzer>) -> AnalyzerRef {
		let mut list = self.analyzers();
		let analyzer = AnalyzerRef::new(analyzer);
		list.push(analyzer.clone());
		*self.analyzers.lock() = Some(list);
		analyzer
	}

	/// Runs `call` on each analyzer in order.
	///
	/// Cancellation from any analyzer ends the run with
	/// [`CrawlerError::Cancelled`]. Any other failure is reported to the
	/// host's fatal error sink and ends the run with
	/// [`CrawlerError::AnalyzerFault`].
	pub(crate) async fn run_analyzers(
		&self,
		analyzers: &[AnalyzerRef],
		call: AnalyzerCall<'_>,
		reasons: &InvocationReasons,
		cancel: &CancellationToken,
	) -> Result<()> {
		for analyzer in analyzers {
			if cancel.is_cancelled() {
				return Err(CrawlerError::Cancelled);
			}
			tracing::trace!(analyzer = analyzer.name(), call = call.label(), "crawler.analyzer.invoke");
			match call.invoke(&**analyzer, reasons, cancel).await {
				Ok(()) => {}
				Err(err) if err.is_cancellation() => return Err(CrawlerError::Cancelled),
				Err(err) => {
					self.ctx.services().fatal_errors().report(analyzer.name(), &err);
					return Err(CrawlerError::AnalyzerFault {
						analyzer: analyzer.name().to_owned(),
						source: err,
					});
				}
			}
		}
		Ok(())
	}

	/// Runs every analysis category `item` asks for on `document`.
	///
	/// Order: open/close hooks, forced reanalysis, syntax, then either full
	/// document analysis or the narrower member-body path. Semantic work only
	/// applies to source documents. A retried item reruns every category.
	pub(crate) async fn process_document_analyzers(
		&self,
		analyzers: &[AnalyzerRef],
		item: &WorkItem,
		document: &TextDocument,
		language: &str,
		cancel: &CancellationToken,
	) -> Result<()> {
		let reasons = item.reasons();

		if reasons.contains(predefined::DOCUMENT_OPENED) {
			self.run_analyzers(analyzers, AnalyzerCall::Open(document), reasons, cancel).await?;
		}
		if reasons.contains(predefined::DOCUMENT_CLOSED) {
			self.run_analyzers(analyzers, AnalyzerCall::Close(document), reasons, cancel).await?;
		}

		let mut document_analyzed = false;
		if reasons.contains(predefined::REANALYZE) && !item.must_refresh() {
			self.run_analyzers(analyzers, AnalyzerCall::Reset(document), reasons, cancel).await?;
			if !reasons.contains(predefined::SYNTAX_CHANGED) {
				self.run_analyzers(analyzers, AnalyzerCall::Syntax(document), reasons, cancel).await?;
			}
			if !reasons.contains(predefined::SEMANTIC_CHANGED) && document.is_source() {
				self.run_analyzers(analyzers, AnalyzerCall::Document(document, None), reasons, cancel)
					.await?;
				document_analyzed = true;
			}
		}

		if item.must_refresh() || reasons.contains(predefined::SYNTAX_CHANGED) {
			self.run_analyzers(analyzers, AnalyzerCall::Syntax(document), reasons, cancel).await?;
		}

		if !document.is_source() {
			return Ok(());
		}
		if item.must_refresh() || reasons.contains(predefined::SEMANTIC_CHANGED) {
			self.run_analyzers(analyzers, AnalyzerCall::Document(document, None), reasons, cancel).await
		} else if !document_analyzed {
			self.run_body_analyzers(analyzers, item, document, language, cancel).await
		} else {
			Ok(())
		}
	}

	/// Re-analyzes just the changed member when the hint still resolves,
	/// otherwise the whole document.
	async fn run_body_analyzers(
		&self,
		analyzers: &[AnalyzerRef],
		item: &WorkItem,
		document: &TextDocument,
		language: &str,
		cancel: &CancellationToken,
	) -> Result<()> {
		let syntax = self.ctx.services().language(language).and_then(|l| l.syntax.clone());
		let body = match (syntax, item.active_member()) {
			(Some(syntax), Some(hint)) => syntax.resolve_member(document, hint),
			_ => None,
		};
		if body.is_none() {
			tracing::trace!(document = ?document.id(), "crawler.analyzer.body_fallback");
		}
		self.run_analyzers(analyzers, AnalyzerCall::Document(document, body.as_ref()), item.reasons(), cancel)
			.await
	}
}

/// Front door for document and project work.
pub(crate) struct IncrementalAnalyzerProcessor {
	ctx: Arc<CrawlerContext>,
	dispatcher: Arc<AnalyzerDispatcher>,
	normal: Arc<NormalPriorityProcessor>,
	low: Arc<LowPriorityProcessor>,
}

impl IncrementalAnalyzerProcessor {
	pub(crate) fn new(ctx: Arc<CrawlerContext>, providers: Vec<ProviderEntry>) -> Self {
		let dispatcher = Arc::new(AnalyzerDispatcher::new(Arc::clone(&ctx), providers));
		let normal = Arc::new(NormalPriorityProcessor::new(Arc::clone(&ctx), Arc::clone(&dispatcher)));
		let low = Arc::new(LowPriorityProcessor::new(Arc::clone(&ctx), Arc::clone(&dispatcher), Arc::clone(&normal)));
		Self {
			ctx,
			dispatcher,
			normal,
			low,
		}
	}

	/// Spawns both priority loops and the global operation watcher.
	pub(crate) fn start(&self) -> Vec<JoinHandle<()>> {
		let paused = self.ctx.global_ops.subscribe();
		vec![
			spawn_idle_loop(Arc::clone(&self.normal), TaskClass::Interactive, self.ctx.shutdown.clone(), paused.clone()),
			spawn_idle_loop(Arc::clone(&self.low), TaskClass::Background, self.ctx.shutdown.clone(), paused),
			self.spawn_global_operation_watcher(),
		]
	}

	fn spawn_global_operation_watcher(&self) -> JoinHandle<()> {
		let ctx = Arc::clone(&self.ctx);
		let normal = Arc::clone(&self.normal);
		let low = Arc::clone(&self.low);
		trawl_worker::spawn(TaskClass::Intake, "crawler.global_operation", async move {
			let mut rx = ctx.global_ops.subscribe();
			let mut was_running = *rx.borrow_and_update() > 0;
			loop {
				let changed = tokio::select! {
					biased;
					_ = ctx.shutdown.cancelled() => false,
					changed = rx.changed() => changed.is_ok(),
				};
				if !changed {
					break;
				}
				let running = *rx.borrow_and_update() > 0;
				if running && !was_running {
					tracing::debug!("crawler.pause");
					normal.request_cancellation_on_running_tasks();
					low.request_cancellation_on_running_tasks();
					ctx.progress().pause();
				} else if !running && was_running {
					tracing::debug!("crawler.resume");
					ctx.progress().evaluate();
					ctx.report_pending_item_count();
				}
				was_running = running;
			}
		})
	}

	/// Queues `item` with both priority processors.
	pub(crate) fn enqueue(&self, item: WorkItem) {
		if item.document_id().is_some() {
			let project_item = item.to_project_work_item(self.ctx.listener.begin("crawler.low.enqueue"));
			let high_priority = self.normal.enqueue(item);
			if high_priority {
				self.low.request_cancellation_on_running_tasks();
			}
			self.low.enqueue(project_item);
		} else {
			self.low.enqueue(item);
		}
		self.ctx.report_pending_item_count();
	}

	/// Queues a semantic fan-out item for `document`.
	pub(crate) async fn enqueue_fanout(&self, project: &Project, document: &TextDocument) {
		if self.ctx.is_shutting_down() {
			return;
		}
		let is_low_priority = self.ctx.is_low_priority(project.language(), document).await;
		let item = WorkItem::for_document(
			document.id(),
			project.language(),
			InvocationReasons::semantic_changed(),
			self.ctx.listener.begin("crawler.semantic.fanout"),
		)
		.low_priority(is_low_priority);
		CrawlerMetrics::inc(&self.ctx.metrics.fanout_items);
		self.enqueue(item);
	}

	pub(crate) fn analyzers(&self) -> Vec<AnalyzerRef> {
		self.dispatcher.analyzers()
	}

	pub(crate) fn add_analyzer(&self, analyzer: Arc<dyn IncrementalAnalyzer>) -> AnalyzerRef {
		self.dispatcher.add_analyzer(analyzer)
	}

	pub(crate) fn shutdown(&self) {
		self.normal.shutdown();
		self.low.shutdown();
	}
}
