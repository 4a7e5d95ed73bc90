//! The work coordinator: turns workspace notifications into work items.
//!
//! Notifications are pushed onto an unbounded channel and classified one at
//! a time by a single intake task, so the order in which the host reported
//! changes is the order in which they reach the queues. The solution snapshot
//! is updated synchronously on the caller's side; everything downstream reads
//! it at the moment work runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trawl_worker::{AsyncListener, AsyncToken, TaskClass};

use crate::analyzer::{AnalyzerRef, IncrementalAnalyzer, ProviderEntry};
use crate::context::CrawlerContext;
use crate::global_operation::GlobalOperationService;
use crate::metrics::CrawlerMetrics;
use crate::options::CrawlerOptions;
use crate::processor::IncrementalAnalyzerProcessor;
use crate::reasons::{InvocationReasons, predefined};
use crate::registration::Registration;
use crate::semantic::SemanticChangeProcessor;
use crate::services::SyntaxPath;
use crate::work_item::WorkItem;
use crate::workspace::{DocumentId, Project, ProjectId, Solution, TextDocument, WorkspaceChangeEvent, WorkspaceChangeKind};

/// Which documents a reanalyze request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReanalyzeScope {
	/// Every document of the solution current when the request is handled.
	Solution,
	/// Every document of `projects` plus the listed `documents`.
	Ids { projects: Vec<ProjectId>, documents: Vec<DocumentId> },
}

impl ReanalyzeScope {
	pub fn projects(projects: impl IntoIterator<Item = ProjectId>) -> Self {
		Self::Ids {
			projects: projects.into_iter().collect(),
			documents: Vec::new(),
		}
	}

	pub fn documents(documents: impl IntoIterator<Item = DocumentId>) -> Self {
		Self::Ids {
			projects: Vec::new(),
			documents: documents.into_iter().collect(),
		}
	}

	/// Documents of `solution` in scope, without duplicates. Ids that no longer
	/// resolve are skipped.
	fn document_ids(&self, solution: &Solution) -> IndexSet<DocumentId> {
		match self {
			Self::Solution => solution.projects().flat_map(|p| p.document_ids()).collect(),
			Self::Ids { projects, documents } => {
				let mut ids: IndexSet<DocumentId> = projects
					.iter()
					.filter_map(|id| solution.project(*id))
					.flat_map(|p| p.document_ids())
					.collect();
				ids.extend(documents.iter().copied().filter(|id| solution.document(*id).is_some()));
				ids
			}
		}
	}
}

enum IntakeEvent {
	Workspace(WorkspaceChangeEvent),
	Opened(DocumentId),
	Closed(DocumentId),
	Reanalyze {
		analyzer: AnalyzerRef,
		scope: ReanalyzeScope,
		high_priority: bool,
	},
}

impl IntakeEvent {
	fn label(&self) -> &'static str {
		match self {
			Self::Workspace(_) => "workspace",
			Self::Opened(_) => "opened",
			Self::Closed(_) => "closed",
			Self::Reanalyze { .. } => "reanalyze",
		}
	}
}

struct PendingEvent {
	event: IntakeEvent,
	_token: AsyncToken,
}

/// Drives the crawler for one registration.
///
/// Created by [`SolutionCrawlerRegistrationService::register`](crate::SolutionCrawlerRegistrationService::register).
pub struct WorkCoordinator {
	ctx: Arc<CrawlerContext>,
	processor: Arc<IncrementalAnalyzerProcessor>,
	semantic: Arc<SemanticChangeProcessor>,
	events: mpsc::UnboundedSender<PendingEvent>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	shut_down: AtomicBool,
}

impl WorkCoordinator {
	/// Builds the coordinator and spawns its loops.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime.
	pub(crate) fn start(
		registration: Arc<Registration>,
		providers: Vec<ProviderEntry>,
		options: CrawlerOptions,
		global_ops: GlobalOperationService,
	) -> Arc<Self> {
		let ctx = Arc::new(CrawlerContext {
			registration,
			options,
			listener: AsyncListener::new(),
			metrics: Arc::new(CrawlerMetrics::new()),
			shutdown: CancellationToken::new(),
			global_ops,
		});
		let processor = Arc::new(IncrementalAnalyzerProcessor::new(Arc::clone(&ctx), providers));
		let semantic = Arc::new(SemanticChangeProcessor::new(Arc::clone(&ctx), Arc::clone(&processor)));

		let (events, rx) = mpsc::unbounded_channel();
		let mut tasks = processor.start();
		tasks.extend(semantic.start());
		let intake = ChangeIntake {
			ctx: Arc::clone(&ctx),
			processor: Arc::clone(&processor),
			semantic: Arc::clone(&semantic),
		};
		tasks.push(trawl_worker::spawn(TaskClass::Intake, "crawler.intake", intake.run(rx)));

		tracing::debug!(
			correlation_id = ctx.registration.correlation_id(),
			workspace_kind = ctx.registration.workspace_kind(),
			"crawler.coordinator.start"
		);
		Arc::new(Self {
			ctx,
			processor,
			semantic,
			events,
			tasks: Mutex::new(tasks),
			shut_down: AtomicBool::new(false),
		})
	}

	pub fn correlation_id(&self) -> u64 {
		self.ctx.registration.correlation_id()
	}

	pub fn registration(&self) -> &Arc<Registration> {
		&self.ctx.registration
	}

	pub fn metrics(&self) -> &CrawlerMetrics {
		&self.ctx.metrics
	}

	/// Accounts for every unit of work this coordinator has accepted.
	pub fn listener(&self) -> &AsyncListener {
		&self.ctx.listener
	}

	pub fn is_shutdown(&self) -> bool {
		self.shut_down.load(Ordering::Acquire)
	}

	fn post(&self, event: IntakeEvent) {
		if self.ctx.is_shutting_down() {
			return;
		}
		let label = event.label();
		let pending = PendingEvent {
			event,
			_token: self.ctx.listener.begin("crawler.intake"),
		};
		if self.events.send(pending).is_err() {
			tracing::trace!(event = label, "crawler.intake.closed");
		}
	}

	/// Records the new solution snapshot and schedules classification of the change.
	pub fn on_workspace_changed(&self, event: WorkspaceChangeEvent) {
		if self.ctx.is_shutting_down() {
			return;
		}
		CrawlerMetrics::inc(&self.ctx.metrics.workspace_events);
		self.ctx.registration.set_solution(Arc::clone(&event.new_solution));
		self.post(IntakeEvent::Workspace(event));
	}

	pub fn on_document_opened(&self, document_id: DocumentId) {
		self.post(IntakeEvent::Opened(document_id));
	}

	pub fn on_document_closed(&self, document_id: DocumentId) {
		self.post(IntakeEvent::Closed(document_id));
	}

	/// Forces `analyzer` to run over `scope` without touching other analyzers.
	pub fn reanalyze(&self, analyzer: AnalyzerRef, scope: ReanalyzeScope, high_priority: bool) {
		CrawlerMetrics::inc(&self.ctx.metrics.reanalyze_requests);
		tracing::debug!(analyzer = analyzer.name(), ?scope, high_priority, "crawler.coordinator.reanalyze");
		self.post(IntakeEvent::Reanalyze {
			analyzer,
			scope,
			high_priority,
		});
	}

	/// Registers an analyzer after start and reanalyzes the whole solution for it.
	pub fn add_analyzer(&self, analyzer: Arc<dyn IncrementalAnalyzer>) -> AnalyzerRef {
		let analyzer = self.processor.add_analyzer(analyzer);
		self.reanalyze(analyzer.clone(), ReanalyzeScope::Solution, false);
		analyzer
	}

	/// Reanalyzes the solution for every analyzer that cares about `option`.
	pub fn on_option_changed(&self, option: &str) {
		for analyzer in self.processor.analyzers() {
			if analyzer.needs_reanalysis_on_option_changed(option) {
				self.reanalyze(analyzer, ReanalyzeScope::Solution, false);
			}
		}
	}

	pub fn analyzers(&self) -> Vec<AnalyzerRef> {
		self.processor.analyzers()
	}

	/// Waits until every accepted unit of work has been accounted for.
	pub async fn wait_until_completion(&self) {
		self.ctx.listener.wait_idle().await;
	}

	/// Stops the coordinator. In-flight analyzer calls see their tokens
	/// cancelled and queued work is dropped without retry. With `blocking`
	/// the call waits, up to the configured timeout, for every loop to exit.
	pub async fn shutdown(&self, blocking: bool) {
		if self.shut_down.swap(true, Ordering::AcqRel) {
			return;
		}
		tracing::debug!(correlation_id = self.correlation_id(), blocking, "crawler.coordinator.shutdown");
		self.ctx.shutdown.cancel();
		self.processor.shutdown();
		self.semantic.shutdown();

		let tasks = std::mem::take(&mut *self.tasks.lock());
		if blocking {
			let join_all = async {
				for task in tasks {
					trawl_worker::join_logged("crawler.coordinator", task).await;
				}
			};
			if tokio::time::timeout(self.ctx.options.shutdown_timeout(), join_all).await.is_err() {
				tracing::warn!(
					correlation_id = self.correlation_id(),
					timeout_ms = self.ctx.options.shutdown_timeout_ms,
					"crawler.coordinator.shutdown_timeout"
				);
			}
		}
		self.ctx.metrics.log_summary();
	}
}

impl std::fmt::Debug for WorkCoordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkCoordinator")
			.field("correlation_id", &self.correlation_id())
			.field("workspace_kind", &self.ctx.registration.workspace_kind())
			.field("shut_down", &self.is_shutdown())
			.finish_non_exhaustive()
	}
}

/// Classifies notifications into work items, one at a time.
struct ChangeIntake {
	ctx: Arc<CrawlerContext>,
	processor: Arc<IncrementalAnalyzerProcessor>,
	semantic: Arc<SemanticChangeProcessor>,
}

impl ChangeIntake {
	async fn run(self, mut rx: mpsc::UnboundedReceiver<PendingEvent>) {
		loop {
			let pending = tokio::select! {
				biased;
				_ = self.ctx.shutdown.cancelled() => break,
				pending = rx.recv() => match pending {
					Some(pending) => pending,
					None => break,
				},
			};
			match pending.event {
				IntakeEvent::Workspace(event) => self.process_workspace_event(event).await,
				IntakeEvent::Opened(id) => self.enqueue_current_document(id, InvocationReasons::document_opened()).await,
				IntakeEvent::Closed(id) => self.enqueue_current_document(id, InvocationReasons::document_closed()).await,
				IntakeEvent::Reanalyze {
					analyzer,
					scope,
					high_priority,
				} => self.enqueue_reanalyze(analyzer, scope, high_priority).await,
			}
		}
		tracing::trace!("crawler.intake.stop");
	}

	async fn process_workspace_event(&self, event: WorkspaceChangeEvent) {
		use WorkspaceChangeKind::*;

		tracing::trace!(kind = ?event.kind, project = ?event.project_id, document = ?event.document_id, "crawler.intake.event");
		let project_id = event.project_id.or(event.document_id.map(DocumentId::project_id));
		match event.kind {
			SolutionAdded => self.enqueue_full_solution(&event.new_solution, InvocationReasons::document_added()).await,
			SolutionRemoved => self.enqueue_full_solution(&event.old_solution, InvocationReasons::solution_removed()).await,
			SolutionCleared => self.enqueue_full_solution(&event.old_solution, InvocationReasons::document_removed()).await,
			SolutionChanged | SolutionReloaded => self.enqueue_solution_changes(&event.old_solution, &event.new_solution).await,
			ProjectAdded => {
				if let Some(project) = project_id.and_then(|id| event.new_solution.project(id)) {
					self.enqueue_full_project(project, InvocationReasons::document_added()).await;
				}
			}
			ProjectRemoved => {
				if let Some(project) = project_id.and_then(|id| event.old_solution.project(id)) {
					self.enqueue_full_project(project, InvocationReasons::document_removed()).await;
				}
			}
			ProjectChanged | ProjectReloaded => {
				if let Some(id) = project_id {
					self.enqueue_project_changes(&event.old_solution, &event.new_solution, id).await;
				}
			}
			DocumentAdded => {
				if let Some(id) = event.document_id {
					self.enqueue_full_document(&event.new_solution, id, InvocationReasons::document_added()).await;
				}
			}
			DocumentRemoved => {
				if let Some(id) = event.document_id {
					self.enqueue_full_document(&event.old_solution, id, InvocationReasons::document_removed()).await;
				}
			}
			DocumentChanged | DocumentReloaded => {
				if let Some(id) = event.document_id {
					self.enqueue_document_change(&event.old_solution, &event.new_solution, id).await;
				}
			}
			AdditionalDocumentAdded
			| AdditionalDocumentChanged
			| AdditionalDocumentRemoved
			| AdditionalDocumentReloaded
			| AnalyzerConfigDocumentAdded
			| AnalyzerConfigDocumentChanged
			| AnalyzerConfigDocumentRemoved
			| AnalyzerConfigDocumentReloaded => {
				if let Some(project) = project_id.and_then(|id| event.new_solution.project(id)) {
					self.enqueue_full_project(project, InvocationReasons::additional_document_changed()).await;
				}
			}
		}
	}

	async fn enqueue_full_solution(&self, solution: &Solution, reasons: InvocationReasons) {
		for project in solution.projects() {
			self.enqueue_full_project(project, reasons.clone()).await;
		}
	}

	async fn enqueue_full_project(&self, project: &Project, reasons: InvocationReasons) {
		for document in project.documents() {
			if self.ctx.is_shutting_down() {
				return;
			}
			self.enqueue_document(project, document.id(), Some(document), reasons.clone(), None)
				.await;
		}
	}

	async fn enqueue_full_document(&self, solution: &Solution, document_id: DocumentId, reasons: InvocationReasons) {
		let Some(project) = solution.project(document_id.project_id()) else {
			tracing::warn!(document = ?document_id, "crawler.intake.project_not_found");
			return;
		};
		self.enqueue_document(project, document_id, project.document(document_id), reasons, None)
			.await;
	}

	async fn enqueue_solution_changes(&self, old: &Solution, new: &Solution) {
		let changes = new.changes(old);
		for id in changes.added_projects {
			if let Some(project) = new.project(id) {
				self.enqueue_full_project(project, InvocationReasons::document_added()).await;
			}
		}
		for id in changes.changed_projects {
			self.enqueue_project_changes(old, new, id).await;
		}
		for id in changes.removed_projects {
			if let Some(project) = old.project(id) {
				self.enqueue_full_project(project, InvocationReasons::document_removed()).await;
			}
		}
	}

	async fn enqueue_project_changes(&self, old: &Solution, new: &Solution, project_id: ProjectId) {
		let (old_project, new_project) = match (old.project(project_id), new.project(project_id)) {
			(Some(old_project), Some(new_project)) => (old_project, new_project),
			(None, Some(new_project)) => {
				return self.enqueue_full_project(new_project, InvocationReasons::document_added()).await;
			}
			(Some(old_project), None) => {
				return self.enqueue_full_project(old_project, InvocationReasons::document_removed()).await;
			}
			(None, None) => return,
		};

		let changes = new_project.changes(old_project);
		let mut configuration = InvocationReasons::empty();
		if changes.parse_options_changed {
			configuration = configuration.with(&InvocationReasons::project_parse_options_changed());
		}
		if changes.configuration_changed {
			configuration = configuration.with(&InvocationReasons::project_configuration_changed());
		}
		if !configuration.is_empty() {
			self.enqueue_full_project(new_project, configuration).await;
		}

		for id in changes.added_documents {
			self.enqueue_document(new_project, id, new_project.document(id), InvocationReasons::document_added(), None)
				.await;
		}
		for id in changes.changed_documents {
			self.enqueue_document_change(old, new, id).await;
		}
		for id in changes.removed_documents {
			self.enqueue_document(old_project, id, old_project.document(id), InvocationReasons::document_removed(), None)
				.await;
		}
	}

	/// Asks the language's difference service what an edit changed. Without
	/// the service the whole document counts as changed.
	async fn enqueue_document_change(&self, old: &Solution, new: &Solution, document_id: DocumentId) {
		let Some(project) = new.project(document_id.project_id()) else {
			return;
		};
		let Some(new_document) = project.document(document_id) else {
			return;
		};
		let Some(old_document) = old.document(document_id) else {
			return self
				.enqueue_document(project, document_id, Some(new_document), InvocationReasons::document_added(), None)
				.await;
		};

		let difference_service = self.ctx.services().language(project.language()).and_then(|l| l.difference.clone());
		let Some(service) = difference_service else {
			return self
				.enqueue_document(project, document_id, Some(new_document), InvocationReasons::document_changed(), None)
				.await;
		};
		match service.difference(old_document, new_document, &self.ctx.shutdown).await {
			Some(difference) => {
				self.enqueue_document(project, document_id, Some(new_document), difference.reasons, difference.changed_member)
					.await;
			}
			None => tracing::trace!(document = ?document_id, "crawler.intake.unchanged"),
		}
	}

	async fn enqueue_current_document(&self, document_id: DocumentId, reasons: InvocationReasons) {
		let solution = self.ctx.current_solution();
		self.enqueue_full_document(&solution, document_id, reasons).await;
	}

	async fn enqueue_document(
		&self,
		project: &Project,
		document_id: DocumentId,
		document: Option<&TextDocument>,
		reasons: InvocationReasons,
		changed_member: Option<SyntaxPath>,
	) {
		if self.ctx.is_shutting_down() {
			return;
		}
		let is_low_priority = match document {
			Some(document) => self.ctx.is_low_priority(project.language(), document).await,
			None => false,
		};
		let semantic_changed = reasons.contains(predefined::SEMANTIC_CHANGED);
		let item = WorkItem::for_document(document_id, project.language(), reasons, self.ctx.listener.begin("crawler.work_item"))
			.low_priority(is_low_priority)
			.with_active_member(changed_member.clone());
		self.processor.enqueue(item);

		if semantic_changed {
			self.semantic.enqueue(document_id, changed_member);
		}
	}

	async fn enqueue_reanalyze(&self, analyzer: AnalyzerRef, scope: ReanalyzeScope, high_priority: bool) {
		let solution = self.ctx.current_solution();
		let reasons = if high_priority {
			InvocationReasons::reanalyze_high_priority()
		} else {
			InvocationReasons::reanalyze()
		};
		for document_id in scope.document_ids(&solution) {
			if self.ctx.is_shutting_down() {
				return;
			}
			let Some(project) = solution.project(document_id.project_id()) else {
				continue;
			};
			let is_low_priority = match project.document(document_id) {
				Some(document) => self.ctx.is_low_priority(project.language(), document).await,
				None => false,
			};
			let item = WorkItem::for_document(document_id, project.language(), reasons.clone(), self.ctx.listener.begin("crawler.work_item"))
				.low_priority(is_low_priority)
				.with_specific_analyzers([analyzer.clone()]);
			self.processor.enqueue(item);
		}
	}
}
