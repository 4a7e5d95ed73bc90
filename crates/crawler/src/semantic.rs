//! Semantic change propagation.
//!
//! When a document's semantics change, other documents may observe the
//! changed symbols. [`SemanticChangeProcessor`] first tries to narrow the
//! affected set using the changed-member hint and the declared symbol's
//! accessibility. If that is not possible it falls back to the changed
//! project plus its direct dependents. Expanding a project into per-document
//! work happens on [`ProjectProcessor`]'s own loop so a large fan-out never
//! delays intake.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use trawl_worker::{AsyncToken, TaskClass};

use crate::Result;
use crate::context::CrawlerContext;
use crate::idle::{IdleProcessor, IdleState, spawn_idle_loop};
use crate::processor::IncrementalAnalyzerProcessor;
use crate::services::{DeclaredSymbol, SyntaxPath};
use crate::workspace::{DocumentId, Project, ProjectId, Solution};

struct SemanticRequest {
	changed_member: Option<SyntaxPath>,
	_token: AsyncToken,
}

async fn acquire_one(wake: &Semaphore) -> bool {
	match wake.acquire().await {
		Ok(permit) => {
			permit.forget();
			true
		}
		Err(_) => false,
	}
}

pub(crate) struct SemanticChangeProcessor {
	ctx: Arc<CrawlerContext>,
	projects: Arc<ProjectProcessor>,
	pending: Mutex<IndexMap<DocumentId, SemanticRequest>>,
	wake: Semaphore,
	idle: IdleState,
}

impl SemanticChangeProcessor {
	pub(crate) fn new(ctx: Arc<CrawlerContext>, processor: Arc<IncrementalAnalyzerProcessor>) -> Self {
		let projects = Arc::new(ProjectProcessor::new(Arc::clone(&ctx), processor));
		let idle = IdleState::new(ctx.options.semantic_change_backoff());
		Self {
			ctx,
			projects,
			pending: Mutex::new(IndexMap::new()),
			wake: Semaphore::new(0),
			idle,
		}
	}

	pub(crate) fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
		let paused = self.ctx.global_ops.subscribe();
		vec![
			spawn_idle_loop(Arc::clone(self), TaskClass::Background, self.ctx.shutdown.clone(), paused.clone()),
			spawn_idle_loop(Arc::clone(&self.projects), TaskClass::Background, self.ctx.shutdown.clone(), paused),
		]
	}

	/// Records that `document_id` changed semantically. Requests for the same
	/// document coalesce; the member hint survives only if they agree.
	pub(crate) fn enqueue(&self, document_id: DocumentId, changed_member: Option<SyntaxPath>) {
		if self.ctx.is_shutting_down() {
			return;
		}
		self.idle.touch();
		let token = self.ctx.listener.begin("crawler.semantic.enqueue");
		let mut pending = self.pending.lock();
		let stale = match pending.get_mut(&document_id) {
			Some(existing) => {
				let member = match (&existing.changed_member, &changed_member) {
					(Some(a), Some(b)) if a == b => changed_member,
					_ => None,
				};
				Some(std::mem::replace(
					existing,
					SemanticRequest {
						changed_member: member,
						_token: token,
					},
				))
			}
			None => {
				pending.insert(
					document_id,
					SemanticRequest {
						changed_member,
						_token: token,
					},
				);
				self.wake.add_permits(1);
				None
			}
		};
		drop(pending);
		drop(stale);
		tracing::trace!(document = ?document_id, "crawler.semantic.enqueue");
	}

	pub(crate) fn shutdown(&self) {
		self.wake.close();
		let drained: Vec<_> = self.pending.lock().drain(..).collect();
		drop(drained);
		self.projects.shutdown();
	}

	/// Narrows the fan-out using the member hint. Returns `false` when the
	/// hint cannot be used.
	fn try_enqueue_from_hint(&self, solution: &Solution, project: &Project, origin: DocumentId, hint: Option<&SyntaxPath>) -> bool {
		let Some(hint) = hint else { return false };
		let Some(document) = project.document(origin) else { return false };
		let Some(language) = self.ctx.services().language(project.language()) else {
			return false;
		};
		let (Some(syntax), Some(semantics)) = (&language.syntax, &language.semantics) else {
			return false;
		};
		let Some(member) = syntax.resolve_member(document, hint) else { return false };
		let Some(symbol) = semantics.declared_symbol(document, &member) else {
			return false;
		};

		self.try_enqueue_from_member(solution, project, origin, &symbol) || self.try_enqueue_from_type(solution, project, origin, &symbol)
	}

	fn try_enqueue_from_member(&self, solution: &Solution, project: &Project, origin: DocumentId, symbol: &DeclaredSymbol) -> bool {
		if !symbol.kind.is_member() {
			return false;
		}
		if symbol.accessibility.is_private() {
			self.enqueue_symbol_locations(solution, origin, symbol);
			tracing::debug!(symbol = %symbol.name, "crawler.semantic.from_member");
			return true;
		}
		match &symbol.containing_type {
			Some(containing) => self.try_enqueue_from_type(solution, project, origin, containing),
			None => false,
		}
	}

	fn try_enqueue_from_type(&self, solution: &Solution, project: &Project, origin: DocumentId, symbol: &DeclaredSymbol) -> bool {
		if !symbol.kind.is_type() {
			return false;
		}
		if symbol.accessibility.is_private() {
			self.enqueue_symbol_locations(solution, origin, symbol);
			tracing::debug!(symbol = %symbol.name, "crawler.semantic.from_type");
			return true;
		}
		if symbol.accessibility.is_internal() {
			let owner = solution.project(symbol.containing_project).map_or(project, |p| &**p);
			self.enqueue_full_project_dependency(solution, project, Some(owner), origin);
			return true;
		}
		false
	}

	/// Queues the documents declaring the symbol's immediately enclosing
	/// type, or the symbol itself when it has none.
	fn enqueue_symbol_locations(&self, solution: &Solution, origin: DocumentId, symbol: &DeclaredSymbol) {
		let locations = match &symbol.containing_type {
			Some(containing) => &containing.locations,
			None => &symbol.locations,
		};
		let mut seen = BTreeSet::new();
		for &id in locations {
			if id == origin || !seen.insert(id) {
				continue;
			}
			if solution.document(id).is_some() {
				self.projects.enqueue_documents(id.project_id(), [id]);
			}
		}
	}

	/// Queues the changed project's other documents and every document of
	/// each direct dependent. `internal_to` restricts dependents to those
	/// the owning project grants friend access.
	fn enqueue_full_project_dependency(&self, solution: &Solution, project: &Project, internal_to: Option<&Project>, origin: DocumentId) {
		self.projects.enqueue_project(project.id(), BTreeSet::from([origin]));
		let mut dependents = 0usize;
		for dependent in solution.projects_that_directly_depend_on(project.id()) {
			if let Some(owner) = internal_to {
				let Some(candidate) = solution.project(dependent) else { continue };
				if !owner.grants_friend_access_to(candidate) {
					continue;
				}
			}
			self.projects.enqueue_project(dependent, BTreeSet::new());
			dependents += 1;
		}
		tracing::debug!(project = ?project.id(), dependents, internal = internal_to.is_some(), "crawler.semantic.fanout");
	}
}

#[async_trait]
impl IdleProcessor for SemanticChangeProcessor {
	fn name(&self) -> &'static str {
		"crawler.semantic"
	}

	fn idle(&self) -> &IdleState {
		&self.idle
	}

	async fn wait_for_work(&self) -> bool {
		acquire_one(&self.wake).await
	}

	async fn execute(&self) -> Result<()> {
		let Some((document_id, request)) = self.pending.lock().shift_remove_index(0) else {
			return Ok(());
		};
		let solution = self.ctx.current_solution();
		let Some(project) = solution.project(document_id.project_id()) else {
			tracing::trace!(document = ?document_id, "crawler.semantic.project_gone");
			return Ok(());
		};
		if !self.try_enqueue_from_hint(&solution, project, document_id, request.changed_member.as_ref()) {
			self.enqueue_full_project_dependency(&solution, project, None, document_id);
		}
		Ok(())
	}
}

enum ProjectScope {
	/// Every document except these.
	AllExcept(BTreeSet<DocumentId>),
	/// Only these documents.
	Only(BTreeSet<DocumentId>),
}

impl ProjectScope {
	fn merge(self, other: ProjectScope) -> ProjectScope {
		use ProjectScope::*;
		match (self, other) {
			(AllExcept(a), AllExcept(b)) => AllExcept(a.intersection(&b).copied().collect()),
			(AllExcept(a), Only(b)) | (Only(b), AllExcept(a)) => AllExcept(a.difference(&b).copied().collect()),
			(Only(mut a), Only(b)) => {
				a.extend(b);
				Only(a)
			}
		}
	}

	fn includes(&self, id: DocumentId) -> bool {
		match self {
			Self::AllExcept(excluded) => !excluded.contains(&id),
			Self::Only(included) => included.contains(&id),
		}
	}
}

struct ProjectRequest {
	scope: ProjectScope,
	_token: AsyncToken,
}

/// Expands project-level fan-out into per-document work items.
pub(crate) struct ProjectProcessor {
	ctx: Arc<CrawlerContext>,
	processor: Arc<IncrementalAnalyzerProcessor>,
	pending: Mutex<IndexMap<ProjectId, ProjectRequest>>,
	wake: Semaphore,
	idle: IdleState,
}

impl ProjectProcessor {
	fn new(ctx: Arc<CrawlerContext>, processor: Arc<IncrementalAnalyzerProcessor>) -> Self {
		let idle = IdleState::new(ctx.options.project_propagation_backoff());
		Self {
			ctx,
			processor,
			pending: Mutex::new(IndexMap::new()),
			wake: Semaphore::new(0),
			idle,
		}
	}

	fn enqueue_project(&self, project_id: ProjectId, excluded: BTreeSet<DocumentId>) {
		self.enqueue(project_id, ProjectScope::AllExcept(excluded));
	}

	fn enqueue_documents(&self, project_id: ProjectId, documents: impl IntoIterator<Item = DocumentId>) {
		self.enqueue(project_id, ProjectScope::Only(documents.into_iter().collect()));
	}

	fn enqueue(&self, project_id: ProjectId, scope: ProjectScope) {
		self.idle.touch();
		let token = self.ctx.listener.begin("crawler.project.enqueue");
		let mut pending = self.pending.lock();
		let stale = match pending.get_mut(&project_id) {
			Some(existing) => {
				let previous = std::mem::replace(&mut existing.scope, ProjectScope::Only(BTreeSet::new()));
				existing.scope = previous.merge(scope);
				Some(std::mem::replace(&mut existing._token, token))
			}
			None => {
				pending.insert(project_id, ProjectRequest { scope, _token: token });
				self.wake.add_permits(1);
				None
			}
		};
		drop(pending);
		drop(stale);
	}

	fn shutdown(&self) {
		self.wake.close();
		let drained: Vec<_> = self.pending.lock().drain(..).collect();
		drop(drained);
	}
}

#[async_trait]
impl IdleProcessor for ProjectProcessor {
	fn name(&self) -> &'static str {
		"crawler.project"
	}

	fn idle(&self) -> &IdleState {
		&self.idle
	}

	async fn wait_for_work(&self) -> bool {
		acquire_one(&self.wake).await
	}

	async fn execute(&self) -> Result<()> {
		let Some((project_id, request)) = self.pending.lock().shift_remove_index(0) else {
			return Ok(());
		};
		let solution = self.ctx.current_solution();
		let Some(project) = solution.project(project_id) else {
			return Ok(());
		};
		let mut queued = 0usize;
		for document in project.documents() {
			if !request.scope.includes(document.id()) {
				continue;
			}
			if self.ctx.is_shutting_down() {
				break;
			}
			self.processor.enqueue_fanout(project, document).await;
			queued += 1;
		}
		tracing::debug!(project = ?project_id, queued, "crawler.project.propagate");
		Ok(())
	}
}
