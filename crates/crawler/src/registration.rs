//! Per-workspace registrations and analyzer provider selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::analyzer::{AnalyzerRef, IncrementalAnalyzerProvider, ProviderEntry, ProviderMetadata};
use crate::coordinator::{ReanalyzeScope, WorkCoordinator};
use crate::global_operation::GlobalOperationService;
use crate::options::CrawlerOptions;
use crate::progress::ProgressReporter;
use crate::services::HostServices;
use crate::workspace::{DocumentId, ProjectId, Solution};

/// What one coordinator knows about the workspace it serves.
///
/// The solution snapshot here is the only record of solution identity;
/// processors load it when work runs rather than holding on to one.
pub struct Registration {
	correlation_id: u64,
	workspace_kind: String,
	services: Arc<HostServices>,
	progress: ProgressReporter,
	solution: ArcSwap<Solution>,
}

impl Registration {
	pub fn new(correlation_id: u64, workspace_kind: impl Into<String>, services: Arc<HostServices>, progress: ProgressReporter, solution: Arc<Solution>) -> Self {
		Self {
			correlation_id,
			workspace_kind: workspace_kind.into(),
			services,
			progress,
			solution: ArcSwap::new(solution),
		}
	}

	pub fn correlation_id(&self) -> u64 {
		self.correlation_id
	}

	pub fn workspace_kind(&self) -> &str {
		&self.workspace_kind
	}

	pub fn services(&self) -> &HostServices {
		&self.services
	}

	pub fn progress(&self) -> &ProgressReporter {
		&self.progress
	}

	/// Last solution snapshot the host reported.
	pub fn current_solution(&self) -> Arc<Solution> {
		self.solution.load_full()
	}

	pub(crate) fn set_solution(&self, solution: Arc<Solution>) {
		self.solution.store(solution);
	}
}

impl std::fmt::Debug for Registration {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Registration")
			.field("correlation_id", &self.correlation_id)
			.field("workspace_kind", &self.workspace_kind)
			.field("solution_version", &self.solution.load().version())
			.finish_non_exhaustive()
	}
}

/// Coordinators are keyed by workspace kind and the identity of the host services.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistrationKey {
	workspace_kind: String,
	services: usize,
}

impl RegistrationKey {
	fn new(workspace_kind: &str, services: &Arc<HostServices>) -> Self {
		Self {
			workspace_kind: workspace_kind.to_owned(),
			services: Arc::as_ptr(services) as usize,
		}
	}
}

/// Picks the provider of one name group for `workspace_kind`: a provider
/// naming the kind wins, otherwise the first default provider.
fn select_provider<'a>(group: &'a [ProviderEntry], workspace_kind: &str) -> Option<&'a ProviderEntry> {
	group
		.iter()
		.find(|entry| entry.metadata.serves(workspace_kind))
		.or_else(|| group.iter().find(|entry| entry.metadata.is_default()))
}

/// Owns every live [`WorkCoordinator`] and the analyzer providers they draw from.
pub struct SolutionCrawlerRegistrationService {
	options: CrawlerOptions,
	progress: ProgressReporter,
	global_ops: GlobalOperationService,
	/// Providers grouped by metadata name, in registration order.
	providers: Mutex<IndexMap<String, Vec<ProviderEntry>>>,
	coordinators: Mutex<HashMap<RegistrationKey, Arc<WorkCoordinator>>>,
	next_correlation: AtomicU64,
}

impl SolutionCrawlerRegistrationService {
	pub fn new(options: CrawlerOptions) -> Self {
		Self::with_global_operations(options, GlobalOperationService::new())
	}

	pub fn with_global_operations(options: CrawlerOptions, global_ops: GlobalOperationService) -> Self {
		Self {
			options,
			progress: ProgressReporter::new(),
			global_ops,
			providers: Mutex::new(IndexMap::new()),
			coordinators: Mutex::new(HashMap::new()),
			next_correlation: AtomicU64::new(1),
		}
	}

	/// Progress shared by every coordinator this service creates.
	pub fn progress(&self) -> &ProgressReporter {
		&self.progress
	}

	pub fn global_operations(&self) -> &GlobalOperationService {
		&self.global_ops
	}

	/// Returns the coordinator for `(workspace_kind, services)`, creating it
	/// on first call. `None` when crawling is disabled.
	///
	/// # Panics
	///
	/// Panics when a coordinator must be created outside a Tokio runtime.
	pub fn register(&self, workspace_kind: &str, services: &Arc<HostServices>, solution: Arc<Solution>) -> Option<Arc<WorkCoordinator>> {
		if !self.options.enabled {
			tracing::debug!(workspace_kind, "crawler.registration.disabled");
			return None;
		}
		let key = RegistrationKey::new(workspace_kind, services);
		let mut coordinators = self.coordinators.lock();
		if let Some(existing) = coordinators.get(&key) {
			return Some(Arc::clone(existing));
		}

		let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
		let registration = Arc::new(Registration::new(
			correlation_id,
			workspace_kind,
			Arc::clone(services),
			self.progress.clone(),
			solution,
		));
		let coordinator = WorkCoordinator::start(
			registration,
			self.providers_for(workspace_kind),
			self.options.clone(),
			self.global_ops.clone(),
		);
		coordinators.insert(key, Arc::clone(&coordinator));
		tracing::info!(workspace_kind, correlation_id, "crawler.registration.register");
		Some(coordinator)
	}

	/// Removes and shuts down the coordinator for `(workspace_kind, services)`.
	pub async fn unregister(&self, workspace_kind: &str, services: &Arc<HostServices>, blocking: bool) {
		let key = RegistrationKey::new(workspace_kind, services);
		let Some(coordinator) = self.coordinators.lock().remove(&key) else {
			return;
		};
		tracing::info!(workspace_kind, correlation_id = coordinator.correlation_id(), "crawler.registration.unregister");
		coordinator.shutdown(blocking).await;
	}

	pub fn coordinator(&self, workspace_kind: &str, services: &Arc<HostServices>) -> Option<Arc<WorkCoordinator>> {
		self.coordinators.lock().get(&RegistrationKey::new(workspace_kind, services)).cloned()
	}

	/// Adds a provider. Live coordinators for which it is now the selected
	/// provider of its name group get its analyzer immediately.
	pub fn add_analyzer_provider(&self, provider: Arc<dyn IncrementalAnalyzerProvider>, metadata: ProviderMetadata) {
		let name = metadata.name.clone();
		let group = {
			let mut providers = self.providers.lock();
			let group = providers.entry(name.clone()).or_default();
			group.push(ProviderEntry {
				provider: Arc::clone(&provider),
				metadata,
			});
			group.clone()
		};

		let coordinators: Vec<_> = self.coordinators.lock().values().cloned().collect();
		for coordinator in coordinators {
			let kind = coordinator.registration().workspace_kind();
			let selected = select_provider(&group, kind).is_some_and(|entry| Arc::ptr_eq(&entry.provider, &provider));
			if !selected {
				continue;
			}
			if let Some(analyzer) = provider.create_incremental_analyzer(kind) {
				tracing::debug!(provider = %name, workspace_kind = kind, "crawler.registration.provider_added");
				coordinator.add_analyzer(analyzer);
			}
		}
	}

	/// The selected provider of every name group for `workspace_kind`.
	pub fn providers_for(&self, workspace_kind: &str) -> Vec<ProviderEntry> {
		self.providers
			.lock()
			.values()
			.filter_map(|group| select_provider(group, workspace_kind))
			.cloned()
			.collect()
	}

	/// Forces `analyzer` to rerun. Without ids the whole solution is covered.
	/// Ignored when nothing is registered for the key.
	pub fn reanalyze(
		&self,
		workspace_kind: &str,
		services: &Arc<HostServices>,
		analyzer: AnalyzerRef,
		project_ids: Option<Vec<ProjectId>>,
		document_ids: Option<Vec<DocumentId>>,
		high_priority: bool,
	) {
		let Some(coordinator) = self.coordinator(workspace_kind, services) else {
			tracing::trace!(workspace_kind, "crawler.registration.reanalyze_ignored");
			return;
		};
		let scope = match (project_ids, document_ids) {
			(None, None) => ReanalyzeScope::Solution,
			(projects, documents) => ReanalyzeScope::Ids {
				projects: projects.unwrap_or_default(),
				documents: documents.unwrap_or_default(),
			},
		};
		coordinator.reanalyze(analyzer, scope, high_priority);
	}
}

impl std::fmt::Debug for SolutionCrawlerRegistrationService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SolutionCrawlerRegistrationService")
			.field("enabled", &self.options.enabled)
			.field("coordinators", &self.coordinators.lock().len())
			.finish_non_exhaustive()
	}
}
