//! Shared fixtures for crawler integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use trawl_crawler::{
	AnalyzerError, AnalyzerResult, CrawlerOptions, DocumentId, HostServices, IncrementalAnalyzer, IncrementalAnalyzerProvider, InvocationReasons,
	Project, ProjectId, ProviderMetadata, Solution, SolutionCrawlerRegistrationService, SyntaxPath, TextDocument, WorkCoordinator,
	WorkspaceChangeEvent, WorkspaceChangeKind,
};

pub const LANGUAGE: &str = "rust";
pub const KIND: &str = "host";

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Short backoffs everywhere so scenarios finish quickly.
pub fn fast_options() -> CrawlerOptions {
	CrawlerOptions::default().with_uniform_backoff(Duration::from_millis(30))
}

/// Waits for the coordinator to account for every unit of work.
pub async fn settle(coordinator: &WorkCoordinator) {
	tokio::time::timeout(Duration::from_secs(10), coordinator.wait_until_completion())
		.await
		.expect("crawler did not drain");
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	false
}

pub fn doc_id(project: u32, raw: u32) -> DocumentId {
	DocumentId::new(ProjectId::new(project), raw)
}

/// Project `id` with source documents `1..=documents`.
pub fn project(id: u32, documents: u32) -> Project {
	let pid = ProjectId::new(id);
	(1..=documents).fold(Project::new(pid, format!("p{id}"), LANGUAGE), |p, raw| {
		p.with_document(TextDocument::new(DocumentId::new(pid, raw), format!("d{raw}.rs"), "fn main() {}"))
	})
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Syntax(DocumentId),
	Document {
		id: DocumentId,
		body: Option<SyntaxPath>,
		reasons: InvocationReasons,
	},
	Project {
		id: ProjectId,
		semantics_changed: bool,
		reasons: InvocationReasons,
	},
	RemoveDocument(DocumentId),
	RemoveProject(ProjectId),
	Open(DocumentId),
	Close(DocumentId),
	Reset(DocumentId),
}

/// Analyzer double that records every call.
#[derive(Default)]
pub struct RecordingAnalyzer {
	calls: Mutex<Vec<Call>>,
	/// When set, the next `analyze_document` blocks until cancelled.
	block_next_document: AtomicBool,
	/// When set, the next `analyze_project` blocks until cancelled.
	block_next_project: AtomicBool,
	/// Signalled when a blocking call starts waiting.
	pub entered: Notify,
	/// When set, `analyze_document` fails with a fault.
	fault: AtomicBool,
	/// Documents that must be analyzed before a project pass counts as on time.
	expected_documents: AtomicUsize,
	/// Project passes that started too early.
	pub early_project_passes: AtomicUsize,
}

impl RecordingAnalyzer {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn block_next_document(&self) {
		self.block_next_document.store(true, Ordering::SeqCst);
	}

	pub fn block_next_project(&self) {
		self.block_next_project.store(true, Ordering::SeqCst);
	}

	pub fn fail_documents(&self) {
		self.fault.store(true, Ordering::SeqCst);
	}

	/// Counts a project pass as early when fewer than `n` documents were analyzed.
	pub fn expect_documents_before_projects(&self, n: usize) {
		self.expected_documents.store(n, Ordering::SeqCst);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().clone()
	}

	pub fn document_calls(&self, id: DocumentId) -> Vec<InvocationReasons> {
		self.calls
			.lock()
			.iter()
			.filter_map(|call| match call {
				Call::Document { id: d, reasons, .. } if *d == id => Some(reasons.clone()),
				_ => None,
			})
			.collect()
	}

	pub fn documents_analyzed(&self) -> Vec<DocumentId> {
		self.calls
			.lock()
			.iter()
			.filter_map(|call| match call {
				Call::Document { id, .. } => Some(*id),
				_ => None,
			})
			.collect()
	}

	pub fn project_calls(&self) -> Vec<(ProjectId, bool, InvocationReasons)> {
		self.calls
			.lock()
			.iter()
			.filter_map(|call| match call {
				Call::Project {
					id,
					semantics_changed,
					reasons,
				} => Some((*id, *semantics_changed, reasons.clone())),
				_ => None,
			})
			.collect()
	}

	pub fn count(&self, wanted: &Call) -> usize {
		self.calls.lock().iter().filter(|call| *call == wanted).count()
	}

	fn record(&self, call: Call) {
		self.calls.lock().push(call);
	}
}

#[async_trait]
impl IncrementalAnalyzer for RecordingAnalyzer {
	fn name(&self) -> &str {
		"recording"
	}

	async fn analyze_syntax(&self, document: &TextDocument, _reasons: &InvocationReasons, _cancel: &CancellationToken) -> AnalyzerResult {
		self.record(Call::Syntax(document.id()));
		Ok(())
	}

	async fn analyze_document(
		&self,
		document: &TextDocument,
		body: Option<&SyntaxPath>,
		reasons: &InvocationReasons,
		cancel: &CancellationToken,
	) -> AnalyzerResult {
		self.record(Call::Document {
			id: document.id(),
			body: body.cloned(),
			reasons: reasons.clone(),
		});
		if self.fault.load(Ordering::SeqCst) {
			return Err(AnalyzerError::fault("analyzer exploded"));
		}
		if self.block_next_document.swap(false, Ordering::SeqCst) {
			self.entered.notify_one();
			cancel.cancelled().await;
			return Err(AnalyzerError::Cancelled);
		}
		Ok(())
	}

	async fn analyze_project(&self, project: &Project, semantics_changed: bool, reasons: &InvocationReasons, cancel: &CancellationToken) -> AnalyzerResult {
		if self.documents_analyzed().len() < self.expected_documents.load(Ordering::SeqCst) {
			self.early_project_passes.fetch_add(1, Ordering::SeqCst);
		}
		self.record(Call::Project {
			id: project.id(),
			semantics_changed,
			reasons: reasons.clone(),
		});
		if self.block_next_project.swap(false, Ordering::SeqCst) {
			self.entered.notify_one();
			cancel.cancelled().await;
			return Err(AnalyzerError::Cancelled);
		}
		Ok(())
	}

	async fn remove_document(&self, document_id: DocumentId, _cancel: &CancellationToken) -> AnalyzerResult {
		self.record(Call::RemoveDocument(document_id));
		Ok(())
	}

	async fn remove_project(&self, project_id: ProjectId, _cancel: &CancellationToken) -> AnalyzerResult {
		self.record(Call::RemoveProject(project_id));
		Ok(())
	}

	async fn document_open(&self, document: &TextDocument, _cancel: &CancellationToken) -> AnalyzerResult {
		self.record(Call::Open(document.id()));
		Ok(())
	}

	async fn document_close(&self, document: &TextDocument, _cancel: &CancellationToken) -> AnalyzerResult {
		self.record(Call::Close(document.id()));
		Ok(())
	}

	async fn document_reset(&self, document: &TextDocument, _cancel: &CancellationToken) -> AnalyzerResult {
		self.record(Call::Reset(document.id()));
		Ok(())
	}

	fn needs_reanalysis_on_option_changed(&self, option: &str) -> bool {
		option == "recording.enabled"
	}
}

/// Hands out one shared analyzer.
pub struct SharedProvider(pub Arc<RecordingAnalyzer>);

impl IncrementalAnalyzerProvider for SharedProvider {
	fn create_incremental_analyzer(&self, _workspace_kind: &str) -> Option<Arc<dyn IncrementalAnalyzer>> {
		Some(Arc::clone(&self.0) as Arc<dyn IncrementalAnalyzer>)
	}
}

/// A registration service with one recording analyzer and a live coordinator.
pub struct Harness {
	pub service: SolutionCrawlerRegistrationService,
	pub services: Arc<HostServices>,
	pub coordinator: Arc<WorkCoordinator>,
	pub analyzer: Arc<RecordingAnalyzer>,
}

pub fn harness(services: HostServices, solution: Arc<Solution>, options: CrawlerOptions) -> Harness {
	init_tracing();
	let service = SolutionCrawlerRegistrationService::new(options);
	let analyzer = RecordingAnalyzer::new();
	service.add_analyzer_provider(Arc::new(SharedProvider(Arc::clone(&analyzer))), ProviderMetadata::new("recording"));
	let services = Arc::new(services);
	let coordinator = service.register(KIND, &services, solution).expect("crawler enabled");
	Harness {
		service,
		services,
		coordinator,
		analyzer,
	}
}

pub fn document_event(kind: WorkspaceChangeKind, old: &Arc<Solution>, new: &Arc<Solution>, id: DocumentId) -> WorkspaceChangeEvent {
	WorkspaceChangeEvent::new(kind, Arc::clone(old), Arc::clone(new)).with_document(id)
}
