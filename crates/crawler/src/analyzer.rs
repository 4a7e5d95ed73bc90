//! The contract between the crawler and the analyzers it drives.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AnalyzerResult;
use crate::reasons::InvocationReasons;
use crate::services::SyntaxPath;
use crate::workspace::{DocumentId, Project, ProjectId, TextDocument};

/// An analyzer invoked incrementally as documents and projects change.
///
/// Only [`analyze_document`](Self::analyze_document),
/// [`analyze_project`](Self::analyze_project) and
/// [`remove_document`](Self::remove_document) are required; the other hooks
/// default to no-ops. Every call receives a token minted for that unit of work;
/// returning [`AnalyzerError::Cancelled`](crate::AnalyzerError::Cancelled) after
/// observing it is the expected way to bail out.
#[async_trait]
pub trait IncrementalAnalyzer: Send + Sync + 'static {
	/// Name used in logs and fault reports.
	fn name(&self) -> &str {
		std::any::type_name::<Self>()
	}

	async fn analyze_syntax(&self, _document: &TextDocument, _reasons: &InvocationReasons, _cancel: &CancellationToken) -> AnalyzerResult {
		Ok(())
	}

	/// Analyzes a source document. `body` narrows the work to one member when set.
	async fn analyze_document(
		&self,
		document: &TextDocument,
		body: Option<&SyntaxPath>,
		reasons: &InvocationReasons,
		cancel: &CancellationToken,
	) -> AnalyzerResult;

	async fn analyze_project(&self, project: &Project, semantics_changed: bool, reasons: &InvocationReasons, cancel: &CancellationToken) -> AnalyzerResult;

	async fn remove_document(&self, document_id: DocumentId, cancel: &CancellationToken) -> AnalyzerResult;

	async fn remove_project(&self, _project_id: ProjectId, _cancel: &CancellationToken) -> AnalyzerResult {
		Ok(())
	}

	async fn document_open(&self, _document: &TextDocument, _cancel: &CancellationToken) -> AnalyzerResult {
		Ok(())
	}

	async fn document_close(&self, _document: &TextDocument, _cancel: &CancellationToken) -> AnalyzerResult {
		Ok(())
	}

	/// Drops cached state for a document before a forced reanalysis.
	async fn document_reset(&self, _document: &TextDocument, _cancel: &CancellationToken) -> AnalyzerResult {
		Ok(())
	}

	fn needs_reanalysis_on_option_changed(&self, _option: &str) -> bool {
		false
	}
}

/// Shared analyzer handle compared by identity.
#[derive(Clone)]
pub struct AnalyzerRef(Arc<dyn IncrementalAnalyzer>);

impl AnalyzerRef {
	pub fn new(analyzer: Arc<dyn IncrementalAnalyzer>) -> Self {
		Self(analyzer)
	}

	fn addr(&self) -> *const () {
		Arc::as_ptr(&self.0) as *const ()
	}
}

impl From<Arc<dyn IncrementalAnalyzer>> for AnalyzerRef {
	fn from(analyzer: Arc<dyn IncrementalAnalyzer>) -> Self {
		Self(analyzer)
	}
}

impl Deref for AnalyzerRef {
	type Target = dyn IncrementalAnalyzer;

	fn deref(&self) -> &Self::Target {
		&*self.0
	}
}

impl PartialEq for AnalyzerRef {
	fn eq(&self, other: &Self) -> bool {
		std::ptr::eq(self.addr(), other.addr())
	}
}

impl Eq for AnalyzerRef {}

impl Hash for AnalyzerRef {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.addr().hash(state);
	}
}

impl fmt::Debug for AnalyzerRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("AnalyzerRef").field(&self.0.name()).finish()
	}
}

/// Creates analyzers for a workspace kind.
pub trait IncrementalAnalyzerProvider: Send + Sync {
	/// Returns `None` to decline for this workspace kind.
	fn create_incremental_analyzer(&self, workspace_kind: &str) -> Option<Arc<dyn IncrementalAnalyzer>>;
}

/// Registration metadata for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
	pub name: String,
	/// Workspace kinds served. Empty marks the default provider for `name`.
	pub workspace_kinds: Vec<String>,
}

impl ProviderMetadata {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			workspace_kinds: Vec::new(),
		}
	}

	#[must_use]
	pub fn for_kind(mut self, kind: impl Into<String>) -> Self {
		self.workspace_kinds.push(kind.into());
		self
	}

	pub fn is_default(&self) -> bool {
		self.workspace_kinds.is_empty()
	}

	pub fn serves(&self, kind: &str) -> bool {
		self.workspace_kinds.iter().any(|k| k == kind)
	}
}

/// A provider paired with its metadata.
#[derive(Clone)]
pub struct ProviderEntry {
	pub provider: Arc<dyn IncrementalAnalyzerProvider>,
	pub metadata: ProviderMetadata,
}

impl fmt::Debug for ProviderEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProviderEntry").field("metadata", &self.metadata).finish_non_exhaustive()
	}
}
