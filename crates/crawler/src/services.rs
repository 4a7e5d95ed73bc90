//! Host and per-language services the crawler consults but does not implement.
//!
//! Every language service is optional. A missing service selects the
//! conservative path: whole-document change, normal priority, whole-document
//! analysis, full dependency fan-out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{FatalErrorReporter, TracingFatalErrorReporter};
use crate::reasons::InvocationReasons;
use crate::workspace::{DocumentId, ProjectId, TextDocument};

/// Structural path from a syntax root to a node, as child indices.
///
/// Used as a change-locality hint: it names the member an edit touched
/// without holding on to a syntax tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyntaxPath(Arc<[u32]>);

impl SyntaxPath {
	pub fn new(steps: impl Into<Arc<[u32]>>) -> Self {
		Self(steps.into())
	}

	pub fn steps(&self) -> &[u32] {
		&self.0
	}
}

/// What changed between two versions of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDifference {
	pub reasons: InvocationReasons,
	pub changed_member: Option<SyntaxPath>,
}

/// Classifies a document edit.
#[async_trait]
pub trait DocumentDifferenceService: Send + Sync {
	/// Returns `None` when the two versions are equivalent.
	async fn difference(&self, old: &TextDocument, new: &TextDocument, cancel: &CancellationToken) -> Option<DocumentDifference>;
}

/// Marks documents (e.g. huge generated files) that should yield to everything else.
#[async_trait]
pub trait WorkCoordinatorPriorityService: Send + Sync {
	async fn is_low_priority(&self, document: &TextDocument, cancel: &CancellationToken) -> bool;
}

/// Maps member hints onto the document's current syntax.
pub trait SyntaxService: Send + Sync {
	/// Resolves `hint` to a member body in `document`. `None` when the syntax
	/// root is unavailable or the hint lands outside any member.
	fn resolve_member(&self, document: &TextDocument, hint: &SyntaxPath) -> Option<SyntaxPath>;
}

/// Declared-symbol lookup over an already computed semantic model.
pub trait SemanticModelService: Send + Sync {
	/// Returns `None` when no semantic model is cached or the hint does not resolve.
	fn declared_symbol(&self, document: &TextDocument, hint: &SyntaxPath) -> Option<DeclaredSymbol>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
	Type,
	Method,
	Property,
	Field,
	Event,
	Namespace,
	Other,
}

impl SymbolKind {
	pub fn is_type(self) -> bool {
		self == Self::Type
	}

	pub fn is_member(self) -> bool {
		matches!(self, Self::Method | Self::Property | Self::Field | Self::Event)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessibility {
	Private,
	ProtectedAndInternal,
	Protected,
	Internal,
	ProtectedOrInternal,
	Public,
}

impl Accessibility {
	pub fn is_private(self) -> bool {
		self == Self::Private
	}

	/// Visible to the declaring assembly and its friends only.
	pub fn is_internal(self) -> bool {
		matches!(self, Self::Internal | Self::ProtectedAndInternal | Self::ProtectedOrInternal)
	}
}

/// The facts about a declared symbol the semantic fan-out needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSymbol {
	pub name: String,
	pub kind: SymbolKind,
	pub accessibility: Accessibility,
	pub containing_type: Option<Box<DeclaredSymbol>>,
	/// Documents holding a declaration of the symbol.
	pub locations: Vec<DocumentId>,
	pub containing_project: ProjectId,
}

/// Optional services for one language.
#[derive(Clone, Default)]
pub struct LanguageServices {
	pub difference: Option<Arc<dyn DocumentDifferenceService>>,
	pub priority: Option<Arc<dyn WorkCoordinatorPriorityService>>,
	pub syntax: Option<Arc<dyn SyntaxService>>,
	pub semantics: Option<Arc<dyn SemanticModelService>>,
}

impl LanguageServices {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_difference(mut self, service: Arc<dyn DocumentDifferenceService>) -> Self {
		self.difference = Some(service);
		self
	}

	#[must_use]
	pub fn with_priority(mut self, service: Arc<dyn WorkCoordinatorPriorityService>) -> Self {
		self.priority = Some(service);
		self
	}

	#[must_use]
	pub fn with_syntax(mut self, service: Arc<dyn SyntaxService>) -> Self {
		self.syntax = Some(service);
		self
	}

	#[must_use]
	pub fn with_semantics(mut self, service: Arc<dyn SemanticModelService>) -> Self {
		self.semantics = Some(service);
		self
	}
}

impl fmt::Debug for LanguageServices {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LanguageServices")
			.field("difference", &self.difference.is_some())
			.field("priority", &self.priority.is_some())
			.field("syntax", &self.syntax.is_some())
			.field("semantics", &self.semantics.is_some())
			.finish()
	}
}

/// Reports which documents the user is looking at.
pub trait DocumentTrackingService: Send + Sync {
	fn active_document(&self) -> Option<DocumentId>;

	/// Visible documents other than the active one.
	fn visible_documents(&self) -> Vec<DocumentId>;
}

/// [`DocumentTrackingService`] whose state the host sets directly.
#[derive(Debug, Default)]
pub struct SharedDocumentTracker {
	active: RwLock<Option<DocumentId>>,
	visible: RwLock<Vec<DocumentId>>,
}

impl SharedDocumentTracker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_active(&self, document: Option<DocumentId>) {
		*self.active.write() = document;
	}

	pub fn set_visible(&self, documents: Vec<DocumentId>) {
		*self.visible.write() = documents;
	}
}

impl DocumentTrackingService for SharedDocumentTracker {
	fn active_document(&self) -> Option<DocumentId> {
		*self.active.read()
	}

	fn visible_documents(&self) -> Vec<DocumentId> {
		self.visible.read().clone()
	}
}

/// Services handed to a work coordinator at registration.
pub struct HostServices {
	languages: HashMap<String, LanguageServices>,
	document_tracker: Option<Arc<dyn DocumentTrackingService>>,
	fatal_errors: Arc<dyn FatalErrorReporter>,
}

impl Default for HostServices {
	fn default() -> Self {
		Self::new()
	}
}

impl HostServices {
	pub fn new() -> Self {
		Self {
			languages: HashMap::new(),
			document_tracker: None,
			fatal_errors: Arc::new(TracingFatalErrorReporter),
		}
	}

	#[must_use]
	pub fn with_language(mut self, language: impl Into<String>, services: LanguageServices) -> Self {
		self.languages.insert(language.into(), services);
		self
	}

	#[must_use]
	pub fn with_document_tracker(mut self, tracker: Arc<dyn DocumentTrackingService>) -> Self {
		self.document_tracker = Some(tracker);
		self
	}

	#[must_use]
	pub fn with_fatal_error_reporter(mut self, reporter: Arc<dyn FatalErrorReporter>) -> Self {
		self.fatal_errors = reporter;
		self
	}

	pub fn language(&self, language: &str) -> Option<&LanguageServices> {
		self.languages.get(language)
	}

	pub fn document_tracker(&self) -> Option<&Arc<dyn DocumentTrackingService>> {
		self.document_tracker.as_ref()
	}

	pub fn fatal_errors(&self) -> &dyn FatalErrorReporter {
		&*self.fatal_errors
	}
}

impl fmt::Debug for HostServices {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HostServices")
			.field("languages", &self.languages)
			.field("document_tracker", &self.document_tracker.is_some())
			.finish_non_exhaustive()
	}
}
