//! Immutable solution snapshots and the workspace change events the crawler consumes.
//!
//! Snapshots are cheap to clone: projects sit behind [`Arc`] and every update
//! returns a new [`Solution`], leaving the old one untouched. The crawler never
//! computes syntax or semantics itself, so a document is only identity, kind,
//! text, and a content version.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Identity of a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SolutionId(pub u32);

/// Identity of a project within a solution.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(u32);

impl ProjectId {
	pub const fn new(raw: u32) -> Self {
		Self(raw)
	}

	pub const fn raw(self) -> u32 {
		self.0
	}
}

impl fmt::Debug for ProjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "P{}", self.0)
	}
}

/// Identity of a document. Always carries the owning project.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId {
	project_id: ProjectId,
	raw: u32,
}

impl DocumentId {
	pub const fn new(project_id: ProjectId, raw: u32) -> Self {
		Self { project_id, raw }
	}

	pub const fn project_id(self) -> ProjectId {
		self.project_id
	}

	pub const fn raw(self) -> u32 {
		self.raw
	}
}

impl fmt::Debug for DocumentId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "P{}/D{}", self.project_id.0, self.raw)
	}
}

/// What a text document is to its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
	/// Compiled source; the only kind that gets semantic analysis.
	Source,
	/// Additional (non-compiled) file consumed by analyzers.
	Additional,
	/// Analyzer configuration such as `.editorconfig`.
	AnalyzerConfig,
}

/// One document snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
	id: DocumentId,
	name: Arc<str>,
	kind: DocumentKind,
	text: Arc<str>,
	version: u64,
}

impl TextDocument {
	/// Creates a source document at version 0.
	pub fn new(id: DocumentId, name: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
		Self {
			id,
			name: name.into(),
			kind: DocumentKind::Source,
			text: text.into(),
			version: 0,
		}
	}

	#[must_use]
	pub fn with_kind(mut self, kind: DocumentKind) -> Self {
		self.kind = kind;
		self
	}

	/// Returns a copy with new text and a bumped version.
	#[must_use]
	pub fn with_text(&self, text: impl Into<Arc<str>>) -> Self {
		Self {
			text: text.into(),
			version: self.version + 1,
			..self.clone()
		}
	}

	pub fn id(&self) -> DocumentId {
		self.id
	}

	pub fn project_id(&self) -> ProjectId {
		self.id.project_id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn kind(&self) -> DocumentKind {
		self.kind
	}

	pub fn is_source(&self) -> bool {
		self.kind == DocumentKind::Source
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	pub fn version(&self) -> u64 {
		self.version
	}
}

/// One project snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
	id: ProjectId,
	name: Arc<str>,
	language: Arc<str>,
	assembly_name: Arc<str>,
	documents: BTreeMap<DocumentId, TextDocument>,
	project_references: BTreeSet<ProjectId>,
	internals_visible_to: BTreeSet<Arc<str>>,
	parse_options: Arc<str>,
	compilation_options: Arc<str>,
}

impl Project {
	/// Creates an empty project whose assembly name equals its name.
	pub fn new(id: ProjectId, name: impl Into<Arc<str>>, language: impl Into<Arc<str>>) -> Self {
		let name = name.into();
		Self {
			id,
			assembly_name: Arc::clone(&name),
			name,
			language: language.into(),
			documents: BTreeMap::new(),
			project_references: BTreeSet::new(),
			internals_visible_to: BTreeSet::new(),
			parse_options: Arc::from(""),
			compilation_options: Arc::from(""),
		}
	}

	#[must_use]
	pub fn with_document(mut self, document: TextDocument) -> Self {
		debug_assert_eq!(document.project_id(), self.id, "document belongs to another project");
		self.documents.insert(document.id(), document);
		self
	}

	#[must_use]
	pub fn without_document(mut self, id: DocumentId) -> Self {
		self.documents.remove(&id);
		self
	}

	#[must_use]
	pub fn with_reference(mut self, project: ProjectId) -> Self {
		self.project_references.insert(project);
		self
	}

	#[must_use]
	pub fn with_assembly_name(mut self, assembly_name: impl Into<Arc<str>>) -> Self {
		self.assembly_name = assembly_name.into();
		self
	}

	/// Grants `assembly_name` access to this project's internal symbols.
	#[must_use]
	pub fn with_internals_visible_to(mut self, assembly_name: impl Into<Arc<str>>) -> Self {
		self.internals_visible_to.insert(assembly_name.into());
		self
	}

	#[must_use]
	pub fn with_parse_options(mut self, options: impl Into<Arc<str>>) -> Self {
		self.parse_options = options.into();
		self
	}

	#[must_use]
	pub fn with_compilation_options(mut self, options: impl Into<Arc<str>>) -> Self {
		self.compilation_options = options.into();
		self
	}

	pub fn id(&self) -> ProjectId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn language(&self) -> &str {
		&self.language
	}

	pub fn assembly_name(&self) -> &str {
		&self.assembly_name
	}

	pub fn document(&self, id: DocumentId) -> Option<&TextDocument> {
		self.documents.get(&id)
	}

	pub fn documents(&self) -> impl Iterator<Item = &TextDocument> {
		self.documents.values()
	}

	pub fn document_ids(&self) -> impl Iterator<Item = DocumentId> + '_ {
		self.documents.keys().copied()
	}

	pub fn references(&self, project: ProjectId) -> bool {
		self.project_references.contains(&project)
	}

	/// Whether `other` may see this project's internal symbols.
	pub fn grants_friend_access_to(&self, other: &Project) -> bool {
		self.id == other.id || self.internals_visible_to.contains(other.assembly_name())
	}

	/// Diffs this project against an older snapshot of itself.
	pub fn changes(&self, old: &Project) -> ProjectChanges {
		let mut changes = ProjectChanges::default();
		let mut non_source_changed = false;

		for (id, doc) in &self.documents {
			match old.documents.get(id) {
				None => {
					non_source_changed |= !doc.is_source();
					changes.added_documents.push(*id);
				}
				Some(prev) if prev != doc => {
					non_source_changed |= !doc.is_source();
					changes.changed_documents.push(*id);
				}
				Some(_) => {}
			}
		}
		for (id, doc) in &old.documents {
			if !self.documents.contains_key(id) {
				non_source_changed |= !doc.is_source();
				changes.removed_documents.push(*id);
			}
		}

		changes.parse_options_changed = self.parse_options != old.parse_options;
		changes.configuration_changed = non_source_changed
			|| self.name != old.name
			|| self.assembly_name != old.assembly_name
			|| self.compilation_options != old.compilation_options
			|| self.project_references != old.project_references
			|| self.internals_visible_to != old.internals_visible_to;
		changes
	}
}

/// Differences between two snapshots of one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectChanges {
	pub added_documents: Vec<DocumentId>,
	pub removed_documents: Vec<DocumentId>,
	pub changed_documents: Vec<DocumentId>,
	pub parse_options_changed: bool,
	/// References, options, identity, or non-source documents changed.
	pub configuration_changed: bool,
}

/// Differences between two solution snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolutionChanges {
	pub added_projects: Vec<ProjectId>,
	pub removed_projects: Vec<ProjectId>,
	pub changed_projects: Vec<ProjectId>,
}

/// One solution snapshot.
#[derive(Debug, Clone)]
pub struct Solution {
	id: SolutionId,
	version: u64,
	projects: BTreeMap<ProjectId, Arc<Project>>,
}

impl Solution {
	pub fn new(id: SolutionId) -> Self {
		Self {
			id,
			version: 0,
			projects: BTreeMap::new(),
		}
	}

	fn bumped(&self) -> Self {
		Self {
			version: self.version + 1,
			..self.clone()
		}
	}

	/// Adds or replaces a project.
	#[must_use]
	pub fn with_project(&self, project: Project) -> Self {
		let mut next = self.bumped();
		next.projects.insert(project.id(), Arc::new(project));
		next
	}

	#[must_use]
	pub fn without_project(&self, id: ProjectId) -> Self {
		let mut next = self.bumped();
		next.projects.remove(&id);
		next
	}

	/// Adds or replaces a document in its (existing) project.
	#[must_use]
	pub fn with_document(&self, document: TextDocument) -> Self {
		match self.projects.get(&document.project_id()) {
			Some(project) => self.with_project(Project::clone(project).with_document(document)),
			None => self.clone(),
		}
	}

	#[must_use]
	pub fn without_document(&self, id: DocumentId) -> Self {
		match self.projects.get(&id.project_id()) {
			Some(project) => self.with_project(Project::clone(project).without_document(id)),
			None => self.clone(),
		}
	}

	/// Replaces a document's text, bumping its version.
	#[must_use]
	pub fn with_document_text(&self, id: DocumentId, text: impl Into<Arc<str>>) -> Self {
		match self.document(id) {
			Some(doc) => self.with_document(doc.with_text(text)),
			None => self.clone(),
		}
	}

	pub fn id(&self) -> SolutionId {
		self.id
	}

	pub fn version(&self) -> u64 {
		self.version
	}

	pub fn project(&self, id: ProjectId) -> Option<&Arc<Project>> {
		self.projects.get(&id)
	}

	pub fn projects(&self) -> impl Iterator<Item = &Arc<Project>> {
		self.projects.values()
	}

	pub fn project_ids(&self) -> impl Iterator<Item = ProjectId> + '_ {
		self.projects.keys().copied()
	}

	pub fn document(&self, id: DocumentId) -> Option<&TextDocument> {
		self.projects.get(&id.project_id()).and_then(|p| p.document(id))
	}

	/// Projects holding a direct reference to `id`. Transitive dependents are not included.
	pub fn projects_that_directly_depend_on(&self, id: ProjectId) -> Vec<ProjectId> {
		self.projects.values().filter(|p| p.references(id)).map(|p| p.id()).collect()
	}

	/// Diffs this snapshot against an older one.
	pub fn changes(&self, old: &Solution) -> SolutionChanges {
		let mut changes = SolutionChanges::default();
		for (id, project) in &self.projects {
			match old.projects.get(id) {
				None => changes.added_projects.push(*id),
				Some(prev) if !Arc::ptr_eq(prev, project) && prev != project => changes.changed_projects.push(*id),
				Some(_) => {}
			}
		}
		changes.removed_projects = old.projects.keys().filter(|id| !self.projects.contains_key(*id)).copied().collect();
		changes
	}
}

/// Kind of workspace change being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceChangeKind {
	SolutionAdded,
	SolutionChanged,
	SolutionRemoved,
	SolutionCleared,
	SolutionReloaded,
	ProjectAdded,
	ProjectChanged,
	ProjectRemoved,
	ProjectReloaded,
	DocumentAdded,
	DocumentChanged,
	DocumentRemoved,
	DocumentReloaded,
	AdditionalDocumentAdded,
	AdditionalDocumentChanged,
	AdditionalDocumentRemoved,
	AdditionalDocumentReloaded,
	AnalyzerConfigDocumentAdded,
	AnalyzerConfigDocumentChanged,
	AnalyzerConfigDocumentRemoved,
	AnalyzerConfigDocumentReloaded,
}

/// One workspace change notification.
#[derive(Debug, Clone)]
pub struct WorkspaceChangeEvent {
	pub kind: WorkspaceChangeKind,
	pub old_solution: Arc<Solution>,
	pub new_solution: Arc<Solution>,
	pub project_id: Option<ProjectId>,
	pub document_id: Option<DocumentId>,
}

impl WorkspaceChangeEvent {
	pub fn new(kind: WorkspaceChangeKind, old_solution: Arc<Solution>, new_solution: Arc<Solution>) -> Self {
		Self {
			kind,
			old_solution,
			new_solution,
			project_id: None,
			document_id: None,
		}
	}

	#[must_use]
	pub fn with_project(mut self, id: ProjectId) -> Self {
		self.project_id = Some(id);
		self
	}

	/// Sets the affected document and its project.
	#[must_use]
	pub fn with_document(mut self, id: DocumentId) -> Self {
		self.project_id = Some(id.project_id());
		self.document_id = Some(id);
		self
	}
}
