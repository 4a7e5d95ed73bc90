//! Invocation reasons: the tag set explaining why a work item exists.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Well-known reason tags.
pub mod predefined {
	pub const DOCUMENT_ADDED: &str = "DocumentAdded";
	pub const DOCUMENT_REMOVED: &str = "DocumentRemoved";
	pub const DOCUMENT_OPENED: &str = "DocumentOpened";
	pub const DOCUMENT_CLOSED: &str = "DocumentClosed";
	pub const HIGH_PRIORITY: &str = "HighPriority";
	pub const PROJECT_PARSE_OPTIONS_CHANGED: &str = "ProjectParseOptionsChanged";
	pub const PROJECT_CONFIGURATION_CHANGED: &str = "ProjectConfigurationChanged";
	pub const SOLUTION_REMOVED: &str = "SolutionRemoved";
	pub const SEMANTIC_CHANGED: &str = "SemanticChanged";
	pub const SYNTAX_CHANGED: &str = "SyntaxChanged";
	pub const REANALYZE: &str = "Reanalyze";
}

use predefined::*;

/// Tags that make a project-level analysis pass worthwhile.
const PROJECT_SCOPE: [&str; 5] = [
	PROJECT_PARSE_OPTIONS_CHANGED,
	PROJECT_CONFIGURATION_CHANGED,
	DOCUMENT_REMOVED,
	SOLUTION_REMOVED,
	REANALYZE,
];

/// Immutable, order-irrelevant set of reason tags.
///
/// Union is associative and idempotent. The empty set is a valid value that
/// means "nothing to do".
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct InvocationReasons {
	tags: Arc<BTreeSet<Arc<str>>>,
}

impl InvocationReasons {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn from_tags<I, S>(tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<Arc<str>>,
	{
		Self {
			tags: Arc::new(tags.into_iter().map(Into::into).collect()),
		}
	}

	pub fn document_added() -> Self {
		Self::from_tags([DOCUMENT_ADDED, SYNTAX_CHANGED, SEMANTIC_CHANGED])
	}

	pub fn document_removed() -> Self {
		Self::from_tags([DOCUMENT_REMOVED, SYNTAX_CHANGED, SEMANTIC_CHANGED, HIGH_PRIORITY])
	}

	pub fn document_changed() -> Self {
		Self::from_tags([SYNTAX_CHANGED, SEMANTIC_CHANGED])
	}

	/// Additional and analyzer-config documents feed project configuration.
	pub fn additional_document_changed() -> Self {
		Self::from_tags([SYNTAX_CHANGED, SEMANTIC_CHANGED, PROJECT_CONFIGURATION_CHANGED])
	}

	pub fn project_parse_options_changed() -> Self {
		Self::from_tags([PROJECT_PARSE_OPTIONS_CHANGED, SYNTAX_CHANGED, SEMANTIC_CHANGED])
	}

	pub fn project_configuration_changed() -> Self {
		Self::from_tags([PROJECT_CONFIGURATION_CHANGED, SYNTAX_CHANGED, SEMANTIC_CHANGED])
	}

	pub fn solution_removed() -> Self {
		Self::from_tags([SOLUTION_REMOVED, DOCUMENT_REMOVED])
	}

	pub fn document_opened() -> Self {
		Self::from_tags([DOCUMENT_OPENED, HIGH_PRIORITY])
	}

	pub fn document_closed() -> Self {
		Self::from_tags([DOCUMENT_CLOSED])
	}

	pub fn syntax_changed() -> Self {
		Self::from_tags([SYNTAX_CHANGED])
	}

	pub fn semantic_changed() -> Self {
		Self::from_tags([SEMANTIC_CHANGED])
	}

	pub fn reanalyze() -> Self {
		Self::from_tags([REANALYZE])
	}

	pub fn reanalyze_high_priority() -> Self {
		Self::from_tags([REANALYZE, HIGH_PRIORITY])
	}

	/// Union of both sets.
	#[must_use]
	pub fn with(&self, other: &InvocationReasons) -> Self {
		if other.tags.is_subset(&self.tags) {
			return self.clone();
		}
		if self.tags.is_subset(&other.tags) {
			return other.clone();
		}
		Self {
			tags: Arc::new(self.tags.union(&other.tags).cloned().collect()),
		}
	}

	#[must_use]
	pub fn with_tag(&self, tag: &str) -> Self {
		if self.contains(tag) {
			return self.clone();
		}
		let mut tags = BTreeSet::clone(&self.tags);
		tags.insert(Arc::from(tag));
		Self { tags: Arc::new(tags) }
	}

	pub fn contains(&self, tag: &str) -> bool {
		self.tags.contains(tag)
	}

	pub fn is_superset(&self, other: &InvocationReasons) -> bool {
		self.tags.is_superset(&other.tags)
	}

	pub fn is_empty(&self) -> bool {
		self.tags.is_empty()
	}

	pub fn len(&self) -> usize {
		self.tags.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.tags.iter().map(|t| &**t)
	}

	/// Whether the low-priority processor should run a project pass for these reasons.
	pub fn requires_project_analysis(&self) -> bool {
		PROJECT_SCOPE.iter().any(|tag| self.contains(tag))
	}
}

impl fmt::Debug for InvocationReasons {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.iter()).finish()
	}
}

impl fmt::Display for InvocationReasons {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, tag) in self.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			f.write_str(tag)?;
		}
		Ok(())
	}
}
