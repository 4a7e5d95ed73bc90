//! Work items: the unit of deferred re-analysis.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use trawl_worker::AsyncToken;

use crate::analyzer::AnalyzerRef;
use crate::reasons::{InvocationReasons, predefined};
use crate::services::SyntaxPath;
use crate::workspace::{DocumentId, ProjectId};

/// Identity a queue coalesces on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkItemKey {
	Document(DocumentId),
	Project(ProjectId),
}

/// Pending re-analysis of one document or one project.
///
/// Not `Clone`: each item owns the [`AsyncToken`] accounting for it, and
/// every operation that replaces an item hands the superseded token back to
/// the caller to drop.
pub struct WorkItem {
	project_id: ProjectId,
	document_id: Option<DocumentId>,
	language: Arc<str>,
	reasons: InvocationReasons,
	is_low_priority: bool,
	active_member: Option<SyntaxPath>,
	specific_analyzers: IndexSet<AnalyzerRef>,
	is_retry: bool,
	token: AsyncToken,
}

impl WorkItem {
	pub fn for_document(document_id: DocumentId, language: impl Into<Arc<str>>, reasons: InvocationReasons, token: AsyncToken) -> Self {
		Self {
			project_id: document_id.project_id(),
			document_id: Some(document_id),
			language: language.into(),
			reasons,
			is_low_priority: false,
			active_member: None,
			specific_analyzers: IndexSet::new(),
			is_retry: false,
			token,
		}
	}

	pub fn for_project(project_id: ProjectId, language: impl Into<Arc<str>>, reasons: InvocationReasons, token: AsyncToken) -> Self {
		Self {
			project_id,
			document_id: None,
			language: language.into(),
			reasons,
			is_low_priority: false,
			active_member: None,
			specific_analyzers: IndexSet::new(),
			is_retry: false,
			token,
		}
	}

	#[must_use]
	pub fn low_priority(mut self, is_low_priority: bool) -> Self {
		self.is_low_priority = is_low_priority;
		self
	}

	#[must_use]
	pub fn with_active_member(mut self, member: Option<SyntaxPath>) -> Self {
		self.active_member = member;
		self
	}

	/// Restricts the item to `analyzers`. An empty set means every analyzer.
	#[must_use]
	pub fn with_specific_analyzers(mut self, analyzers: impl IntoIterator<Item = AnalyzerRef>) -> Self {
		self.specific_analyzers = analyzers.into_iter().collect();
		self
	}

	pub fn key(&self) -> WorkItemKey {
		match self.document_id {
			Some(id) => WorkItemKey::Document(id),
			None => WorkItemKey::Project(self.project_id),
		}
	}

	pub fn project_id(&self) -> ProjectId {
		self.project_id
	}

	pub fn document_id(&self) -> Option<DocumentId> {
		self.document_id
	}

	pub fn language(&self) -> &str {
		&self.language
	}

	pub fn reasons(&self) -> &InvocationReasons {
		&self.reasons
	}

	pub fn is_low_priority(&self) -> bool {
		self.is_low_priority
	}

	/// Flagged by its reasons as something the user is waiting for.
	pub fn is_high_priority(&self) -> bool {
		self.reasons.contains(predefined::HIGH_PRIORITY)
	}

	pub fn active_member(&self) -> Option<&SyntaxPath> {
		self.active_member.as_ref()
	}

	pub fn specific_analyzers(&self) -> impl Iterator<Item = &AnalyzerRef> {
		self.specific_analyzers.iter()
	}

	pub fn is_retry(&self) -> bool {
		self.is_retry
	}

	/// A retried item reruns every analysis category.
	pub fn must_refresh(&self) -> bool {
		self.is_retry
	}

	/// The analyzers this item targets, in `all` order.
	pub fn applicable_analyzers(&self, all: &[AnalyzerRef]) -> Vec<AnalyzerRef> {
		if self.specific_analyzers.is_empty() {
			return all.to_vec();
		}
		all.iter().filter(|a| self.specific_analyzers.contains(*a)).cloned().collect()
	}

	/// Folds a newer item for the same key into this one.
	///
	/// Reasons and retry flags accumulate, low priority sticks, the member hint
	/// survives only if both sides agree, and "all analyzers" absorbs any
	/// specific set. The item takes the newer token; the superseded one is
	/// returned for the caller to drop.
	pub(crate) fn absorb(&mut self, newer: WorkItem) -> AsyncToken {
		debug_assert_eq!(self.key(), newer.key(), "merging work items for different keys");
		self.reasons = self.reasons.with(&newer.reasons);
		self.is_low_priority |= newer.is_low_priority;
		self.is_retry |= newer.is_retry;
		if self.active_member != newer.active_member {
			self.active_member = None;
		}
		if self.specific_analyzers.is_empty() || newer.specific_analyzers.is_empty() {
			self.specific_analyzers.clear();
		} else {
			self.specific_analyzers.extend(newer.specific_analyzers);
		}
		std::mem::replace(&mut self.token, newer.token)
	}

	/// Swaps the accounting token, returning the old one.
	pub(crate) fn with_token(mut self, token: AsyncToken) -> (WorkItem, AsyncToken) {
		let stale = std::mem::replace(&mut self.token, token);
		(self, stale)
	}

	/// Marks the item for re-enqueueing after an interrupted attempt.
	pub(crate) fn into_retry(mut self, token: AsyncToken) -> (WorkItem, AsyncToken) {
		self.is_retry = true;
		self.with_token(token)
	}

	/// Project-level copy for the low-priority queue. Member hints do not apply there.
	pub(crate) fn to_project_work_item(&self, token: AsyncToken) -> WorkItem {
		WorkItem {
			project_id: self.project_id,
			document_id: None,
			language: Arc::clone(&self.language),
			reasons: self.reasons.clone(),
			is_low_priority: self.is_low_priority,
			active_member: None,
			specific_analyzers: self.specific_analyzers.clone(),
			is_retry: self.is_retry,
			token,
		}
	}
}

impl fmt::Debug for WorkItem {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkItem")
			.field("key", &self.key())
			.field("reasons", &self.reasons)
			.field("low_priority", &self.is_low_priority)
			.field("active_member", &self.active_member)
			.field("specific_analyzers", &self.specific_analyzers.len())
			.field("retry", &self.is_retry)
			.finish()
	}
}
