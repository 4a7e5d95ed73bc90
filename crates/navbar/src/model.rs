//! Navigation bar items and caret-based selection.

use std::ops::Range;
use std::sync::Arc;

/// Snapshot of the document the bar describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationBarDocument {
	pub version: u64,
	pub text: Arc<str>,
}

impl NavigationBarDocument {
	pub fn new(version: u64, text: impl Into<Arc<str>>) -> Self {
		Self { version, text: text.into() }
	}
}

/// One dropdown entry. Top-level items are types, their children are members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationBarItem {
	pub text: String,
	/// Text ranges the item covers. Partial declarations have several.
	pub spans: Vec<Range<usize>>,
	/// Where the caret goes when the item is picked.
	pub navigation_offset: usize,
	pub children: Vec<NavigationBarItem>,
}

impl NavigationBarItem {
	pub fn new(text: impl Into<String>, span: Range<usize>) -> Self {
		let navigation_offset = span.start;
		Self {
			text: text.into(),
			spans: vec![span],
			navigation_offset,
			children: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_span(mut self, span: Range<usize>) -> Self {
		self.spans.push(span);
		self
	}

	#[must_use]
	pub fn with_navigation_offset(mut self, offset: usize) -> Self {
		self.navigation_offset = offset;
		self
	}

	#[must_use]
	pub fn with_child(mut self, child: NavigationBarItem) -> Self {
		self.children.push(child);
		self
	}

	/// Length of the shortest span containing `caret`. Span ends are inclusive.
	fn containing_len(&self, caret: usize) -> Option<usize> {
		self.spans
			.iter()
			.filter(|span| span.start <= caret && caret <= span.end)
			.map(|span| span.end - span.start)
			.min()
	}

	/// End of the last span finishing before `caret`.
	fn preceding_end(&self, caret: usize) -> Option<usize> {
		self.spans.iter().filter(|span| span.end < caret).map(|span| span.end).max()
	}
}

/// Item list computed for one document version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationBarModel {
	pub generation: u64,
	pub document_version: u64,
	pub items: Arc<[NavigationBarItem]>,
}

/// A selected dropdown entry. `grayed` marks an entry chosen because it is
/// the closest one before the caret rather than one containing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedItem {
	pub item: NavigationBarItem,
	pub grayed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationBarSelection {
	pub type_item: Option<SelectedItem>,
	pub member_item: Option<SelectedItem>,
}

impl NavigationBarSelection {
	/// Selects the type and member for `caret`.
	pub fn compute(items: &[NavigationBarItem], caret: usize) -> Self {
		let type_item = select(items, caret);
		let member_item = type_item.as_ref().and_then(|selected| {
			select(&selected.item.children, caret).map(|member| SelectedItem {
				grayed: member.grayed || selected.grayed,
				..member
			})
		});
		Self { type_item, member_item }
	}
}

fn select(items: &[NavigationBarItem], caret: usize) -> Option<SelectedItem> {
	let innermost = items
		.iter()
		.filter_map(|item| item.containing_len(caret).map(|len| (len, item)))
		.min_by_key(|(len, _)| *len);
	if let Some((_, item)) = innermost {
		return Some(SelectedItem {
			item: item.clone(),
			grayed: false,
		});
	}
	items
		.iter()
		.filter_map(|item| item.preceding_end(caret).map(|end| (end, item)))
		.max_by_key(|(end, _)| *end)
		.map(|(_, item)| SelectedItem {
			item: item.clone(),
			grayed: true,
		})
}
