use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use trawl_crawler::{
	DocumentDifference, DocumentDifferenceService, DocumentId, HostServices, InvocationReasons, LanguageServices, SharedDocumentTracker, Solution,
	SolutionId, SyntaxPath, SyntaxService, TextDocument, WorkspaceChangeKind, predefined,
};

use crate::common::{Call, LANGUAGE, RecordingAnalyzer, doc_id, document_event, fast_options, harness, project, settle, wait_until};

/// Reports a syntax-only edit when the new text says so, a semantic edit otherwise.
struct TextTagDifference;

#[async_trait]
impl DocumentDifferenceService for TextTagDifference {
	async fn difference(&self, _old: &TextDocument, new: &TextDocument, _cancel: &CancellationToken) -> Option<DocumentDifference> {
		let reasons = if new.text() == "syntax" {
			InvocationReasons::syntax_changed()
		} else {
			InvocationReasons::semantic_changed()
		};
		Some(DocumentDifference {
			reasons,
			changed_member: None,
		})
	}
}

/// Every edit is a syntax-only change inside one member.
struct MemberSyntaxEdit;

#[async_trait]
impl DocumentDifferenceService for MemberSyntaxEdit {
	async fn difference(&self, _old: &TextDocument, _new: &TextDocument, _cancel: &CancellationToken) -> Option<DocumentDifference> {
		Some(DocumentDifference {
			reasons: InvocationReasons::syntax_changed(),
			changed_member: Some(SyntaxPath::new([1, 4])),
		})
	}
}

/// Resolves every member hint to itself.
struct EchoSyntax;

impl SyntaxService for EchoSyntax {
	fn resolve_member(&self, _document: &TextDocument, hint: &SyntaxPath) -> Option<SyntaxPath> {
		Some(hint.clone())
	}
}

/// Positions of the document analyses of `id` within `calls`.
fn document_runs(calls: &[Call], id: DocumentId) -> Vec<usize> {
	calls
		.iter()
		.enumerate()
		.filter_map(|(at, call)| matches!(call, Call::Document { id: d, .. } if *d == id).then_some(at))
		.collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn added_document_is_analyzed_once_without_a_project_pass() {
	let before = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 0)));
	let d = doc_id(1, 1);
	let after = Arc::new(before.with_document(TextDocument::new(d, "d1.rs", "fn main() {}")));
	let h = harness(HostServices::new(), Arc::clone(&before), fast_options());

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentAdded, &before, &after, d));
	settle(&h.coordinator).await;

	let calls = h.analyzer.document_calls(d);
	assert_eq!(calls.len(), 1);
	assert!(calls[0].is_superset(&InvocationReasons::document_added()));
	assert_eq!(h.analyzer.count(&Call::Syntax(d)), 1);
	assert!(h.analyzer.project_calls().is_empty());

	let metrics = h.coordinator.metrics().snapshot();
	assert_eq!(metrics.documents_processed, 1);
	assert_eq!(metrics.project_passes_skipped, 1);
	assert_eq!(h.coordinator.registration().current_solution().version(), after.version());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rapid_edits_coalesce_into_one_invocation() {
	let d = doc_id(1, 1);
	let s0 = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 1)));
	let s1 = Arc::new(s0.with_document_text(d, "syntax"));
	let s2 = Arc::new(s1.with_document_text(d, "semantic"));
	let services = HostServices::new().with_language(LANGUAGE, LanguageServices::new().with_difference(Arc::new(TextTagDifference)));
	let h = harness(services, Arc::clone(&s0), fast_options().with_uniform_backoff(Duration::from_millis(200)));

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &s0, &s1, d));
	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &s1, &s2, d));
	settle(&h.coordinator).await;

	let calls = h.analyzer.document_calls(d);
	assert_eq!(calls.len(), 1);
	assert!(calls[0].contains(predefined::SYNTAX_CHANGED));
	assert!(calls[0].contains(predefined::SEMANTIC_CHANGED));
	assert_eq!(h.analyzer.count(&Call::Syntax(d)), 1);
	assert_eq!(h.coordinator.metrics().snapshot().coalesced, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_document_is_retried_with_its_reasons() {
	let before = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 0)));
	let d = doc_id(1, 1);
	let after = Arc::new(before.with_document(TextDocument::new(d, "d1.rs", "fn main() {}")));
	let h = harness(HostServices::new(), Arc::clone(&before), fast_options());
	h.analyzer.block_next_document();

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentAdded, &before, &after, d));
	tokio::time::timeout(Duration::from_secs(5), h.analyzer.entered.notified())
		.await
		.expect("analyzer entered");

	let build = h.service.global_operations().start("build");
	let retried = wait_until(Duration::from_secs(5), || h.coordinator.metrics().snapshot().retries == 1).await;
	assert!(retried);
	drop(build);
	settle(&h.coordinator).await;

	let calls = h.analyzer.document_calls(d);
	assert_eq!(calls.len(), 2);
	assert_eq!(calls[0], calls[1]);
	assert!(calls[1].is_superset(&InvocationReasons::document_added()));
	// A retry reruns every category.
	assert_eq!(h.analyzer.count(&Call::Syntax(d)), 2);
	assert_eq!(h.coordinator.metrics().snapshot().cancellations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn project_pass_waits_for_document_queue_to_drain() {
	let solution = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 4)));
	let h = harness(HostServices::new(), solution, fast_options());
	let late = RecordingAnalyzer::new();
	late.expect_documents_before_projects(4);

	h.coordinator.add_analyzer(Arc::clone(&late) as _);
	settle(&h.coordinator).await;

	assert_eq!(late.early_project_passes.load(Ordering::SeqCst), 0);
	assert_eq!(late.documents_analyzed().len(), 4);
	let passes = late.project_calls();
	assert_eq!(passes.len(), 1);
	assert!(!passes[0].1);
	assert!(passes[0].2.contains(predefined::REANALYZE));
	for raw in 1..=4 {
		assert_eq!(late.count(&Call::Reset(doc_id(1, raw))), 1);
	}
	// The reanalyze targets the new analyzer only.
	assert!(h.analyzer.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn active_document_goes_first() {
	let solution = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 3)));
	let tracker = Arc::new(SharedDocumentTracker::new());
	tracker.set_active(Some(doc_id(1, 3)));
	let h = harness(HostServices::new().with_document_tracker(tracker), Arc::clone(&solution), fast_options());

	for raw in 1..=3 {
		h.coordinator
			.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, doc_id(1, raw)));
	}
	settle(&h.coordinator).await;

	let order = h.analyzer.documents_analyzed();
	assert_eq!(order.first(), Some(&doc_id(1, 3)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_and_close_hooks_run() {
	let solution = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 1)));
	let d = doc_id(1, 1);
	let h = harness(HostServices::new(), solution, fast_options());

	h.coordinator.on_document_opened(d);
	settle(&h.coordinator).await;
	h.coordinator.on_document_closed(d);
	settle(&h.coordinator).await;

	assert_eq!(h.analyzer.count(&Call::Open(d)), 1);
	assert_eq!(h.analyzer.count(&Call::Close(d)), 1);
	let opened = h.analyzer.calls().iter().position(|c| *c == Call::Open(d));
	let closed = h.analyzer.calls().iter().position(|c| *c == Call::Close(d));
	assert!(opened < closed);
	// Neither hook asks for a semantic pass, so only the body path ran.
	assert!(h.analyzer.document_calls(d).iter().all(|r| !r.contains(predefined::SEMANTIC_CHANGED)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_document_is_dropped_from_analyzers() {
	let before = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 2)));
	let gone = doc_id(1, 2);
	let after = Arc::new(before.without_document(gone));
	let h = harness(HostServices::new(), Arc::clone(&before), fast_options());

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentRemoved, &before, &after, gone));
	settle(&h.coordinator).await;

	assert_eq!(h.analyzer.count(&Call::RemoveDocument(gone)), 1);
	assert!(h.analyzer.document_calls(gone).is_empty());
	// The surviving sibling observes the semantic change.
	assert_eq!(h.analyzer.document_calls(doc_id(1, 1)).len(), 1);
	let passes = h.analyzer.project_calls();
	assert_eq!(passes.len(), 1);
	assert!(passes[0].1, "removal changes project semantics");
	assert_eq!(h.coordinator.metrics().snapshot().documents_not_found, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn opened_document_preempts_a_running_edit() {
	let solution = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 2)));
	let (edited, opened) = (doc_id(1, 1), doc_id(1, 2));
	let h = harness(HostServices::new(), Arc::clone(&solution), fast_options());
	h.analyzer.block_next_document();

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, edited));
	tokio::time::timeout(Duration::from_secs(5), h.analyzer.entered.notified())
		.await
		.expect("analyzer entered");
	h.coordinator.on_document_opened(opened);
	settle(&h.coordinator).await;

	let calls = h.analyzer.calls();
	let open = calls.iter().position(|c| *c == Call::Open(opened)).expect("opened document analyzed");
	let runs = document_runs(&calls, edited);
	assert_eq!(runs.len(), 2);
	assert!(open < runs[1], "the opened document runs before the interrupted edit is retried");
	let metrics = h.coordinator.metrics().snapshot();
	assert_eq!(metrics.cancellations, 1);
	assert_eq!(metrics.retries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn high_priority_document_interrupts_a_project_pass() {
	let before = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 2)));
	let (kept, gone) = (doc_id(1, 1), doc_id(1, 2));
	let after = Arc::new(before.without_document(gone));
	let h = harness(HostServices::new(), Arc::clone(&before), fast_options());
	h.analyzer.block_next_project();

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentRemoved, &before, &after, gone));
	tokio::time::timeout(Duration::from_secs(5), h.analyzer.entered.notified())
		.await
		.expect("project pass entered");
	h.coordinator.on_document_opened(kept);
	settle(&h.coordinator).await;

	let passes = h.analyzer.project_calls();
	assert_eq!(passes.len(), 2);
	assert!(passes[1].2.contains(predefined::DOCUMENT_REMOVED));
	assert_eq!(h.analyzer.count(&Call::Open(kept)), 1);
	let metrics = h.coordinator.metrics().snapshot();
	assert_eq!(metrics.cancellations, 1);
	assert_eq!(metrics.retries, 1);
	assert_eq!(metrics.projects_processed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn visible_document_goes_before_other_flagged_ones() {
	let solution = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 3)));
	let (opened, visible) = (doc_id(1, 1), doc_id(1, 3));
	let tracker = Arc::new(SharedDocumentTracker::new());
	tracker.set_visible(vec![visible]);
	let h = harness(
		HostServices::new().with_document_tracker(tracker),
		Arc::clone(&solution),
		fast_options().with_uniform_backoff(Duration::from_millis(200)),
	);

	h.coordinator.on_document_opened(opened);
	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, visible));
	settle(&h.coordinator).await;

	let order = h.analyzer.documents_analyzed();
	assert_eq!(order.first(), Some(&visible));
	assert!(order.contains(&opened));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn syntax_only_edit_analyzes_the_resolved_member() {
	let solution = Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 1)));
	let d = doc_id(1, 1);
	let services = HostServices::new().with_language(
		LANGUAGE,
		LanguageServices::new()
			.with_difference(Arc::new(MemberSyntaxEdit))
			.with_syntax(Arc::new(EchoSyntax)),
	);
	let h = harness(services, Arc::clone(&solution), fast_options());

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, d));
	settle(&h.coordinator).await;

	assert_eq!(h.analyzer.count(&Call::Syntax(d)), 1);
	let body_run = Call::Document {
		id: d,
		body: Some(SyntaxPath::new([1, 4])),
		reasons: InvocationReasons::syntax_changed(),
	};
	assert_eq!(h.analyzer.count(&body_run), 1);
	assert_eq!(h.analyzer.document_calls(d).len(), 1);
}
