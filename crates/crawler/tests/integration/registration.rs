use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use trawl_crawler::{
	AnalyzerError, AnalyzerRef, FatalErrorReporter, HostServices, IncrementalAnalyzer, ProgressStatus, ProviderMetadata, Solution,
	SolutionCrawlerRegistrationService, SolutionId, WorkspaceChangeKind,
};

use crate::common::{Call, KIND, RecordingAnalyzer, SharedProvider, doc_id, document_event, fast_options, harness, init_tracing, project, settle, wait_until};

fn small_solution() -> Arc<Solution> {
	Arc::new(Solution::new(SolutionId(1)).with_project(project(1, 2)))
}

fn analyzer_ref(analyzer: &Arc<RecordingAnalyzer>) -> AnalyzerRef {
	AnalyzerRef::new(Arc::clone(analyzer) as Arc<dyn IncrementalAnalyzer>)
}

#[derive(Default)]
struct RecordingReporter {
	faults: Mutex<Vec<String>>,
}

impl FatalErrorReporter for RecordingReporter {
	fn report(&self, analyzer: &str, error: &AnalyzerError) {
		self.faults.lock().push(format!("{analyzer}: {error}"));
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn default_provider_is_found_behind_a_kind_specific_one() {
	init_tracing();
	let service = SolutionCrawlerRegistrationService::new(fast_options());
	let elsewhere = RecordingAnalyzer::new();
	let fallback = RecordingAnalyzer::new();
	service.add_analyzer_provider(Arc::new(SharedProvider(Arc::clone(&elsewhere))), ProviderMetadata::new("lint").for_kind("preview"));
	service.add_analyzer_provider(Arc::new(SharedProvider(Arc::clone(&fallback))), ProviderMetadata::new("lint"));
	let services = Arc::new(HostServices::new());

	let coordinator = service.register(KIND, &services, small_solution()).expect("crawler enabled");

	assert_eq!(coordinator.analyzers(), vec![analyzer_ref(&fallback)]);
	let again = service.register(KIND, &services, small_solution()).expect("crawler enabled");
	assert!(Arc::ptr_eq(&coordinator, &again));
	coordinator.shutdown(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn provider_added_later_reaches_live_coordinator() {
	let h = harness(HostServices::new(), small_solution(), fast_options());
	let late = RecordingAnalyzer::new();

	h.service
		.add_analyzer_provider(Arc::new(SharedProvider(Arc::clone(&late))), ProviderMetadata::new("late"));
	settle(&h.coordinator).await;

	assert_eq!(h.coordinator.analyzers().len(), 2);
	for raw in 1..=2 {
		assert_eq!(late.count(&Call::Reset(doc_id(1, raw))), 1);
		assert_eq!(late.document_calls(doc_id(1, raw)).len(), 1);
	}
	assert!(h.analyzer.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reanalyze_targets_one_analyzer_and_one_document() {
	let h = harness(HostServices::new(), small_solution(), fast_options());
	let other = RecordingAnalyzer::new();
	h.service
		.add_analyzer_provider(Arc::new(SharedProvider(Arc::clone(&other))), ProviderMetadata::new("other"));
	settle(&h.coordinator).await;
	let other_before = other.calls().len();

	h.service
		.reanalyze(KIND, &h.services, analyzer_ref(&h.analyzer), None, Some(vec![doc_id(1, 2)]), false);
	settle(&h.coordinator).await;

	assert_eq!(h.analyzer.count(&Call::Reset(doc_id(1, 2))), 1);
	assert_eq!(h.analyzer.count(&Call::Reset(doc_id(1, 1))), 0);
	assert_eq!(other.calls().len(), other_before);
	assert_eq!(h.coordinator.metrics().snapshot().reanalyze_requests, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reanalyze_without_registration_is_ignored() {
	let h = harness(HostServices::new(), small_solution(), fast_options());
	let stranger = Arc::new(HostServices::new());

	h.service.reanalyze(KIND, &stranger, analyzer_ref(&h.analyzer), None, None, true);
	settle(&h.coordinator).await;

	assert!(h.analyzer.calls().is_empty());
	assert_eq!(h.coordinator.metrics().snapshot().reanalyze_requests, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn option_change_reanalyzes_interested_analyzers() {
	let h = harness(HostServices::new(), small_solution(), fast_options());

	h.coordinator.on_option_changed("unrelated.option");
	settle(&h.coordinator).await;
	assert!(h.analyzer.calls().is_empty());

	h.coordinator.on_option_changed("recording.enabled");
	settle(&h.coordinator).await;
	assert_eq!(h.analyzer.count(&Call::Reset(doc_id(1, 1))), 1);
	assert_eq!(h.analyzer.count(&Call::Reset(doc_id(1, 2))), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unregister_shuts_down_and_ignores_later_events() {
	let solution = small_solution();
	let h = harness(HostServices::new(), Arc::clone(&solution), fast_options());

	h.service.unregister(KIND, &h.services, true).await;

	assert!(h.coordinator.is_shutdown());
	assert!(h.service.coordinator(KIND, &h.services).is_none());
	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, doc_id(1, 1)));
	h.coordinator.shutdown(true).await;
	h.service.unregister(KIND, &h.services, true).await;

	assert_eq!(h.coordinator.metrics().snapshot().workspace_events, 0);
	assert!(h.analyzer.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn analyzer_fault_is_reported() {
	let solution = small_solution();
	let reporter = Arc::new(RecordingReporter::default());
	let services = HostServices::new().with_fatal_error_reporter(Arc::clone(&reporter) as _);
	let h = harness(services, Arc::clone(&solution), fast_options());
	h.analyzer.fail_documents();

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, doc_id(1, 1)));

	let reported = wait_until(Duration::from_secs(5), || !reporter.faults.lock().is_empty()).await;
	assert!(reported);
	assert_eq!(reporter.faults.lock()[0], "recording: analyzer fault: analyzer exploded");
	h.coordinator.shutdown(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_starts_and_ends_stopped() {
	let solution = small_solution();
	let h = harness(HostServices::new(), Arc::clone(&solution), fast_options());
	let mut events = h.service.progress().subscribe();

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, doc_id(1, 1)));
	settle(&h.coordinator).await;

	let mut seen = Vec::new();
	let stopped = wait_until(Duration::from_secs(5), || {
		while let Ok(data) = events.try_recv() {
			seen.push(data.status);
		}
		seen.last() == Some(&ProgressStatus::Stopped)
	})
	.await;
	assert!(stopped);
	assert_eq!(seen.first(), Some(&ProgressStatus::Started));
	assert!(!h.service.progress().in_progress());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_reports_evaluation_and_the_drained_count() {
	let solution = small_solution();
	let h = harness(HostServices::new(), Arc::clone(&solution), fast_options());
	let mut events = h.service.progress().subscribe();

	for raw in 1..=2 {
		h.coordinator
			.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, doc_id(1, raw)));
	}
	settle(&h.coordinator).await;

	let mut seen = Vec::new();
	let stopped = wait_until(Duration::from_secs(5), || {
		while let Ok(data) = events.try_recv() {
			seen.push(data);
		}
		seen.last().map(|data| data.status) == Some(ProgressStatus::Stopped)
	})
	.await;
	assert!(stopped);
	assert!(seen.iter().any(|data| data.status == ProgressStatus::Evaluating));
	let counts: Vec<usize> = seen.iter().filter_map(|data| data.pending_item_count).collect();
	assert!(counts.contains(&0), "pending count never drained: {counts:?}");
	assert_eq!(h.coordinator.metrics().snapshot().pending_items, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ending_a_global_operation_resumes_progress() {
	let solution = small_solution();
	let h = harness(
		HostServices::new(),
		Arc::clone(&solution),
		fast_options().with_uniform_backoff(Duration::from_millis(500)),
	);
	let mut events = h.service.progress().subscribe();
	let mut seen = Vec::new();
	let mut drain_until = |status: ProgressStatus, seen: &mut Vec<ProgressStatus>| {
		while let Ok(data) = events.try_recv() {
			seen.push(data.status);
		}
		seen.contains(&status)
	};

	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, &solution, &solution, doc_id(1, 1)));
	assert!(wait_until(Duration::from_secs(5), || drain_until(ProgressStatus::Started, &mut seen)).await);

	let build = h.service.global_operations().start("build");
	assert!(wait_until(Duration::from_secs(5), || drain_until(ProgressStatus::Paused, &mut seen)).await);
	let paused_at = seen.len();
	drop(build);

	let resumed = wait_until(Duration::from_secs(5), || {
		drain_until(ProgressStatus::Stopped, &mut seen);
		seen[paused_at..].contains(&ProgressStatus::Evaluating)
	})
	.await;
	assert!(resumed, "no progress after the operation ended: {seen:?}");
	settle(&h.coordinator).await;
	assert_eq!(h.analyzer.document_calls(doc_id(1, 1)).len(), 1);
}
