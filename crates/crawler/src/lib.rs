//! Solution crawler: incremental background analysis scheduling.
//!
//! A [`WorkCoordinator`] listens to workspace change notifications and turns
//! them into [`WorkItem`]s keyed by document or project. Items flow through
//! two coalescing queues:
//!
//! * the normal-priority queue runs document analysis, active and visible
//!   documents first;
//! * the low-priority queue runs whole-project passes, only once the
//!   normal-priority side is idle with nothing queued.
//!
//! Edits to the same document before it is processed merge into one item, so
//! a burst of typing produces one analyzer call carrying every reason. Items
//! interrupted by cancellation are retried. Semantic changes fan out to the
//! documents that may observe them.
//!
//! Coordinators are created through the [`SolutionCrawlerRegistrationService`],
//! one per workspace kind and host.

mod analyzer;
mod context;
mod coordinator;
mod error;
mod global_operation;
mod idle;
mod low;
mod metrics;
mod normal;
mod options;
mod processor;
mod progress;
mod queue;
mod reasons;
mod registration;
mod semantic;
mod services;
mod work_item;
mod workspace;

pub use analyzer::{AnalyzerRef, IncrementalAnalyzer, IncrementalAnalyzerProvider, ProviderEntry, ProviderMetadata};
pub use coordinator::{ReanalyzeScope, WorkCoordinator};
pub use error::{AnalyzerError, AnalyzerResult, CrawlerError, FatalErrorReporter, Result, TracingFatalErrorReporter};
pub use global_operation::{GlobalOperationRegistration, GlobalOperationService};
pub use metrics::{CrawlerMetrics, MetricsSnapshot};
pub use options::CrawlerOptions;
pub use progress::{ProgressData, ProgressReporter, ProgressStatus};
pub use reasons::{InvocationReasons, predefined};
pub use registration::{Registration, SolutionCrawlerRegistrationService};
pub use services::{
	Accessibility, DeclaredSymbol, DocumentDifference, DocumentDifferenceService, DocumentTrackingService, HostServices, LanguageServices,
	SemanticModelService, SharedDocumentTracker, SymbolKind, SyntaxPath, SyntaxService, WorkCoordinatorPriorityService,
};
pub use work_item::{WorkItem, WorkItemKey};
pub use workspace::{
	DocumentId, DocumentKind, Project, ProjectChanges, ProjectId, Solution, SolutionChanges, SolutionId, TextDocument, WorkspaceChangeEvent,
	WorkspaceChangeKind,
};
