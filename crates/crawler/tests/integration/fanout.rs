use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use trawl_crawler::{
	Accessibility, DeclaredSymbol, DocumentDifference, DocumentDifferenceService, DocumentId, HostServices, InvocationReasons, LanguageServices,
	ProjectId, SemanticModelService, Solution, SolutionId, SymbolKind, SyntaxPath, SyntaxService, TextDocument, WorkspaceChangeKind,
};

use crate::common::{Harness, LANGUAGE, doc_id, document_event, fast_options, harness, project, settle};

/// Every edit is a semantic change inside the same member.
struct MemberEdit;

#[async_trait]
impl DocumentDifferenceService for MemberEdit {
	async fn difference(&self, _old: &TextDocument, _new: &TextDocument, _cancel: &CancellationToken) -> Option<DocumentDifference> {
		Some(DocumentDifference {
			reasons: InvocationReasons::semantic_changed(),
			changed_member: Some(SyntaxPath::new([0, 2])),
		})
	}
}

struct EchoSyntax;

impl SyntaxService for EchoSyntax {
	fn resolve_member(&self, _document: &TextDocument, hint: &SyntaxPath) -> Option<SyntaxPath> {
		Some(hint.clone())
	}
}

/// Resolves every hint to one fixed symbol.
struct FixedSymbol(DeclaredSymbol);

impl SemanticModelService for FixedSymbol {
	fn declared_symbol(&self, _document: &TextDocument, _hint: &SyntaxPath) -> Option<DeclaredSymbol> {
		Some(self.0.clone())
	}
}

fn symbol(kind: SymbolKind, accessibility: Accessibility, locations: Vec<DocumentId>) -> DeclaredSymbol {
	DeclaredSymbol {
		name: "Widget".to_owned(),
		kind,
		accessibility,
		containing_type: None,
		locations,
		containing_project: ProjectId::new(1),
	}
}

fn symbol_services(symbol: DeclaredSymbol) -> HostServices {
	HostServices::new().with_language(
		LANGUAGE,
		LanguageServices::new()
			.with_difference(Arc::new(MemberEdit))
			.with_syntax(Arc::new(EchoSyntax))
			.with_semantics(Arc::new(FixedSymbol(symbol))),
	)
}

/// p1 (3 docs) <- p2 (1 doc) <- p3 (1 doc), plus p4 (1 doc) referencing p1.
fn layered_solution() -> Arc<Solution> {
	Arc::new(
		Solution::new(SolutionId(1))
			.with_project(project(1, 3).with_internals_visible_to("p2"))
			.with_project(project(2, 1).with_reference(ProjectId::new(1)))
			.with_project(project(3, 1).with_reference(ProjectId::new(2)))
			.with_project(project(4, 1).with_reference(ProjectId::new(1))),
	)
}

async fn edit_first_document(h: &Harness, solution: &Arc<Solution>) {
	h.coordinator
		.on_workspace_changed(document_event(WorkspaceChangeKind::DocumentChanged, solution, solution, doc_id(1, 1)));
	settle(&h.coordinator).await;
}

fn analyzed(h: &Harness, project: u32, raw: u32) -> usize {
	h.analyzer.document_calls(doc_id(project, raw)).len()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn semantic_change_reaches_direct_dependents_only() {
	let solution = layered_solution();
	let h = harness(HostServices::new(), Arc::clone(&solution), fast_options());

	edit_first_document(&h, &solution).await;

	assert_eq!(analyzed(&h, 1, 1), 1);
	assert_eq!(analyzed(&h, 1, 2), 1);
	assert_eq!(analyzed(&h, 1, 3), 1);
	assert_eq!(analyzed(&h, 2, 1), 1);
	assert_eq!(analyzed(&h, 4, 1), 1);
	assert_eq!(analyzed(&h, 3, 1), 0, "transitive dependents are not walked");
	assert_eq!(h.coordinator.metrics().snapshot().fanout_items, 4);
	assert!(h.analyzer.project_calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn private_member_only_touches_its_type_locations() {
	let solution = layered_solution();
	let containing = symbol(SymbolKind::Type, Accessibility::Public, vec![doc_id(1, 1), doc_id(1, 2)]);
	let member = DeclaredSymbol {
		name: "refresh".to_owned(),
		containing_type: Some(Box::new(containing)),
		..symbol(SymbolKind::Method, Accessibility::Private, vec![doc_id(1, 1)])
	};
	let h = harness(symbol_services(member), Arc::clone(&solution), fast_options());

	edit_first_document(&h, &solution).await;

	assert_eq!(analyzed(&h, 1, 1), 1);
	assert_eq!(analyzed(&h, 1, 2), 1);
	assert_eq!(analyzed(&h, 1, 3), 0);
	assert_eq!(analyzed(&h, 2, 1), 0);
	assert_eq!(analyzed(&h, 4, 1), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn internal_type_reaches_friend_projects_only() {
	let solution = layered_solution();
	let internal = symbol(SymbolKind::Type, Accessibility::Internal, vec![doc_id(1, 1)]);
	let h = harness(symbol_services(internal), Arc::clone(&solution), fast_options());

	edit_first_document(&h, &solution).await;

	assert_eq!(analyzed(&h, 1, 2), 1);
	assert_eq!(analyzed(&h, 1, 3), 1);
	assert_eq!(analyzed(&h, 2, 1), 1, "p1 grants p2 friend access");
	assert_eq!(analyzed(&h, 4, 1), 0);
	assert_eq!(analyzed(&h, 3, 1), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn public_member_falls_back_to_full_fanout() {
	let solution = layered_solution();
	let public = symbol(SymbolKind::Method, Accessibility::Public, vec![doc_id(1, 1)]);
	let h = harness(symbol_services(public), Arc::clone(&solution), fast_options());

	edit_first_document(&h, &solution).await;

	assert_eq!(analyzed(&h, 1, 2), 1);
	assert_eq!(analyzed(&h, 2, 1), 1);
	assert_eq!(analyzed(&h, 4, 1), 1);
	assert_eq!(analyzed(&h, 1, 1), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn private_member_of_nested_type_uses_the_inner_type_locations() {
	let solution = layered_solution();
	let outer = symbol(SymbolKind::Type, Accessibility::Public, vec![doc_id(1, 1), doc_id(1, 2), doc_id(1, 3)]);
	let inner = DeclaredSymbol {
		name: "Inner".to_owned(),
		containing_type: Some(Box::new(outer)),
		..symbol(SymbolKind::Type, Accessibility::Public, vec![doc_id(1, 1), doc_id(1, 2)])
	};
	let member = DeclaredSymbol {
		name: "refresh".to_owned(),
		containing_type: Some(Box::new(inner)),
		..symbol(SymbolKind::Method, Accessibility::Private, vec![doc_id(1, 1)])
	};
	let h = harness(symbol_services(member), Arc::clone(&solution), fast_options());

	edit_first_document(&h, &solution).await;

	assert_eq!(analyzed(&h, 1, 2), 1);
	assert_eq!(analyzed(&h, 1, 3), 0, "only the innermost type's declarations are revisited");
	assert_eq!(analyzed(&h, 2, 1), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn member_of_private_nested_type_uses_the_outer_type_locations() {
	let solution = layered_solution();
	let outer = symbol(SymbolKind::Type, Accessibility::Public, vec![doc_id(1, 1), doc_id(1, 3)]);
	let inner = DeclaredSymbol {
		name: "Inner".to_owned(),
		containing_type: Some(Box::new(outer)),
		..symbol(SymbolKind::Type, Accessibility::Private, vec![doc_id(1, 1), doc_id(1, 2)])
	};
	let member = DeclaredSymbol {
		name: "refresh".to_owned(),
		containing_type: Some(Box::new(inner)),
		..symbol(SymbolKind::Method, Accessibility::Public, vec![doc_id(1, 1)])
	};
	let h = harness(symbol_services(member), Arc::clone(&solution), fast_options());

	edit_first_document(&h, &solution).await;

	assert_eq!(analyzed(&h, 1, 3), 1);
	assert_eq!(analyzed(&h, 1, 2), 0);
	assert_eq!(analyzed(&h, 2, 1), 0);
	assert_eq!(analyzed(&h, 4, 1), 0);
}
