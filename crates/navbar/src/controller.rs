//! Keeps the dropdowns in sync with the edited document.
//!
//! Two debounced queues feed the bar. Text changes go to the model queue,
//! which recomputes the item list and cancels any computation already in
//! flight. Caret moves and model updates go to the selection queue, which
//! picks the type and member under the caret and pushes them to the
//! presenter. Every text change advances a generation; a model computed for
//! an older generation is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use trawl_worker::{AsyncListener, BatchingWorkQueue, GenerationClock, TaskClass};

use crate::error::NavigationBarError;
use crate::model::{NavigationBarDocument, NavigationBarItem, NavigationBarModel, NavigationBarSelection};
use crate::options::NavigationBarOptions;
use crate::service::{NavigationBarItemService, NavigationBarPresenter};

/// Notifications from the editor view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationBarEvent {
	TextChanged(NavigationBarDocument),
	CaretMoved(usize),
	Disconnect,
}

struct ModelRequest {
	document: NavigationBarDocument,
	generation: u64,
}

#[derive(Default)]
struct BarState {
	model: Option<NavigationBarModel>,
	caret: usize,
	last_pushed: Option<(Arc<[NavigationBarItem]>, NavigationBarSelection)>,
	disconnected: bool,
}

struct Shared {
	service: Arc<dyn NavigationBarItemService>,
	presenter: Arc<dyn NavigationBarPresenter>,
	clock: GenerationClock,
	state: Mutex<BarState>,
}

impl Shared {
	/// Returns `true` when a new model was installed.
	async fn compute_model(&self, request: ModelRequest, cancel: &CancellationToken) -> bool {
		let ModelRequest { document, generation } = request;
		if !self.clock.is_current(generation) {
			tracing::trace!(generation, "navbar.model.superseded");
			return false;
		}
		match self.service.get_items(&document, cancel).await {
			Ok(items) => {
				let mut state = self.state.lock();
				if state.disconnected || !self.clock.is_current(generation) {
					tracing::trace!(generation, version = document.version, "navbar.model.stale");
					return false;
				}
				tracing::debug!(generation, version = document.version, items = items.len(), "navbar.model.updated");
				state.model = Some(NavigationBarModel {
					generation,
					document_version: document.version,
					items: items.into(),
				});
				true
			}
			Err(NavigationBarError::Cancelled) => {
				tracing::trace!(generation, "navbar.model.cancelled");
				false
			}
			Err(err) => {
				tracing::warn!(generation, error = %err, "navbar.model.failed");
				false
			}
		}
	}

	fn refresh_selection(&self) {
		let mut state = self.state.lock();
		if state.disconnected {
			return;
		}
		let Some(items) = state.model.as_ref().map(|model| Arc::clone(&model.items)) else {
			return;
		};
		let selection = NavigationBarSelection::compute(&items, state.caret);
		let unchanged = state
			.last_pushed
			.as_ref()
			.is_some_and(|(pushed, pushed_selection)| (Arc::ptr_eq(pushed, &items) || **pushed == *items) && *pushed_selection == selection);
		if unchanged {
			tracing::trace!(caret = state.caret, "navbar.selection.unchanged");
			return;
		}
		state.last_pushed = Some((Arc::clone(&items), selection.clone()));
		drop(state);
		self.presenter.present(&items, &selection);
	}
}

/// Drives one navigation bar.
pub struct NavigationBarController {
	shared: Arc<Shared>,
	model_queue: BatchingWorkQueue<ModelRequest>,
	selection_queue: Arc<BatchingWorkQueue<()>>,
	listener: AsyncListener,
	shutdown: CancellationToken,
}

impl NavigationBarController {
	/// Creates the controller and starts both queues.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime.
	pub fn new(service: Arc<dyn NavigationBarItemService>, presenter: Arc<dyn NavigationBarPresenter>, options: &NavigationBarOptions) -> Self {
		let shared = Arc::new(Shared {
			service,
			presenter,
			clock: GenerationClock::new(),
			state: Mutex::new(BarState::default()),
		});
		let listener = AsyncListener::new();
		let shutdown = CancellationToken::new();

		let selection_queue = {
			let shared = Arc::clone(&shared);
			Arc::new(BatchingWorkQueue::new(
				"navbar.selection",
				TaskClass::Interactive,
				options.selection_delay(),
				shutdown.child_token(),
				Some(listener.clone()),
				move |_: Vec<()>, _cancel| {
					let shared = Arc::clone(&shared);
					async move { shared.refresh_selection() }
				},
			))
		};

		let model_queue = {
			let shared = Arc::clone(&shared);
			let selection_queue = Arc::clone(&selection_queue);
			BatchingWorkQueue::new(
				"navbar.model",
				TaskClass::Interactive,
				options.model_delay(),
				shutdown.child_token(),
				Some(listener.clone()),
				move |requests: Vec<ModelRequest>, cancel| {
					let shared = Arc::clone(&shared);
					let selection_queue = Arc::clone(&selection_queue);
					async move {
						let Some(latest) = requests.into_iter().last() else { return };
						if shared.compute_model(latest, &cancel).await {
							selection_queue.add_work(());
						}
					}
				},
			)
		};

		Self {
			shared,
			model_queue,
			selection_queue,
			listener,
			shutdown,
		}
	}

	pub async fn handle_event(&self, event: NavigationBarEvent) {
		match event {
			NavigationBarEvent::TextChanged(document) => self.on_text_changed(document),
			NavigationBarEvent::CaretMoved(offset) => self.on_caret_moved(offset),
			NavigationBarEvent::Disconnect => self.disconnect().await,
		}
	}

	/// Schedules a model recomputation, cancelling the one in flight.
	pub fn on_text_changed(&self, document: NavigationBarDocument) {
		if self.is_disconnected() {
			return;
		}
		let generation = self.shared.clock.advance();
		tracing::trace!(generation, version = document.version, "navbar.text_changed");
		self.model_queue.add_work_cancelling(ModelRequest { document, generation });
	}

	pub fn on_caret_moved(&self, offset: usize) {
		{
			let mut state = self.shared.state.lock();
			if state.disconnected {
				return;
			}
			state.caret = offset;
		}
		self.selection_queue.add_work(());
	}

	/// The user picked `item` from a dropdown.
	pub fn item_selected(&self, item: &NavigationBarItem) {
		if self.is_disconnected() {
			return;
		}
		tracing::debug!(item = %item.text, offset = item.navigation_offset, "navbar.navigate");
		self.shared.presenter.navigate_to(item.navigation_offset);
	}

	/// Stops both queues. Nothing is pushed to the presenter afterwards.
	pub async fn disconnect(&self) {
		{
			let mut state = self.shared.state.lock();
			if state.disconnected {
				return;
			}
			state.disconnected = true;
		}
		self.shutdown.cancel();
		self.model_queue.shutdown().await;
		self.selection_queue.shutdown().await;
		tracing::debug!("navbar.disconnect");
	}

	pub fn is_disconnected(&self) -> bool {
		self.shared.state.lock().disconnected
	}

	/// The most recently installed model.
	pub fn model(&self) -> Option<NavigationBarModel> {
		self.shared.state.lock().model.clone()
	}

	/// Waits until both queues have drained.
	pub async fn wait_until_idle(&self) {
		self.listener.wait_idle().await;
	}
}

impl Drop for NavigationBarController {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

impl std::fmt::Debug for NavigationBarController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NavigationBarController")
			.field("generation", &self.shared.clock.current())
			.field("disconnected", &self.is_disconnected())
			.finish_non_exhaustive()
	}
}
