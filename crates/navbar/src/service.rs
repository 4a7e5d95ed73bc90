use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::model::{NavigationBarDocument, NavigationBarItem, NavigationBarSelection};

/// Computes the dropdown items for a document.
#[async_trait]
pub trait NavigationBarItemService: Send + Sync {
	/// Returns [`NavigationBarError::Cancelled`](crate::NavigationBarError::Cancelled)
	/// once `cancel` fires.
	async fn get_items(&self, document: &NavigationBarDocument, cancel: &CancellationToken) -> Result<Vec<NavigationBarItem>>;
}

/// The UI side of the bar.
pub trait NavigationBarPresenter: Send + Sync {
	fn present(&self, items: &[NavigationBarItem], selection: &NavigationBarSelection);

	/// Moves the caret to `offset` in the current document.
	fn navigate_to(&self, offset: usize);
}
