//! Navigation bar controller.
//!
//! Keeps an editor's type and member dropdowns in step with the document
//! being edited. Item lists come from a [`NavigationBarItemService`] and are
//! shown through a [`NavigationBarPresenter`]; see [`NavigationBarController`]
//! for the scheduling.

mod controller;
mod error;
mod model;
mod options;
mod service;

pub use controller::{NavigationBarController, NavigationBarEvent};
pub use error::{NavigationBarError, Result};
pub use model::{NavigationBarDocument, NavigationBarItem, NavigationBarModel, NavigationBarSelection, SelectedItem};
pub use options::NavigationBarOptions;
pub use service::{NavigationBarItemService, NavigationBarPresenter};
