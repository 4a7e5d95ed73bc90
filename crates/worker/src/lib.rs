//! Async runtime primitives shared by the solution crawler and the navigation bar.
//!
//! * [`spawn`] tags every long-running loop with a [`TaskClass`].
//! * [`AsyncListener`] / [`AsyncToken`] account for deferred work so hosts can
//!   wait for a pipeline to drain.
//! * [`BatchingWorkQueue`] is a serial, debounced batch consumer.
//! * [`GenerationClock`] discards results of superseded computations.

mod batching;
mod class;
mod listener;
mod spawn;
mod token;

pub use batching::BatchingWorkQueue;
pub use class::TaskClass;
pub use listener::{AsyncListener, AsyncToken};
pub use spawn::{join_logged, spawn};
pub use token::GenerationClock;
