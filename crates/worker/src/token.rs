use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic generation clock.
///
/// Consumers tag each computation with the generation current at its start and
/// drop the result if a newer generation was issued before it finished.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	current: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Creates a clock at generation 0.
	pub fn new() -> Self {
		Self::default()
	}

	/// Issues the next generation and makes it current.
	pub fn advance(&self) -> u64 {
		self.current.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Returns the most recently issued generation.
	pub fn current(&self) -> u64 {
		self.current.load(Ordering::Acquire)
	}

	/// Returns `true` if `generation` is still the most recent one.
	pub fn is_current(&self, generation: u64) -> bool {
		self.current() == generation
	}
}
