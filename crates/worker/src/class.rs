/// Execution classes used to label spawned crawler and editor tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Work the user is waiting on: active document analysis, navigation bar refresh.
	Interactive,
	/// Background sweeps that yield to interactive work.
	Background,
	/// Event intake loops that translate notifications into queued work.
	Intake,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Background => "background",
			Self::Intake => "intake",
		}
	}
}
