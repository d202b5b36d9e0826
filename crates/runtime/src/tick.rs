//! Deferred work for "later turn" delivery.
//!
//! Inside a tokio runtime a deferred task is spawned. Outside one it is
//! queued on the current thread and runs at the next turn: when the router
//! handles its next incoming message, or when [`run_deferred`] is called.
//! A deferred task never runs inside the call that deferred it.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Task = Box<dyn FnOnce() + Send>;

thread_local! {
	static QUEUE: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
	static RUNNING: Cell<bool> = const { Cell::new(false) };
}

/// Runs `task` on a later turn.
pub(crate) fn defer(task: impl FnOnce() + Send + 'static) {
	match tokio::runtime::Handle::try_current() {
		Ok(handle) => {
			handle.spawn(async move { task() });
		}
		Err(_) => QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task))),
	}
}

/// Runs every task queued on this thread, including ones queued while
/// running, in FIFO order. Returns the number of tasks run.
///
/// A nested call from inside a task returns 0 and leaves the queue to the
/// outer call.
pub fn run_deferred() -> usize {
	if RUNNING.with(|running| running.replace(true)) {
		return 0;
	}
	let mut ran = 0;
	while let Some(task) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
		task();
		ran += 1;
	}
	RUNNING.with(|running| running.set(false));
	ran
}

/// Number of tasks queued on this thread.
pub fn pending_deferred() -> usize {
	QUEUE.with(|queue| queue.borrow().len())
}
