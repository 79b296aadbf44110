use std::ffi::c_void;

use super::queue::Queue;
use super::{LoopAdapter, Task};
use crate::Error;

/// Called from a worker thread when deliveries become pending.
pub struct OnWakeup {
	user_data: *mut c_void,
	on_wakeup: Option<extern "C" fn(user_data: *mut c_void)>,
}

impl OnWakeup {
	/// # Safety
	///
	/// `on_wakeup` must be safe to call from any thread with `user_data` for as long as the
	/// context lives.
	pub unsafe fn new(user_data: *mut c_void, on_wakeup: Option<extern "C" fn(user_data: *mut c_void)>) -> Self {
		Self { user_data, on_wakeup }
	}

	pub fn none() -> Self {
		Self {
			user_data: std::ptr::null_mut(),
			on_wakeup: None,
		}
	}

	fn call(&self) {
		if let Some(on_wakeup) = self.on_wakeup {
			on_wakeup(self.user_data);
		}
	}
}

// SAFETY: the caller of OnWakeup::new promised cross-thread use is fine.
unsafe impl Send for OnWakeup {}
unsafe impl Sync for OnWakeup {}

/// A loop the host drives itself.
///
/// Tasks wait in a queue until the host calls [Polled::dispatch] from its own loop thread.
/// The optional wakeup fires once each time the queue goes from idle to pending, so the
/// host can poke its loop (write to an eventfd, post a window message, ...).
pub struct Polled {
	queue: Queue,
	wakeup: OnWakeup,
}

impl Polled {
	pub fn new(wakeup: OnWakeup) -> Self {
		Self {
			queue: Queue::default(),
			wakeup,
		}
	}

	/// Run every pending task on the calling thread, returning how many ran.
	pub fn dispatch(&self) -> usize {
		self.queue.drain()
	}

	pub fn pending(&self) -> usize {
		self.queue.len()
	}
}

impl Default for Polled {
	fn default() -> Self {
		Self::new(OnWakeup::none())
	}
}

impl LoopAdapter for Polled {
	fn schedule(&self, task: Task) -> Result<(), Error> {
		if self.queue.push(task) {
			self.wakeup.call();
		}
		Ok(())
	}

	fn as_polled(&self) -> Option<&Polled> {
		Some(self)
	}
}
