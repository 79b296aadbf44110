use std::ffi::c_void;

use dispatch::ffi;

use super::{LoopAdapter, Task};
use crate::Error;

/// Delivers onto a libdispatch queue.
///
/// The queue must be serial (the main queue or one created with a serial attribute);
/// submission order is only preserved by a serial queue.
pub struct SerialQueue {
	queue: ffi::dispatch_queue_t,
}

// SAFETY: dispatch objects are thread safe and reference counted.
unsafe impl Send for SerialQueue {}
unsafe impl Sync for SerialQueue {}

impl SerialQueue {
	/// # Safety
	///
	/// `queue` must be a valid dispatch queue, or null.
	pub unsafe fn new(queue: ffi::dispatch_queue_t) -> Result<Self, Error> {
		if queue.is_null() {
			return Err(Error::InvalidPointer);
		}

		unsafe { ffi::dispatch_retain(queue) };
		Ok(Self { queue })
	}
}

extern "C" fn run(context: *mut c_void) {
	// SAFETY: context is the Box<Task> leaked in schedule, run exactly once.
	let task = unsafe { Box::from_raw(context as *mut Task) };
	task();
}

impl LoopAdapter for SerialQueue {
	fn schedule(&self, task: Task) -> Result<(), Error> {
		let context = Box::into_raw(Box::new(task)) as *mut c_void;
		unsafe { ffi::dispatch_async_f(self.queue, context, run) };
		Ok(())
	}
}

impl Drop for SerialQueue {
	fn drop(&mut self) {
		// Pending blocks keep the queue alive on their own.
		unsafe { ffi::dispatch_release(self.queue) };
	}
}
