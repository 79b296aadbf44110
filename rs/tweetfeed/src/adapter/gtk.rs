use std::sync::Arc;

use glib_sys as glib;

use super::queue::Queue;
use super::{LoopAdapter, Task};
use crate::Error;

/// Delivers onto a GLib main context, as used by GTK.
///
/// Tasks collect in a queue; the first task after the queue drains attaches one idle
/// source to the context, and that source runs everything queued on the thread iterating
/// the context.
pub struct RunLoop {
	context: *mut glib::GMainContext,
	queue: Arc<Queue>,
}

// SAFETY: GMainContext is reference counted and thread safe; sources may be attached from any thread.
unsafe impl Send for RunLoop {}
unsafe impl Sync for RunLoop {}

impl RunLoop {
	/// # Safety
	///
	/// `context` must be a valid GMainContext, or null.
	pub unsafe fn new(context: *mut glib::GMainContext) -> Result<Self, Error> {
		if context.is_null() {
			return Err(Error::InvalidPointer);
		}

		let context = unsafe { glib::g_main_context_ref(context) };

		Ok(Self {
			context,
			queue: Arc::new(Queue::default()),
		})
	}
}

unsafe extern "C" fn dispatch(data: glib::gpointer) -> glib::gboolean {
	// SAFETY: data is the Arc<Queue> leaked in schedule, released in release.
	let queue = unsafe { &*(data as *const Queue) };
	queue.drain();
	glib::G_SOURCE_REMOVE
}

unsafe extern "C" fn release(data: glib::gpointer) {
	drop(unsafe { Arc::from_raw(data as *const Queue) });
}

impl LoopAdapter for RunLoop {
	fn schedule(&self, task: Task) -> Result<(), Error> {
		if !self.queue.push(task) {
			return Ok(());
		}

		let data = Arc::into_raw(self.queue.clone()) as glib::gpointer;

		unsafe {
			let source = glib::g_idle_source_new();
			glib::g_source_set_priority(source, glib::G_PRIORITY_DEFAULT);
			glib::g_source_set_callback(source, Some(dispatch), data, Some(release));
			glib::g_source_attach(source, self.context);
			glib::g_source_unref(source);
		}

		Ok(())
	}
}

impl Drop for RunLoop {
	fn drop(&mut self) {
		// Attached sources hold their own reference to the queue.
		unsafe { glib::g_main_context_unref(self.context) };
	}
}
