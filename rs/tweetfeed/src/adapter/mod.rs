//! Loop adapters: run work on the thread that owns the host's event loop.
//!
//! Every adapter satisfies the same contract: [LoopAdapter::schedule] returns immediately,
//! is callable from any thread, never runs the task on the calling thread, and runs tasks
//! in submission order.

mod polled;
mod queue;
mod thread;

#[cfg(all(feature = "libdispatch", target_vendor = "apple"))]
mod libdispatch;
#[cfg(feature = "gtk")]
mod gtk;

pub use polled::*;
pub use thread::*;

#[cfg(all(feature = "libdispatch", target_vendor = "apple"))]
pub use libdispatch::*;
#[cfg(feature = "gtk")]
pub use gtk::*;

use crate::Error;

/// A unit of work bound for the loop thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait LoopAdapter: Send + Sync + 'static {
	/// Queue `task` to run on the loop's thread.
	fn schedule(&self, task: Task) -> Result<(), Error>;

	/// Hosts that drive delivery by hand expose themselves here.
	fn as_polled(&self) -> Option<&Polled> {
		None
	}
}
