use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Error;
use crate::adapter::{LoopAdapter, Task};
use crate::feed::{self, Connector};

#[derive(Default)]
struct Attached {
	streams: usize,
	destroyed: bool,
}

/// The unit of loop affinity: every stream created under a context delivers through its adapter.
pub struct Context {
	adapter: Box<dyn LoopAdapter>,
	connector: Arc<dyn Connector>,
	attached: Mutex<Attached>,
}

impl Context {
	/// Create a context using the process-wide default connector, see [feed::set_default].
	pub fn new(adapter: impl LoopAdapter) -> Self {
		Self {
			adapter: Box::new(adapter),
			connector: feed::default_connector(),
			attached: Mutex::default(),
		}
	}

	pub fn with_connector(mut self, connector: impl Connector) -> Self {
		self.connector = Arc::new(connector);
		self
	}

	pub fn adapter(&self) -> &dyn LoopAdapter {
		self.adapter.as_ref()
	}

	pub fn connector(&self) -> &Arc<dyn Connector> {
		&self.connector
	}

	pub fn schedule(&self, task: Task) -> Result<(), Error> {
		self.adapter.schedule(task)
	}

	/// The number of streams currently attached.
	pub fn streams(&self) -> usize {
		self.attached.lock().streams
	}

	/// Register a stream; fails once the context has been destroyed.
	pub(crate) fn attach(&self) -> Result<(), Error> {
		let mut attached = self.attached.lock();
		if attached.destroyed {
			return Err(Error::InvalidHandle);
		}
		attached.streams += 1;
		Ok(())
	}

	pub(crate) fn detach(&self) {
		let mut attached = self.attached.lock();
		attached.streams = attached.streams.saturating_sub(1);
	}

	/// Mark the context as destroyed, refusing while streams are attached
	/// or while a polled loop still holds undispatched deliveries.
	///
	/// Once this succeeds no new stream can attach, even through a handle resolved earlier.
	pub(crate) fn close(&self) -> Result<(), Error> {
		let mut attached = self.attached.lock();
		if attached.destroyed {
			return Err(Error::InvalidHandle);
		}
		if attached.streams > 0 {
			return Err(Error::Busy);
		}

		// Other adapters keep running what is queued after the context is gone; a polled
		// queue would be dropped with it.
		if self.adapter.as_polled().is_some_and(|polled| polled.pending() > 0) {
			return Err(Error::Busy);
		}
		attached.destroyed = true;
		Ok(())
	}
}

impl fmt::Debug for Context {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let attached = self.attached.lock();
		f.debug_struct("Context")
			.field("streams", &attached.streams)
			.field("destroyed", &attached.destroyed)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adapter::Polled;

	#[test]
	fn test_close_refuses_while_attached() {
		let context = Context::new(Polled::default());

		context.attach().unwrap();
		context.attach().unwrap();
		assert_eq!(context.streams(), 2);
		assert!(matches!(context.close(), Err(Error::Busy)));

		context.detach();
		assert!(matches!(context.close(), Err(Error::Busy)));

		context.detach();
		context.close().unwrap();

		assert!(matches!(context.attach(), Err(Error::InvalidHandle)));
		assert!(matches!(context.close(), Err(Error::InvalidHandle)));
	}

	#[test]
	fn test_close_refuses_with_pending_deliveries() {
		let context = Context::new(Polled::default());
		context.schedule(Box::new(|| {})).unwrap();
		assert!(matches!(context.close(), Err(Error::Busy)));

		// Still usable after the refusal.
		context.attach().unwrap();
		context.detach();

		assert_eq!(context.adapter().as_polled().unwrap().dispatch(), 1);
		context.close().unwrap();
	}

	#[test]
	fn test_schedule_goes_through_adapter() {
		let context = Context::new(Polled::default());
		context.schedule(Box::new(|| {})).unwrap();

		let polled = context.adapter().as_polled().unwrap();
		assert_eq!(polled.pending(), 1);
		assert_eq!(polled.dispatch(), 1);
	}
}
