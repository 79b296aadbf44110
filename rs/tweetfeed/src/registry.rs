use std::sync::{Arc, LazyLock};

use crate::feed::Credentials;
use crate::stream::{Deliver, State};
use crate::{Context, Error, HandleTable, Id, Kind, Stream};

/// Every live context and stream, by handle.
///
/// Initialized on first use. Each table has its own lock, and teardown (joining a
/// worker) always happens after the handle is removed, outside the lock.
pub struct Registry {
	contexts: HandleTable<Arc<Context>>,
	streams: HandleTable<Arc<Stream>>,
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

impl Registry {
	fn new() -> Self {
		Self {
			contexts: HandleTable::new(Kind::Context),
			streams: HandleTable::new(Kind::Stream),
		}
	}

	/// The process-wide registry.
	pub fn global() -> &'static Registry {
		&REGISTRY
	}

	pub fn context_create(&self, context: Context) -> Result<Id, Error> {
		let id = self.contexts.insert(Arc::new(context))?;
		tracing::info!(context = %id, "context created");
		Ok(id)
	}

	pub fn context(&self, id: Id) -> Result<Arc<Context>, Error> {
		self.contexts.get(id)
	}

	/// Destroy a context, failing with [Error::Busy] while any stream is attached
	/// or, for a polled context, while deliveries are waiting for dispatch.
	pub fn context_destroy(&self, id: Id) -> Result<(), Error> {
		let context = self.contexts.get(id)?;

		// Closing first means a concurrent stream_create can't attach to a context on its way out.
		context.close()?;
		self.contexts.remove(id)?;

		tracing::info!(context = %id, "context destroyed");
		Ok(())
	}

	/// Run pending deliveries of a polled context on the calling thread.
	pub fn context_dispatch(&self, id: Id) -> Result<usize, Error> {
		let context = self.contexts.get(id)?;
		let polled = context.adapter().as_polled().ok_or(Error::Unsupported)?;
		Ok(polled.dispatch())
	}

	pub fn stream_create(&self, context: Id, credentials: Credentials) -> Result<Id, Error> {
		let context = self.contexts.get(context)?;
		let stream = Stream::new(context, credentials)?;

		let id = self.streams.insert(Arc::new(stream))?;
		tracing::info!(stream = %id, "stream created");
		Ok(id)
	}

	pub fn stream_start(&self, id: Id, deliver: impl Deliver) -> Result<(), Error> {
		self.streams.get(id)?.start(deliver)?;
		tracing::info!(stream = %id, "stream started");
		Ok(())
	}

	pub fn stream_state(&self, id: Id) -> Result<State, Error> {
		Ok(self.streams.get(id)?.state())
	}

	pub fn stream_stop(&self, id: Id) -> Result<(), Error> {
		self.streams.get(id)?.stop();
		tracing::info!(stream = %id, "stream stopped");
		Ok(())
	}

	/// Remove the handle, then stop the worker and detach from the context.
	pub fn stream_destroy(&self, id: Id) -> Result<(), Error> {
		let stream = self.streams.remove(id)?;
		stream.close();

		tracing::info!(stream = %id, "stream destroyed");
		Ok(())
	}
}
