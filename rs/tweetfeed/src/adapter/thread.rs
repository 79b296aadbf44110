use std::thread;

use tokio::sync::mpsc;

use super::{LoopAdapter, Task};
use crate::Error;

/// A loop thread owned by the library, for hosts without an event loop of their own.
///
/// Runs a current-thread tokio runtime that executes tasks in the order they arrive.
/// Dropping the adapter lets the thread finish what is already queued, then exit.
pub struct ThreadLoop {
	sender: mpsc::UnboundedSender<Task>,
	thread: thread::Thread,
}

impl ThreadLoop {
	pub fn new(name: &str) -> Result<Self, Error> {
		let runtime = tokio::runtime::Builder::new_current_thread().build()?;

		let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();

		let handle = thread::Builder::new()
			.name(name.into())
			.spawn(move || {
				runtime.block_on(async move {
					while let Some(task) = receiver.recv().await {
						task();
					}
				});
				tracing::debug!("loop thread exited");
			})?;

		Ok(Self {
			sender,
			thread: handle.thread().clone(),
		})
	}

	/// The thread tasks run on.
	pub fn thread(&self) -> &thread::Thread {
		&self.thread
	}
}

impl LoopAdapter for ThreadLoop {
	fn schedule(&self, task: Task) -> Result<(), Error> {
		self.sender.send(task).map_err(|_| Error::Closed)
	}
}
