use std::collections::VecDeque;

use parking_lot::Mutex;

use super::Task;

#[derive(Default)]
struct State {
	tasks: VecDeque<Task>,

	// A wakeup is outstanding; further pushes don't need another.
	armed: bool,
}

/// A FIFO of tasks with a single outstanding wakeup.
///
/// Loops that can only be poked (an idle source, a host callback) share this:
/// the first push after a drain asks for a wakeup, and the drain runs everything queued.
#[derive(Default)]
pub(super) struct Queue {
	state: Mutex<State>,
}

impl Queue {
	/// Returns true if the caller must wake the loop.
	pub fn push(&self, task: Task) -> bool {
		let mut state = self.state.lock();
		state.tasks.push_back(task);
		!std::mem::replace(&mut state.armed, true)
	}

	/// Run queued tasks until empty, including any queued while draining.
	pub fn drain(&self) -> usize {
		let mut count = 0;

		loop {
			let task = {
				let mut state = self.state.lock();
				match state.tasks.pop_front() {
					Some(task) => task,
					None => {
						state.armed = false;
						return count;
					}
				}
			};

			// Run without the lock so the task may schedule more work.
			task();
			count += 1;
		}
	}

	pub fn len(&self) -> usize {
		self.state.lock().tasks.len()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[test]
	fn test_wakeup_once_per_drain() {
		let queue = Queue::default();
		assert!(queue.push(Box::new(|| {})));
		assert!(!queue.push(Box::new(|| {})));
		assert_eq!(queue.len(), 2);

		assert_eq!(queue.drain(), 2);
		assert_eq!(queue.len(), 0);

		assert!(queue.push(Box::new(|| {})));
	}

	#[test]
	fn test_drain_runs_nested_pushes_in_order() {
		let queue = Arc::new(Queue::default());
		let log = Arc::new(Mutex::new(Vec::new()));

		let (q, l) = (queue.clone(), log.clone());
		queue.push(Box::new(move || {
			l.lock().push(1);
			let l = l.clone();
			// Already armed, so no new wakeup is requested.
			assert!(!q.push(Box::new(move || l.lock().push(3))));
		}));

		let l = log.clone();
		queue.push(Box::new(move || l.lock().push(2)));

		assert_eq!(queue.drain(), 3);
		assert_eq!(*log.lock(), vec![1, 2, 3]);
	}
}
