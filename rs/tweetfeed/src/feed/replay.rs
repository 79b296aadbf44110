use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Connector, Credentials, FeedError, RawRecord, Session, Shutdown};

/// One scripted step of a [Replay] feed.
#[derive(Clone, Debug)]
pub enum Step {
	Record(RawRecord),
	Transient(String),
	Permanent(String),
	/// Block until the stream is stopped, like a live feed with nothing to say.
	Hang,
}

impl From<RawRecord> for Step {
	fn from(record: RawRecord) -> Self {
		Self::Record(record)
	}
}

/// How [Replay::connect] behaves.
#[derive(Clone, Debug, Default)]
pub enum Admit {
	#[default]
	Accept,
	Unauthorized,
	/// Fail transiently this many times, then accept.
	Flaky(usize),
	Permanent(String),
}

/// An in-memory feed that plays back a fixed script.
///
/// All sessions share one cursor, so reconnecting resumes where the last session left off.
#[derive(Clone, Default)]
pub struct Replay {
	steps: Arc<Mutex<VecDeque<Step>>>,
	admit: Admit,
	delay: Option<Duration>,
	connects: Arc<AtomicUsize>,
}

impl Replay {
	pub fn new<I, S>(steps: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<Step>,
	{
		Self {
			steps: Arc::new(Mutex::new(steps.into_iter().map(Into::into).collect())),
			..Default::default()
		}
	}

	pub fn records<I, U, B>(records: I) -> Self
	where
		I: IntoIterator<Item = (U, B)>,
		U: Into<Vec<u8>>,
		B: Into<Vec<u8>>,
	{
		Self::new(records.into_iter().map(|(user, body)| RawRecord::new(user, body)))
	}

	pub fn admit(mut self, admit: Admit) -> Self {
		self.admit = admit;
		self
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}

	/// The number of connection attempts so far.
	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	/// The number of steps not yet played.
	pub fn remaining(&self) -> usize {
		self.steps.lock().len()
	}
}

impl Connector for Replay {
	fn connect(&self, _credentials: &Credentials, shutdown: &Shutdown) -> Result<Box<dyn Session>, FeedError> {
		let attempt = self.connects.fetch_add(1, Ordering::SeqCst);

		match &self.admit {
			Admit::Accept => {}
			Admit::Unauthorized => return Err(FeedError::Unauthorized),
			Admit::Flaky(failures) if attempt < *failures => {
				return Err(FeedError::Transient(anyhow::anyhow!("connect attempt {attempt} refused")));
			}
			Admit::Flaky(_) => {}
			Admit::Permanent(reason) => return Err(FeedError::Permanent(anyhow::anyhow!("{reason}"))),
		}

		Ok(Box::new(ReplaySession {
			steps: self.steps.clone(),
			delay: self.delay,
			shutdown: shutdown.clone(),
		}))
	}
}

struct ReplaySession {
	steps: Arc<Mutex<VecDeque<Step>>>,
	delay: Option<Duration>,
	shutdown: Shutdown,
}

impl Session for ReplaySession {
	fn next_record(&mut self) -> Result<Option<RawRecord>, FeedError> {
		if let Some(delay) = self.delay {
			if self.shutdown.wait_timeout(delay) {
				return Ok(None);
			}
		}

		// Hang stays at the front so every later call hangs too.
		let mut steps = self.steps.lock();
		let step = if matches!(steps.front(), Some(Step::Hang)) {
			Step::Hang
		} else {
			match steps.pop_front() {
				Some(step) => step,
				None => return Ok(None),
			}
		};
		drop(steps);

		match step {
			Step::Record(record) => Ok(Some(record)),
			Step::Transient(reason) => Err(FeedError::Transient(anyhow::anyhow!("{reason}"))),
			Step::Permanent(reason) => Err(FeedError::Permanent(anyhow::anyhow!("{reason}"))),
			Step::Hang => {
				while !self.shutdown.wait_timeout(Duration::from_secs(3600)) {}
				Ok(None)
			}
		}
	}
}
