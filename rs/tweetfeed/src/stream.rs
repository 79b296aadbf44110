use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::feed::{Credentials, Shutdown};
use crate::{Context, Error, Tweet};

/// The lifecycle of a [Stream].
///
/// `Stopped` and `Failed` are terminal; a stream never leaves them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	Created,
	Started,
	Running,
	Stopped,
	Failed,
}

impl State {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Stopped | Self::Failed)
	}

	/// A non-negative code returned over the C ABI.
	pub fn code(&self) -> i32 {
		match self {
			Self::Created => 0,
			Self::Started => 1,
			Self::Running => 2,
			Self::Stopped => 3,
			Self::Failed => 4,
		}
	}
}

/// Receives a stream's output on the context's loop thread.
pub trait Deliver: Send + 'static {
	/// Ownership of the tweet moves to the receiver.
	fn tweet(&mut self, tweet: Box<Tweet>);

	/// Called on `Running` and on the terminal transition, after every tweet scheduled before it.
	/// A failure is reported as `Err`.
	fn status(&mut self, _status: Result<State, Error>) {}
}

impl<F: FnMut(Box<Tweet>) + Send + 'static> Deliver for F {
	fn tweet(&mut self, tweet: Box<Tweet>) {
		self(tweet)
	}
}

struct Status {
	current: Mutex<(State, Option<Error>)>,
	changed: Condvar,
}

impl Status {
	fn new() -> Self {
		Self {
			current: Mutex::new((State::Created, None)),
			changed: Condvar::new(),
		}
	}

	fn get(&self) -> State {
		self.current.lock().0
	}

	/// Returns false if the stream is already terminal.
	fn set(&self, state: State, error: Option<Error>) -> bool {
		let mut current = self.current.lock();
		if current.0.is_terminal() {
			return false;
		}

		*current = (state, error);
		self.changed.notify_all();
		true
	}

	fn set_if_created(&self, state: State) -> bool {
		let mut current = self.current.lock();
		if current.0 != State::Created {
			return false;
		}

		current.0 = state;
		self.changed.notify_all();
		true
	}

	fn wait_terminal(&self, timeout: Duration) -> State {
		let deadline = Instant::now() + timeout;
		let mut current = self.current.lock();
		while !current.0.is_terminal() {
			if self.changed.wait_until(&mut current, deadline).timed_out() {
				break;
			}
		}
		current.0
	}
}

#[derive(Default)]
struct Worker {
	handle: Option<thread::JoinHandle<()>>,
	shutdown: Shutdown,
	closed: bool,
}

/// A feed attached to a [Context].
///
/// Owns a worker thread once started; records flow from the feed session on that thread,
/// through the context's loop adapter, to the registered [Deliver] on the loop's thread.
pub struct Stream {
	context: Arc<Context>,
	credentials: Credentials,
	status: Arc<Status>,
	worker: Mutex<Worker>,
}

impl Stream {
	/// Validate the credentials and attach to the context. Nothing touches the network yet.
	pub fn new(context: Arc<Context>, credentials: Credentials) -> Result<Self, Error> {
		context.connector().validate(&credentials)?;
		context.attach()?;

		Ok(Self {
			context,
			credentials,
			status: Arc::new(Status::new()),
			worker: Mutex::default(),
		})
	}

	/// Register the receiver and spawn the worker.
	///
	/// Returns as soon as the worker is spawned; connection failures are reported
	/// through [Deliver::status] and [Stream::state].
	pub fn start(&self, deliver: impl Deliver) -> Result<(), Error> {
		let mut worker = self.worker.lock();
		if worker.handle.is_some() || worker.closed || !self.status.set_if_created(State::Started) {
			return Err(Error::AlreadyStarted);
		}

		let deliver: Box<dyn Deliver> = Box::new(deliver);
		let run = Run {
			context: self.context.clone(),
			credentials: self.credentials.clone(),
			shutdown: worker.shutdown.clone(),
			status: self.status.clone(),
			deliver: Arc::new(Mutex::new(deliver)),
		};

		let handle = thread::Builder::new()
			.name("tweetfeed-stream".into())
			.spawn(move || run.run());

		match handle {
			Ok(handle) => {
				worker.handle = Some(handle);
				Ok(())
			}
			Err(err) => {
				let err = Error::from(err);
				self.status.set(State::Failed, Some(err.clone()));
				Err(err)
			}
		}
	}

	/// Stop the feed and wait for the worker to exit.
	///
	/// Tweets already scheduled on the loop are still delivered; none are scheduled
	/// after this returns.
	pub fn stop(&self) {
		let mut worker = self.worker.lock();
		worker.shutdown.trigger();

		if let Some(handle) = worker.handle.take() {
			if handle.join().is_err() {
				tracing::error!("stream worker panicked");
				self.status.set(State::Failed, Some(Error::Panic));
			}
		}

		// Covers a stream that was never started; the worker sets its own terminal state.
		self.status.set(State::Stopped, None);
	}

	/// Stop and detach from the context. Idempotent.
	pub fn close(&self) {
		self.stop();

		let mut worker = self.worker.lock();
		if !std::mem::replace(&mut worker.closed, true) {
			self.context.detach();
		}
	}

	pub fn state(&self) -> State {
		self.status.get()
	}

	/// The error that moved the stream to [State::Failed].
	pub fn error(&self) -> Option<Error> {
		self.status.current.lock().1.clone()
	}

	/// Block until the stream is terminal or `timeout` elapses, returning the state.
	pub fn wait(&self, timeout: Duration) -> State {
		self.status.wait_terminal(timeout)
	}

	pub fn context(&self) -> &Arc<Context> {
		&self.context
	}
}

impl Drop for Stream {
	fn drop(&mut self) {
		self.close();
	}
}

impl fmt::Debug for Stream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Stream")
			.field("state", &self.state())
			.field("credentials", &self.credentials)
			.finish()
	}
}

/// Everything the worker thread owns.
struct Run {
	context: Arc<Context>,
	credentials: Credentials,
	shutdown: Shutdown,
	status: Arc<Status>,
	deliver: Arc<Mutex<Box<dyn Deliver>>>,
}

impl Run {
	fn run(self) {
		let result = self.run_feed();

		let (state, error) = match result {
			Ok(()) => (State::Stopped, None),
			Err(err) => {
				tracing::warn!(%err, "stream failed");
				(State::Failed, Some(err))
			}
		};

		// Only the worker moves a started stream to a terminal state.
		// The status is queued before the state is published, so waiters never miss it.
		self.notify(match &error {
			Some(err) => Err(err.clone()),
			None => Ok(state),
		});
		self.status.set(state, error);

		tracing::info!(?state, "stream worker exited");
	}

	fn run_feed(&self) -> Result<(), Error> {
		let mut session = match self.context.connector().connect(&self.credentials, &self.shutdown) {
			Ok(session) => session,
			Err(_) if self.shutdown.is_triggered() => return Ok(()),
			Err(err) => return Err(Error::ConnectionFailed(Arc::new(err))),
		};

		if self.status.set(State::Running, None) {
			tracing::info!("stream running");
			self.notify(Ok(State::Running));
		}

		let mut delivered = 0u64;

		loop {
			if self.shutdown.is_triggered() {
				tracing::debug!(%delivered, "stream stopping");
				return Ok(());
			}

			match session.next_record() {
				Ok(Some(record)) => {
					let tweet = Tweet::from_record(&record)?;
					let deliver = self.deliver.clone();
					self.context.schedule(Box::new(move || deliver.lock().tweet(tweet)))?;

					delivered += 1;
					tracing::trace!(%delivered, "scheduled tweet");
				}
				Ok(None) => {
					tracing::info!(%delivered, "feed ended");
					return Ok(());
				}
				Err(err) if err.is_transient() => {
					tracing::warn!(%err, "transient feed error");
				}
				Err(_) if self.shutdown.is_triggered() => return Ok(()),
				Err(err) => return Err(Error::Failed(Arc::new(err))),
			}
		}
	}

	fn notify(&self, status: Result<State, Error>) {
		let deliver = self.deliver.clone();
		if let Err(err) = self.context.schedule(Box::new(move || deliver.lock().status(status))) {
			tracing::warn!(%err, "failed to schedule status");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::mpsc;

	use super::*;
	use crate::adapter::{LoopAdapter, Polled, Task, ThreadLoop};
	use crate::feed::{Admit, FeedError, RawRecord, Replay, Retry, RetryConfig, Step};

	/// Wraps a thread loop and records which thread submitted each task.
	struct Recording {
		inner: ThreadLoop,
		submitters: Arc<Mutex<Vec<thread::ThreadId>>>,
	}

	impl LoopAdapter for Recording {
		fn schedule(&self, task: Task) -> Result<(), Error> {
			self.submitters.lock().push(thread::current().id());
			self.inner.schedule(task)
		}
	}

	#[derive(Debug)]
	enum Event {
		Tweet(String, String, thread::ThreadId),
		Status(Result<State, i32>),
	}

	struct Recorder(mpsc::Sender<Event>);

	impl Deliver for Recorder {
		fn tweet(&mut self, tweet: Box<Tweet>) {
			let user = String::from_utf8_lossy(tweet.user_name()).into_owned();
			let body = String::from_utf8_lossy(tweet.body()).into_owned();
			self.0.send(Event::Tweet(user, body, thread::current().id())).ok();
		}

		fn status(&mut self, status: Result<State, Error>) {
			self.0.send(Event::Status(status.map_err(|err| err.code()))).ok();
		}
	}

	fn credentials() -> Credentials {
		Credentials::new("key", "secret", "token", "token-secret")
	}

	fn recorder() -> (Recorder, mpsc::Receiver<Event>) {
		let (tx, rx) = mpsc::channel();
		(Recorder(tx), rx)
	}

	/// Collect events until a terminal status arrives.
	fn collect(rx: &mpsc::Receiver<Event>) -> Vec<Event> {
		let mut events = Vec::new();
		loop {
			let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
			let done = matches!(&event, Event::Status(Ok(State::Stopped) | Err(_)));
			events.push(event);
			if done {
				return events;
			}
		}
	}

	#[test]
	fn test_delivers_in_order_on_loop_thread() {
		let submitters = Arc::new(Mutex::new(Vec::new()));
		let adapter = Recording {
			inner: ThreadLoop::new("test-loop").unwrap(),
			submitters: submitters.clone(),
		};
		let loop_id = adapter.inner.thread().id();

		let replay = Replay::records([("alice", "hi"), ("bob", "yo")]);
		let context = Arc::new(Context::new(adapter).with_connector(replay));
		let stream = Stream::new(context.clone(), credentials()).unwrap();

		let (deliver, rx) = recorder();
		stream.start(deliver).unwrap();

		let events = collect(&rx);
		assert!(matches!(&events[0], Event::Status(Ok(State::Running))));

		let tweets: Vec<_> = events
			.iter()
			.filter_map(|event| match event {
				Event::Tweet(user, body, thread) => {
					assert_eq!(*thread, loop_id);
					Some((user.as_str(), body.as_str()))
				}
				_ => None,
			})
			.collect();
		assert_eq!(tweets, vec![("alice", "hi"), ("bob", "yo")]);
		assert!(matches!(events.last(), Some(Event::Status(Ok(State::Stopped)))));

		// Everything was scheduled from the worker thread, never the loop thread.
		let submitters = submitters.lock();
		assert_eq!(submitters.len(), 4);
		assert!(submitters.iter().all(|id| *id != loop_id && *id != thread::current().id()));

		assert_eq!(stream.wait(Duration::from_secs(5)), State::Stopped);
	}

	#[test]
	fn test_permanent_error_fails_without_delivery() {
		let replay = Replay::new([Step::Permanent("account suspended".into())]);
		let context = Arc::new(Context::new(ThreadLoop::new("test-loop").unwrap()).with_connector(replay));
		let stream = Stream::new(context, credentials()).unwrap();

		let (deliver, rx) = recorder();
		stream.start(deliver).unwrap();

		let failed = Error::Failed(Arc::new(FeedError::Unauthorized)).code();

		let events = collect(&rx);
		assert_eq!(events.len(), 2);
		assert!(matches!(events[0], Event::Status(Ok(State::Running))));
		assert!(matches!(events[1], Event::Status(Err(code)) if code == failed));

		assert_eq!(stream.wait(Duration::from_secs(5)), State::Failed);
		assert!(matches!(stream.error(), Some(Error::Failed(_))));
	}

	#[test]
	fn test_connect_failure() {
		let replay = Replay::records([("alice", "hi")]).admit(Admit::Unauthorized);
		let context = Arc::new(Context::new(ThreadLoop::new("test-loop").unwrap()).with_connector(replay));
		let stream = Stream::new(context, credentials()).unwrap();

		let (deliver, rx) = recorder();
		stream.start(deliver).unwrap();

		let events = collect(&rx);
		assert_eq!(events.len(), 1);
		assert_eq!(stream.state(), State::Failed);
		assert!(matches!(stream.error(), Some(Error::ConnectionFailed(_))));
	}

	#[test]
	fn test_transient_errors_are_skipped() {
		let replay = Replay::new([
			Step::Record(RawRecord::new("alice", "hi")),
			Step::Transient("hiccup".into()),
			Step::Record(RawRecord::new("bob", "yo")),
		]);
		let context = Arc::new(Context::new(ThreadLoop::new("test-loop").unwrap()).with_connector(replay));
		let stream = Stream::new(context, credentials()).unwrap();

		let (deliver, rx) = recorder();
		stream.start(deliver).unwrap();

		let tweets = collect(&rx)
			.into_iter()
			.filter(|event| matches!(event, Event::Tweet(..)))
			.count();
		assert_eq!(tweets, 2);
		assert_eq!(stream.wait(Duration::from_secs(5)), State::Stopped);
	}

	#[test]
	fn test_start_twice() {
		let replay = Replay::new([Step::Hang]);
		let context = Arc::new(Context::new(ThreadLoop::new("test-loop").unwrap()).with_connector(replay.clone()));
		let stream = Stream::new(context, credentials()).unwrap();

		stream.start(|_tweet: Box<Tweet>| {}).unwrap();
		assert!(matches!(stream.start(|_tweet: Box<Tweet>| {}), Err(Error::AlreadyStarted)));

		stream.stop();
		assert_eq!(stream.state(), State::Stopped);
		assert_eq!(replay.connects(), 1);

		// Terminal states are final.
		assert!(matches!(stream.start(|_tweet: Box<Tweet>| {}), Err(Error::AlreadyStarted)));
	}

	#[test]
	fn test_stop_joins_live_feed() {
		let replay = Replay::new([Step::Record(RawRecord::new("alice", "hi")), Step::Hang]);
		let context = Arc::new(Context::new(ThreadLoop::new("test-loop").unwrap()).with_connector(replay));
		let stream = Stream::new(context, credentials()).unwrap();

		let (deliver, rx) = recorder();
		stream.start(deliver).unwrap();

		// Wait for the first tweet, then stop while the feed is blocked.
		loop {
			if let Event::Tweet(..) = rx.recv_timeout(Duration::from_secs(5)).unwrap() {
				break;
			}
		}

		stream.stop();
		assert_eq!(stream.state(), State::Stopped);

		let events = collect(&rx);
		assert!(matches!(events.last(), Some(Event::Status(Ok(State::Stopped)))));
	}

	#[test]
	fn test_stop_during_reconnect_backoff() {
		let replay = Replay::default().admit(Admit::Flaky(1000));
		let backoff = Duration::from_secs(30);
		let retry = Retry::new(replay.clone(), RetryConfig::new(5, backoff, backoff));

		let context = Arc::new(Context::new(ThreadLoop::new("test-loop").unwrap()).with_connector(retry));
		let stream = Stream::new(context, credentials()).unwrap();

		let (deliver, rx) = recorder();
		stream.start(deliver).unwrap();

		std::thread::sleep(Duration::from_millis(50));
		stream.stop();

		// Never connected, so never running.
		let events = collect(&rx);
		assert_eq!(events.len(), 1);
		assert!(matches!(events[0], Event::Status(Ok(State::Stopped))));
		assert_eq!(stream.state(), State::Stopped);
		assert!(stream.error().is_none());
		assert_eq!(replay.connects(), 1);
	}

	#[test]
	fn test_stop_before_start() {
		let context = Arc::new(Context::new(Polled::default()).with_connector(Replay::default()));
		let stream = Stream::new(context, credentials()).unwrap();

		stream.stop();
		assert_eq!(stream.state(), State::Stopped);
		assert!(matches!(stream.start(|_tweet: Box<Tweet>| {}), Err(Error::AlreadyStarted)));
	}

	#[test]
	fn test_invalid_credentials() {
		let context = Arc::new(Context::new(Polled::default()).with_connector(Replay::default()));

		let creds = Credentials::new("key", "secret", "", "token-secret");
		let err = Stream::new(context.clone(), creds).unwrap_err();
		assert!(matches!(err, Error::InvalidCredentials(_)));
		assert_eq!(context.streams(), 0);
	}

	#[test]
	fn test_close_detaches() {
		let context = Arc::new(Context::new(Polled::default()).with_connector(Replay::default()));
		let stream = Stream::new(context.clone(), credentials()).unwrap();
		assert_eq!(context.streams(), 1);

		stream.close();
		stream.close();
		assert_eq!(context.streams(), 0);

		drop(stream);
		assert_eq!(context.streams(), 0);
	}

	#[test]
	fn test_polled_holds_deliveries_until_dispatch() {
		let replay = Replay::records([("alice", "hi"), ("bob", "yo")]);
		let context = Arc::new(Context::new(Polled::default()).with_connector(replay));
		let stream = Stream::new(context.clone(), credentials()).unwrap();

		let log = Arc::new(Mutex::new(Vec::new()));
		let sink = log.clone();
		stream
			.start(move |tweet: Box<Tweet>| sink.lock().push(tweet.body().to_vec()))
			.unwrap();

		assert_eq!(stream.wait(Duration::from_secs(5)), State::Stopped);
		assert!(log.lock().is_empty());

		let polled = context.adapter().as_polled().unwrap();
		// Running, two tweets, Stopped.
		assert_eq!(polled.dispatch(), 4);
		assert_eq!(*log.lock(), vec![b"hi".to_vec(), b"yo".to_vec()]);
	}
}
