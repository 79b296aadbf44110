//! The feed session: authenticates, connects, and produces raw post records.
//!
//! The stream worker only relies on [Connector] and [Session]; everything about
//! the wire protocol lives behind them.

mod json;
mod replay;
mod retry;

pub use json::*;
pub use replay::*;
pub use retry::*;

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::Error;

/// A failure reported by a feed session.
#[derive(thiserror::Error, Debug)]
pub enum FeedError {
	/// The credentials were rejected; retrying will not help.
	#[error("unauthorized")]
	Unauthorized,

	/// The connection dropped or stalled; the same call may succeed later.
	#[error("transient: {0:#}")]
	Transient(anyhow::Error),

	#[error("permanent: {0:#}")]
	Permanent(anyhow::Error),
}

impl FeedError {
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_))
	}
}

/// One post as produced by the feed, before it is marshalled into a [crate::Tweet].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
	pub user_name: Vec<u8>,
	pub body: Vec<u8>,
}

impl RawRecord {
	pub fn new(user_name: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>) -> Self {
		Self {
			user_name: user_name.into(),
			body: body.into(),
		}
	}
}

/// OAuth 1.0a credentials, copied out of the caller's buffers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
	pub consumer_key: Vec<u8>,
	pub consumer_secret: Vec<u8>,
	pub token: Vec<u8>,
	pub token_secret: Vec<u8>,
}

impl Credentials {
	pub fn new(
		consumer_key: impl Into<Vec<u8>>,
		consumer_secret: impl Into<Vec<u8>>,
		token: impl Into<Vec<u8>>,
		token_secret: impl Into<Vec<u8>>,
	) -> Self {
		Self {
			consumer_key: consumer_key.into(),
			consumer_secret: consumer_secret.into(),
			token: token.into(),
			token_secret: token_secret.into(),
		}
	}

	/// Every field must be present.
	pub fn validate(&self) -> Result<(), Error> {
		let fields = [
			(&self.consumer_key, "empty consumer key"),
			(&self.consumer_secret, "empty consumer secret"),
			(&self.token, "empty token"),
			(&self.token_secret, "empty token secret"),
		];

		for (field, reason) in fields {
			if field.is_empty() {
				return Err(Error::InvalidCredentials(reason));
			}
		}

		Ok(())
	}
}

// Never print the secrets.
impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("consumer_key", &String::from_utf8_lossy(&self.consumer_key))
			.field("consumer_secret", &"<redacted>")
			.field("token", &String::from_utf8_lossy(&self.token))
			.field("token_secret", &"<redacted>")
			.finish()
	}
}

/// A one-way signal raised when the owning stream is stopped.
///
/// Sessions that wait on anything other than the network should wait on this instead.
#[derive(Clone, Default)]
pub struct Shutdown {
	inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn trigger(&self) {
		let (triggered, cond) = &*self.inner;
		*triggered.lock() = true;
		cond.notify_all();
	}

	pub fn is_triggered(&self) -> bool {
		*self.inner.0.lock()
	}

	/// Sleep for up to `timeout`, waking early on shutdown.
	///
	/// Returns true if the signal was raised.
	pub fn wait_timeout(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let (triggered, cond) = &*self.inner;

		let mut triggered = triggered.lock();
		while !*triggered {
			if cond.wait_until(&mut triggered, deadline).timed_out() {
				break;
			}
		}

		*triggered
	}
}

impl fmt::Debug for Shutdown {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Shutdown")
			.field("triggered", &self.is_triggered())
			.finish()
	}
}

/// Produces sessions for a set of credentials.
pub trait Connector: Send + Sync + 'static {
	/// Reject credentials before a stream is created.
	fn validate(&self, credentials: &Credentials) -> Result<(), Error> {
		credentials.validate()
	}

	/// Authenticate and open the feed. Called on the stream's worker thread.
	fn connect(&self, credentials: &Credentials, shutdown: &Shutdown) -> Result<Box<dyn Session>, FeedError>;
}

/// A lazy, unbounded, non-restartable sequence of records.
pub trait Session: Send + 'static {
	/// Block until the next record arrives.
	///
	/// Returns `Ok(None)` once the feed has ended.
	fn next_record(&mut self) -> Result<Option<RawRecord>, FeedError>;
}

impl<C: Connector> Connector for Arc<C> {
	fn validate(&self, credentials: &Credentials) -> Result<(), Error> {
		(**self).validate(credentials)
	}

	fn connect(&self, credentials: &Credentials, shutdown: &Shutdown) -> Result<Box<dyn Session>, FeedError> {
		(**self).connect(credentials, shutdown)
	}
}

/// The connector used before the host installs one.
pub struct Unconfigured;

impl Connector for Unconfigured {
	fn connect(&self, _credentials: &Credentials, _shutdown: &Shutdown) -> Result<Box<dyn Session>, FeedError> {
		Err(FeedError::Permanent(anyhow::anyhow!("no feed connector configured")))
	}
}

static DEFAULT: LazyLock<RwLock<Arc<dyn Connector>>> = LazyLock::new(|| RwLock::new(Arc::new(Unconfigured)));

/// Install the connector used by contexts created through the C API.
///
/// Contexts that already exist keep the connector they were created with.
pub fn set_default(connector: impl Connector) {
	*DEFAULT.write() = Arc::new(connector);
}

pub fn default_connector() -> Arc<dyn Connector> {
	DEFAULT.read().clone()
}
