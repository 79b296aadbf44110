use std::sync::Arc;
use std::time::Duration;

use super::{Connector, Credentials, FeedError, RawRecord, Session, Shutdown};
use crate::Error;

/// Reconnect policy for transient feed errors.
#[derive(Clone, Debug, clap::Args, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct RetryConfig {
	/// Consecutive failed attempts before giving up.
	#[arg(
		id = "retry-attempts",
		long = "retry-attempts",
		env = "TWEETFEED_RETRY_ATTEMPTS",
		default_value = "5"
	)]
	pub attempts: u32,

	/// Delay before the first reconnect; doubled on every failure.
	#[arg(
		id = "retry-initial",
		long = "retry-initial",
		env = "TWEETFEED_RETRY_INITIAL",
		default_value = "1s",
		value_parser = humantime::parse_duration,
	)]
	#[serde(with = "humantime_serde")]
	pub initial: Duration,

	/// Upper bound on the reconnect delay.
	#[arg(
		id = "retry-max",
		long = "retry-max",
		env = "TWEETFEED_RETRY_MAX",
		default_value = "60s",
		value_parser = humantime::parse_duration,
	)]
	#[serde(with = "humantime_serde")]
	pub max: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			attempts: 5,
			initial: Duration::from_secs(1),
			max: Duration::from_secs(60),
		}
	}
}

impl RetryConfig {
	pub fn new(attempts: u32, initial: Duration, max: Duration) -> Self {
		Self { attempts, initial, max }
	}

	fn backoff(&self, failures: u32) -> Duration {
		let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
		self.initial.saturating_mul(factor).min(self.max)
	}
}

/// Wraps a connector so transient errors are retried with exponential backoff.
///
/// Transient failures never escape; once `attempts` consecutive tries fail,
/// the last error is reported as permanent.
pub struct Retry<C> {
	inner: Arc<C>,
	config: RetryConfig,
}

impl<C: Connector> Retry<C> {
	pub fn new(inner: C, config: RetryConfig) -> Self {
		Self {
			inner: Arc::new(inner),
			config,
		}
	}
}

/// Connect, retrying transient failures.
///
/// A shutdown during backoff is an error: no session exists to hand back.
fn connect<C: Connector>(
	inner: &C,
	config: &RetryConfig,
	credentials: &Credentials,
	shutdown: &Shutdown,
) -> Result<Box<dyn Session>, FeedError> {
	let mut failures = 0;

	loop {
		match inner.connect(credentials, shutdown) {
			Ok(session) => return Ok(session),
			Err(FeedError::Transient(err)) => {
				failures += 1;
				if failures >= config.attempts {
					tracing::warn!(%failures, "giving up on feed");
					return Err(FeedError::Permanent(err.context("retries exhausted")));
				}

				let backoff = config.backoff(failures);
				tracing::warn!(err = %format!("{err:#}"), %failures, ?backoff, "feed connect failed, retrying");

				if shutdown.wait_timeout(backoff) {
					return Err(FeedError::Permanent(err.context("stopped while reconnecting")));
				}
			}
			Err(err) => return Err(err),
		}
	}
}

impl<C: Connector> Connector for Retry<C> {
	fn validate(&self, credentials: &Credentials) -> Result<(), Error> {
		self.inner.validate(credentials)
	}

	fn connect(&self, credentials: &Credentials, shutdown: &Shutdown) -> Result<Box<dyn Session>, FeedError> {
		let session = connect(self.inner.as_ref(), &self.config, credentials, shutdown)?;

		Ok(Box::new(RetrySession {
			inner: self.inner.clone(),
			config: self.config.clone(),
			credentials: credentials.clone(),
			shutdown: shutdown.clone(),
			session,
		}))
	}
}

struct RetrySession<C> {
	inner: Arc<C>,
	config: RetryConfig,
	credentials: Credentials,
	shutdown: Shutdown,
	session: Box<dyn Session>,
}

impl<C: Connector> Session for RetrySession<C> {
	fn next_record(&mut self) -> Result<Option<RawRecord>, FeedError> {
		loop {
			match self.session.next_record() {
				Err(FeedError::Transient(err)) => {
					tracing::warn!(err = %format!("{err:#}"), "feed dropped, reconnecting");
					self.session = match connect(self.inner.as_ref(), &self.config, &self.credentials, &self.shutdown) {
						Ok(session) => session,
						Err(_) if self.shutdown.is_triggered() => return Ok(None),
						Err(err) => return Err(err),
					};
				}
				res => return res,
			}
		}
	}
}
