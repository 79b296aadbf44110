use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use super::{Connector, Credentials, FeedError, RawRecord, Session, Shutdown};

#[derive(Deserialize)]
struct Message {
	text: Option<String>,
	full_text: Option<String>,
	extended_tweet: Option<Extended>,
	user: Option<User>,
	disconnect: Option<Disconnect>,
}

#[derive(Deserialize)]
struct Extended {
	full_text: String,
}

#[derive(Deserialize)]
struct User {
	screen_name: Option<String>,
	name: Option<String>,
}

#[derive(Deserialize)]
struct Disconnect {
	code: Option<u32>,
	reason: Option<String>,
}

/// Reads newline-delimited JSON status objects, in the streaming API's format.
///
/// Blank keep-alive lines and messages that are not posts (deletes, limits, warnings)
/// are skipped. A `disconnect` message is reported as a transient error.
pub struct Lines<R> {
	reader: R,
	line: String,
	pace: Option<(Duration, Shutdown)>,
}

impl<R: BufRead + Send + 'static> Lines<R> {
	pub fn new(reader: R) -> Self {
		Self {
			reader,
			line: String::new(),
			pace: None,
		}
	}

	/// Wait `delay` before returning each record, to mimic a live feed.
	pub fn paced(mut self, delay: Duration, shutdown: Shutdown) -> Self {
		self.pace = Some((delay, shutdown));
		self
	}

	fn parse(line: &str) -> Result<Option<RawRecord>, FeedError> {
		let message: Message = match serde_json::from_str(line) {
			Ok(message) => message,
			Err(err) => {
				tracing::warn!(%err, "skipping malformed line");
				return Ok(None);
			}
		};

		if let Some(disconnect) = message.disconnect {
			return Err(FeedError::Transient(anyhow::anyhow!(
				"disconnected by server: code={:?} reason={:?}",
				disconnect.code,
				disconnect.reason
			)));
		}

		let body = message
			.extended_tweet
			.map(|extended| extended.full_text)
			.or(message.full_text)
			.or(message.text);

		let user_name = message.user.and_then(|user| user.screen_name.or(user.name));

		match (user_name, body) {
			(Some(user_name), Some(body)) => Ok(Some(RawRecord::new(user_name, body))),
			_ => Ok(None),
		}
	}
}

impl<R: BufRead + Send + 'static> Session for Lines<R> {
	fn next_record(&mut self) -> Result<Option<RawRecord>, FeedError> {
		loop {
			self.line.clear();

			let size = self
				.reader
				.read_line(&mut self.line)
				.context("failed to read feed")
				.map_err(FeedError::Transient)?;

			if size == 0 {
				return Ok(None);
			}

			let line = self.line.trim();
			if line.is_empty() {
				continue;
			}

			let Some(record) = Self::parse(line)? else {
				continue;
			};

			if let Some((delay, shutdown)) = &self.pace {
				if shutdown.wait_timeout(*delay) {
					return Ok(None);
				}
			}

			return Ok(Some(record));
		}
	}
}

/// Replays a JSON-lines file as the feed, ignoring the credentials.
#[derive(Clone, Debug)]
pub struct FileConnector {
	pub path: PathBuf,
	pub delay: Option<Duration>,
}

impl FileConnector {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			delay: None,
		}
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}
}

impl Connector for FileConnector {
	fn connect(&self, _credentials: &Credentials, shutdown: &Shutdown) -> Result<Box<dyn Session>, FeedError> {
		let file = fs::File::open(&self.path)
			.with_context(|| format!("failed to open {}", self.path.display()))
			.map_err(|err| match err.downcast_ref::<io::Error>().map(io::Error::kind) {
				Some(io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => FeedError::Permanent(err),
				_ => FeedError::Transient(err),
			})?;

		tracing::info!(path = %self.path.display(), "replaying feed file");

		let lines = Lines::new(io::BufReader::new(file));
		Ok(match self.delay {
			Some(delay) => Box::new(lines.paced(delay, shutdown.clone())),
			None => Box::new(lines),
		})
	}
}
