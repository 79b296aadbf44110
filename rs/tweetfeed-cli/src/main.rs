use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use tweetfeed::feed::{Credentials, FileConnector, Retry, RetryConfig};
use tweetfeed::{Context, Deliver, Error, State, Stream, Tweet, adapter::ThreadLoop};

#[derive(Parser, Clone)]
pub struct Config {
	/// A JSON-lines file of streaming API messages to replay.
	#[arg(long, env = "TWEETFEED_FEED")]
	pub feed: PathBuf,

	/// Pause between posts, as a live feed would.
	#[arg(long, value_parser = humantime::parse_duration)]
	pub delay: Option<Duration>,

	/// Stop after this many posts.
	#[arg(long)]
	pub limit: Option<usize>,

	/// The OAuth credentials.
	#[command(flatten)]
	pub auth: Auth,

	/// The reconnect policy.
	#[command(flatten)]
	pub retry: RetryConfig,

	/// The log configuration.
	#[command(flatten)]
	pub log: tweetfeed::Log,
}

#[derive(clap::Args, Clone)]
pub struct Auth {
	#[arg(long, env = "TWEETFEED_CONSUMER_KEY", default_value = "replay")]
	pub consumer_key: String,

	#[arg(long, env = "TWEETFEED_CONSUMER_SECRET", default_value = "replay", hide_env_values = true)]
	pub consumer_secret: String,

	#[arg(long, env = "TWEETFEED_TOKEN", default_value = "replay")]
	pub token: String,

	#[arg(long, env = "TWEETFEED_TOKEN_SECRET", default_value = "replay", hide_env_values = true)]
	pub token_secret: String,
}

impl From<Auth> for Credentials {
	fn from(auth: Auth) -> Self {
		Credentials::new(auth.consumer_key, auth.consumer_secret, auth.token, auth.token_secret)
	}
}

/// Prints every post as `@user: body` on the loop thread.
struct Print {
	count: Arc<AtomicUsize>,
}

impl Deliver for Print {
	fn tweet(&mut self, tweet: Box<Tweet>) {
		let mut stdout = std::io::stdout().lock();
		let res = stdout
			.write_all(b"@")
			.and_then(|_| stdout.write_all(tweet.user_name()))
			.and_then(|_| stdout.write_all(b": "))
			.and_then(|_| stdout.write_all(tweet.body()))
			.and_then(|_| stdout.write_all(b"\n"));

		if let Err(err) = res {
			tracing::warn!(%err, "failed to print post");
		}

		self.count.fetch_add(1, Ordering::Relaxed);
	}

	fn status(&mut self, status: Result<State, Error>) {
		match status {
			Ok(state) => tracing::info!(?state, "stream status"),
			Err(err) => tracing::error!(%err, "stream failed"),
		}
	}
}

fn main() -> anyhow::Result<()> {
	let config = Config::parse();
	config.log.init();

	let mut connector = FileConnector::new(&config.feed);
	if let Some(delay) = config.delay {
		connector = connector.with_delay(delay);
	}

	let adapter = ThreadLoop::new("tweetfeed-loop").context("failed to start delivery loop")?;
	let context = Context::new(adapter).with_connector(Retry::new(connector, config.retry));
	let stream = Stream::new(Arc::new(context), config.auth.into()).context("failed to create stream")?;

	let count = Arc::new(AtomicUsize::new(0));
	stream
		.start(Print { count: count.clone() })
		.context("failed to start stream")?;

	tracing::info!(feed = %config.feed.display(), "streaming");

	loop {
		if stream.wait(Duration::from_millis(100)).is_terminal() {
			break;
		}

		if config.limit.is_some_and(|limit| count.load(Ordering::Relaxed) >= limit) {
			tracing::info!("limit reached");
			stream.stop();
			break;
		}
	}

	flush(stream.context(), Duration::from_secs(5))?;

	if let Some(err) = stream.error() {
		return Err(err).context("stream failed");
	}

	Ok(())
}

/// Wait until the loop has run everything queued so far.
///
/// The loop thread is detached, so anything still queued when `main` returns is lost.
fn flush(context: &Context, timeout: Duration) -> anyhow::Result<()> {
	let (done, flushed) = mpsc::channel();
	context
		.schedule(Box::new(move || {
			done.send(()).ok();
		}))
		.context("failed to flush delivery loop")?;

	flushed
		.recv_timeout(timeout)
		.context("timed out flushing delivery loop")?;

	std::io::stdout().flush().context("failed to flush stdout")
}
