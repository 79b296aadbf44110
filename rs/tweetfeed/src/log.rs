use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Logging configuration.
///
/// `RUST_LOG` directives, when set, refine the level given here.
#[derive(Clone, Debug, clap::Args)]
pub struct Log {
	/// The minimum level to log: error, warn, info, debug or trace.
	#[arg(id = "log-level", long = "log-level", env = "TWEETFEED_LOG_LEVEL", default_value = "info")]
	pub level: Level,
}

impl Default for Log {
	fn default() -> Self {
		Self { level: Level::INFO }
	}
}

impl Log {
	pub fn new(level: Level) -> Self {
		Self { level }
	}

	/// Install a global subscriber writing to stderr.
	///
	/// Does nothing if a subscriber is already installed, so hosts may call this more than once.
	pub fn init(&self) {
		let filter = EnvFilter::builder()
			.with_default_directive(LevelFilter::from_level(self.level).into())
			.from_env_lossy();

		let res = tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_writer(std::io::stderr)
			.with_thread_names(true)
			.try_init();

		match res {
			Ok(()) => tracing::debug!(level = %self.level, "logging initialized"),
			Err(_) => tracing::debug!("logging already initialized"),
		}
	}
}
