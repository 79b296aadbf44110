use crate::adapter::{OnWakeup, Polled, ThreadLoop};
use crate::feed::{self, Credentials, FileConnector};
use crate::{Context, Error, Registry, Tweet, ffi, tweet::ByteSlice};

use std::ffi::{c_char, c_void};
use std::str::FromStr;

use tracing::Level;

/// OAuth credentials for [tweetfeed_stream_new].
///
/// The slices only need to stay valid for the duration of the call; they are copied.
#[repr(C)]
pub struct TweetFeedConfig {
	pub consumer_key: ByteSlice,
	pub consumer_secret: ByteSlice,
	pub token: ByteSlice,
	pub token_secret: ByteSlice,
}

impl TweetFeedConfig {
	/// # Safety
	///
	/// Every slice must be valid for reads, or null with a zero length.
	unsafe fn to_credentials(&self) -> Result<Credentials, Error> {
		unsafe {
			Ok(Credentials::new(
				self.consumer_key.as_slice()?,
				self.consumer_secret.as_slice()?,
				self.token.as_slice()?,
				self.token_secret.as_slice()?,
			))
		}
	}
}

/// Initialize logging with a level: "error", "warn", "info", "debug", "trace".
///
/// An empty string or null selects the default, "info".
///
/// Returns a zero on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that level is a valid null-terminated C string, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_log_level(level: *const c_char) -> i32 {
	ffi::return_code(move || {
		let log = match unsafe { ffi::parse_str(level) }? {
			"" => crate::Log::default(),
			level => crate::Log::new(Level::from_str(level).map_err(|err| Error::Log(err.to_string()))?),
		};
		log.init();

		Ok(())
	})
}

/// Create a context that delivers on a GLib main context.
///
/// Callbacks run on whichever thread iterates `ui_ctx`.
///
/// Returns a positive handle on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that ui_ctx is a valid GMainContext.
#[cfg(feature = "gtk")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_context_new_for_gtk(ui_ctx: *mut glib_sys::GMainContext) -> i32 {
	ffi::return_code(move || {
		let adapter = unsafe { crate::adapter::RunLoop::new(ui_ctx) }?;
		Registry::global().context_create(Context::new(adapter))
	})
}

/// Create a context that delivers on a serial dispatch queue, such as the main queue.
///
/// Returns a positive handle on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that ui_queue is a valid, serial dispatch queue.
#[cfg(all(feature = "libdispatch", target_vendor = "apple"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_context_new_for_libdispatch(ui_queue: dispatch::ffi::dispatch_queue_t) -> i32 {
	ffi::return_code(move || {
		let adapter = unsafe { crate::adapter::SerialQueue::new(ui_queue) }?;
		Registry::global().context_create(Context::new(adapter))
	})
}

/// Create a context whose deliveries wait for [tweetfeed_context_dispatch].
///
/// `on_wakeup` (optional) is called from a library thread whenever deliveries become
/// pending; use it to wake your loop, then call [tweetfeed_context_dispatch] from it.
///
/// Returns a positive handle on success, or a negative code on failure.
///
/// # Safety
/// - `on_wakeup` must be safe to call from any thread with `user_data` until the context is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_context_new_polled(
	on_wakeup: Option<extern "C" fn(user_data: *mut c_void)>,
	user_data: *mut c_void,
) -> i32 {
	ffi::return_code(move || {
		let wakeup = unsafe { OnWakeup::new(user_data, on_wakeup) };
		Registry::global().context_create(Context::new(Polled::new(wakeup)))
	})
}

/// Create a context with its own delivery thread.
///
/// Returns a positive handle on success, or a negative code on failure.
#[unsafe(no_mangle)]
pub extern "C" fn tweetfeed_context_new_threaded() -> i32 {
	ffi::return_code(move || {
		let adapter = ThreadLoop::new("tweetfeed-loop")?;
		Registry::global().context_create(Context::new(adapter))
	})
}

/// Run pending deliveries of a polled context on the calling thread.
///
/// Returns the number of callbacks run, or a negative code on failure.
#[unsafe(no_mangle)]
pub extern "C" fn tweetfeed_context_dispatch(context: i32) -> i32 {
	ffi::return_code(move || {
		let context = ffi::parse_id(context)?;
		Registry::global().context_dispatch(context)
	})
}

/// Destroy a context.
///
/// Fails with a busy error, leaving the context usable, while any stream created under
/// it has not been destroyed. A polled context is also busy until every pending delivery
/// has been run with [tweetfeed_context_dispatch].
///
/// Returns a zero on success, or a negative code on failure.
#[unsafe(no_mangle)]
pub extern "C" fn tweetfeed_context_destroy(context: i32) -> i32 {
	ffi::return_code(move || {
		let context = ffi::parse_id(context)?;
		Registry::global().context_destroy(context)
	})
}

/// Create a stream under a context. No connection is made until [tweetfeed_stream_start].
///
/// Returns a positive handle on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that config points to a valid [TweetFeedConfig].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_stream_new(context: i32, config: *const TweetFeedConfig) -> i32 {
	ffi::return_code(move || {
		let context = ffi::parse_id(context)?;
		let config = unsafe { config.as_ref() }.ok_or(Error::InvalidPointer)?;
		let credentials = unsafe { config.to_credentials() }?;
		Registry::global().stream_create(context, credentials)
	})
}

/// Start streaming. May only be called once per stream.
///
/// Returns immediately; connecting happens in the background. Every tweet is passed to
/// `on_tweet` on the context's loop thread and must be released with [tweetfeed_tweet_free].
/// `on_status` (optional) is called on the same thread with a non-negative state code when
/// the stream is running or stopped, or a negative error code when it fails; no tweets
/// follow a stopped or failed status.
///
/// Returns a zero on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that the callbacks and user_data stay valid until the final status.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_stream_start(
	stream: i32,
	on_tweet: Option<extern "C" fn(user_data: *mut c_void, tweet: *mut Tweet)>,
	on_status: Option<extern "C" fn(user_data: *mut c_void, code: i32)>,
	user_data: *mut c_void,
) -> i32 {
	ffi::return_code(move || {
		let stream = ffi::parse_id(stream)?;
		let deliver = unsafe { ffi::OnTweet::new(user_data, on_tweet, on_status) }?;
		Registry::global().stream_start(stream, deliver)
	})
}

/// Query the state of a stream: 0 created, 1 started, 2 running, 3 stopped, 4 failed.
///
/// Returns the state, or a negative code on failure.
#[unsafe(no_mangle)]
pub extern "C" fn tweetfeed_stream_state(stream: i32) -> i32 {
	ffi::return_code(move || {
		let stream = ffi::parse_id(stream)?;
		Registry::global().stream_state(stream)
	})
}

/// Stop a stream, blocking until its worker thread exits.
///
/// Tweets already queued on the loop are still delivered.
///
/// Returns a zero on success, or a negative code on failure.
#[unsafe(no_mangle)]
pub extern "C" fn tweetfeed_stream_stop(stream: i32) -> i32 {
	ffi::return_code(move || {
		let stream = ffi::parse_id(stream)?;
		Registry::global().stream_stop(stream)
	})
}

/// Stop and destroy a stream, blocking until its worker thread exits.
///
/// Returns a zero on success, or a negative code on failure.
#[unsafe(no_mangle)]
pub extern "C" fn tweetfeed_stream_destroy(stream: i32) -> i32 {
	ffi::return_code(move || {
		let stream = ffi::parse_id(stream)?;
		Registry::global().stream_destroy(stream)
	})
}

/// Release a tweet delivered to `on_tweet`.
///
/// Tweets are not tracked by handle: freeing one twice, or freeing a pointer that did not
/// come from this library, is undefined behavior.
///
/// Returns a zero on success, or a negative code if tweet is null.
///
/// # Safety
/// - The caller must ensure that tweet was delivered by this library and not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_tweet_free(tweet: *mut Tweet) -> i32 {
	ffi::return_code(move || {
		if tweet.is_null() {
			return Err(Error::InvalidPointer);
		}

		drop(unsafe { Box::from_raw(tweet) });
		Ok(())
	})
}

/// Read posts from a JSON-lines file for contexts created after this call.
///
/// Returns a zero on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that path is a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tweetfeed_feed_use_file(path: *const c_char) -> i32 {
	ffi::return_code(move || {
		let path = unsafe { ffi::parse_str(path) }?;
		if path.is_empty() {
			return Err(Error::InvalidPointer);
		}

		feed::set_default(FileConnector::new(path));
		Ok(())
	})
}

#[cfg(test)]
mod tests {
	use std::ffi::CString;
	use std::time::{Duration, Instant};

	use parking_lot::Mutex;

	use super::*;
	use crate::stream::State;

	#[derive(Default)]
	struct Log {
		tweets: Mutex<Vec<(String, String)>>,
		statuses: Mutex<Vec<i32>>,
	}

	extern "C" fn on_tweet(user_data: *mut c_void, tweet: *mut Tweet) {
		let log = unsafe { &*(user_data as *const Log) };
		let t = unsafe { &*tweet };
		log.tweets.lock().push((
			String::from_utf8_lossy(t.user_name()).into_owned(),
			String::from_utf8_lossy(t.body()).into_owned(),
		));
		assert_eq!(unsafe { tweetfeed_tweet_free(tweet) }, 0);
	}

	extern "C" fn on_status(user_data: *mut c_void, code: i32) {
		let log = unsafe { &*(user_data as *const Log) };
		log.statuses.lock().push(code);
	}

	fn slice(bytes: &[u8]) -> ByteSlice {
		ByteSlice {
			bytes: bytes.as_ptr(),
			length: bytes.len(),
		}
	}

	fn config() -> TweetFeedConfig {
		TweetFeedConfig {
			consumer_key: slice(b"key"),
			consumer_secret: slice(b"secret"),
			token: slice(b"token"),
			token_secret: slice(b"token-secret"),
		}
	}

	#[test]
	fn test_polled_file_feed() {
		let path = std::env::temp_dir().join(format!("tweetfeed-api-{}.jsonl", std::process::id()));
		std::fs::write(
			&path,
			concat!(
				r#"{"text":"hi","user":{"screen_name":"alice"}}"#,
				"\n",
				r#"{"text":"yo","user":{"screen_name":"bob"}}"#,
				"\n",
			),
		)
		.unwrap();

		let c_path = CString::new(path.to_str().unwrap()).unwrap();
		assert_eq!(unsafe { tweetfeed_feed_use_file(c_path.as_ptr()) }, 0);

		let context = unsafe { tweetfeed_context_new_polled(None, std::ptr::null_mut()) };
		assert!(context > 0);

		let stream = unsafe { tweetfeed_stream_new(context, &config()) };
		assert!(stream > 0);
		assert_eq!(tweetfeed_stream_state(stream), State::Created.code());

		let log = Log::default();
		let user_data = &log as *const Log as *mut c_void;
		assert_eq!(
			unsafe { tweetfeed_stream_start(stream, Some(on_tweet), Some(on_status), user_data) },
			0
		);
		assert_eq!(
			unsafe { tweetfeed_stream_start(stream, Some(on_tweet), None, user_data) },
			Error::AlreadyStarted.code()
		);

		let deadline = Instant::now() + Duration::from_secs(5);
		while tweetfeed_stream_state(stream) != State::Stopped.code() {
			assert!(Instant::now() < deadline, "stream never stopped");
			std::thread::sleep(Duration::from_millis(5));
		}

		// Nothing is delivered until the host dispatches.
		assert!(log.tweets.lock().is_empty());
		assert_eq!(tweetfeed_context_dispatch(context), 4);

		assert_eq!(
			*log.tweets.lock(),
			vec![("alice".to_string(), "hi".to_string()), ("bob".to_string(), "yo".to_string())]
		);
		assert_eq!(*log.statuses.lock(), vec![State::Running.code(), State::Stopped.code()]);

		assert_eq!(tweetfeed_context_destroy(context), Error::Busy.code());
		assert_eq!(tweetfeed_stream_destroy(stream), 0);
		assert_eq!(tweetfeed_stream_destroy(stream), Error::InvalidHandle.code());
		assert_eq!(tweetfeed_context_destroy(context), 0);
		assert_eq!(tweetfeed_context_destroy(context), Error::InvalidHandle.code());

		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn test_invalid_arguments() {
		assert_eq!(tweetfeed_stream_state(0), Error::InvalidHandle.code());
		assert_eq!(tweetfeed_stream_stop(-3), Error::InvalidHandle.code());
		assert_eq!(tweetfeed_context_dispatch(12345), Error::InvalidHandle.code());
		assert_eq!(unsafe { tweetfeed_tweet_free(std::ptr::null_mut()) }, Error::InvalidPointer.code());
		assert_eq!(unsafe { tweetfeed_feed_use_file(std::ptr::null()) }, Error::InvalidPointer.code());

		let context = tweetfeed_context_new_threaded();
		assert!(context > 0);
		assert_eq!(unsafe { tweetfeed_stream_new(context, std::ptr::null()) }, Error::InvalidPointer.code());

		let mut cfg = config();
		cfg.token = ByteSlice::empty();
		assert_eq!(
			unsafe { tweetfeed_stream_new(context, &cfg) },
			Error::InvalidCredentials("").code()
		);

		cfg.token = ByteSlice {
			bytes: std::ptr::null(),
			length: 4,
		};
		assert_eq!(unsafe { tweetfeed_stream_new(context, &cfg) }, Error::InvalidPointer.code());

		let stream = unsafe { tweetfeed_stream_new(context, &config()) };
		assert!(stream > 0);
		assert_eq!(
			unsafe { tweetfeed_stream_start(stream, None, None, std::ptr::null_mut()) },
			Error::InvalidPointer.code()
		);

		// Handles of one kind are never accepted as the other.
		assert_eq!(tweetfeed_context_destroy(stream), Error::InvalidHandle.code());
		assert_eq!(tweetfeed_stream_destroy(context), Error::InvalidHandle.code());

		assert_eq!(tweetfeed_context_dispatch(context), Error::Unsupported.code());
		assert_eq!(tweetfeed_stream_destroy(stream), 0);
		assert_eq!(tweetfeed_context_destroy(context), 0);
	}

	#[test]
	fn test_tweet_free() {
		let tweet = Box::into_raw(Tweet::new(b"alice", b"hi").unwrap());
		assert_eq!(unsafe { tweetfeed_tweet_free(tweet) }, 0);
	}
}
