use std::ffi::{CStr, c_char, c_void};

use crate::stream::{Deliver, State};
use crate::{Error, Id, Tweet};

pub type OnTweetFn = extern "C" fn(user_data: *mut c_void, tweet: *mut Tweet);
pub type OnStatusFn = extern "C" fn(user_data: *mut c_void, code: i32);

/// The C callbacks registered by `tweetfeed_stream_start`.
///
/// Tweets are handed over as owned pointers; the host releases them with `tweetfeed_tweet_free`.
/// Status codes are a non-negative [State] code, or a negative [Error] code on failure.
pub struct OnTweet {
	user_data: *mut c_void,
	on_tweet: OnTweetFn,
	on_status: Option<OnStatusFn>,
}

impl OnTweet {
	/// # Safety
	///
	/// The callbacks must stay valid, and `user_data` usable from the loop thread,
	/// until the terminal status has been delivered.
	pub unsafe fn new(user_data: *mut c_void, on_tweet: Option<OnTweetFn>, on_status: Option<OnStatusFn>) -> Result<Self, Error> {
		let on_tweet = on_tweet.ok_or(Error::InvalidPointer)?;
		Ok(Self {
			user_data,
			on_tweet,
			on_status,
		})
	}
}

// SAFETY: OnTweet only runs on the loop thread, and the host promised user_data is valid there.
unsafe impl Send for OnTweet {}

impl Deliver for OnTweet {
	fn tweet(&mut self, tweet: Box<Tweet>) {
		(self.on_tweet)(self.user_data, Box::into_raw(tweet));
	}

	fn status(&mut self, status: Result<State, Error>) {
		if let Some(on_status) = self.on_status {
			on_status(self.user_data, status.code());
		}
	}
}

pub fn return_code<C: ReturnCode, F: FnOnce() -> C>(f: F) -> i32 {
	match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
		Ok(ret) => ret.code(),
		Err(_) => Error::Panic.code(),
	}
}

pub trait ReturnCode {
	fn code(&self) -> i32;
}

impl ReturnCode for () {
	fn code(&self) -> i32 {
		0
	}
}

impl ReturnCode for usize {
	fn code(&self) -> i32 {
		i32::try_from(*self).unwrap_or_else(|_| Error::InvalidCode.code())
	}
}

impl ReturnCode for Id {
	fn code(&self) -> i32 {
		i32::from(*self)
	}
}

impl ReturnCode for State {
	fn code(&self) -> i32 {
		State::code(self)
	}
}

impl ReturnCode for Error {
	fn code(&self) -> i32 {
		Error::code(self)
	}
}

impl<T: ReturnCode> ReturnCode for Result<T, Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(ret) => ret.code(),
			Err(e) => e.code(),
		}
	}
}

pub fn parse_id(id: i32) -> Result<Id, Error> {
	Id::try_from(id)
}

/// # Safety
///
/// The caller must ensure that cstr is valid for 'a.
pub unsafe fn parse_str<'a>(cstr: *const c_char) -> Result<&'a str, Error> {
	if cstr.is_null() {
		return Ok("");
	}

	let string = unsafe { CStr::from_ptr(cstr) };
	Ok(string.to_str()?)
}

/// # Safety
///
/// The caller must ensure that data is valid for 'a.
pub unsafe fn parse_slice<'a>(data: *const u8, size: usize) -> Result<&'a [u8], Error> {
	if data.is_null() {
		if size == 0 {
			return Ok(&[]);
		}

		return Err(Error::InvalidPointer);
	}

	let data = unsafe { std::slice::from_raw_parts(data, size) };
	Ok(data)
}
