use std::sync::Arc;

use crate::feed::FeedError;

/// Every error that can cross the C boundary.
///
/// Each variant maps to a stable negative code, see [Error::code].
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
	/// The handle is unknown, stale, or refers to the wrong kind of resource.
	#[error("invalid handle")]
	InvalidHandle,

	#[error("invalid credentials: {0}")]
	InvalidCredentials(&'static str),

	#[error("stream already started")]
	AlreadyStarted,

	#[error("connection failed: {0}")]
	ConnectionFailed(Arc<FeedError>),

	/// The feed failed permanently after it was connected.
	#[error("feed failed: {0}")]
	Failed(Arc<FeedError>),

	#[error("allocation failure")]
	AllocationFailure,

	/// The context still has streams attached.
	#[error("busy")]
	Busy,

	/// No free handle slots are left.
	#[error("handles exhausted")]
	Exhausted,

	/// The loop adapter no longer accepts work.
	#[error("closed")]
	Closed,

	#[error("unsupported")]
	Unsupported,

	#[error("invalid pointer")]
	InvalidPointer,

	#[error("invalid utf8")]
	InvalidUtf8(#[from] std::str::Utf8Error),

	#[error("invalid code")]
	InvalidCode,

	#[error("log error: {0}")]
	Log(String),

	#[error("panic")]
	Panic,

	#[error("io error: {0}")]
	Io(Arc<std::io::Error>),
}

impl Error {
	/// A negative integer code returned over the C ABI.
	pub fn code(&self) -> i32 {
		match self {
			Self::InvalidHandle => -1,
			Self::InvalidCredentials(_) => -2,
			Self::AlreadyStarted => -3,
			Self::ConnectionFailed(_) => -4,
			Self::Failed(_) => -5,
			Self::AllocationFailure => -6,
			Self::Busy => -7,
			Self::Exhausted => -8,
			Self::Closed => -9,
			Self::Unsupported => -10,
			Self::InvalidPointer => -11,
			Self::InvalidUtf8(_) => -12,
			Self::InvalidCode => -13,
			Self::Log(_) => -14,
			Self::Panic => -15,
			Self::Io(_) => -16,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Io(Arc::new(err))
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_codes_are_negative_and_unique() {
		let errors = [
			Error::InvalidHandle,
			Error::InvalidCredentials("empty"),
			Error::AlreadyStarted,
			Error::ConnectionFailed(Arc::new(FeedError::Unauthorized)),
			Error::Failed(Arc::new(FeedError::Unauthorized)),
			Error::AllocationFailure,
			Error::Busy,
			Error::Exhausted,
			Error::Closed,
			Error::Unsupported,
			Error::InvalidPointer,
			Error::InvalidCode,
			Error::Log("bad".into()),
			Error::Panic,
			Error::Io(Arc::new(std::io::Error::other("boom"))),
		];

		let mut codes: Vec<i32> = errors.iter().map(Error::code).collect();
		assert!(codes.iter().all(|code| *code < 0));

		codes.sort();
		codes.dedup();
		assert_eq!(codes.len(), errors.len());
	}
}
