use std::ptr;

use crate::{Error, feed::RawRecord};

/// A non-owning view over bytes.
///
/// The structure around a slice decides who frees the bytes, never the slice itself.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ByteSlice {
	pub bytes: *const u8,
	pub length: usize,
}

impl ByteSlice {
	pub const fn empty() -> Self {
		Self {
			bytes: ptr::null(),
			length: 0,
		}
	}

	/// # Safety
	///
	/// The caller must ensure that bytes points to `length` readable bytes for 'a, or is null.
	pub unsafe fn as_slice<'a>(&self) -> Result<&'a [u8], Error> {
		unsafe { crate::ffi::parse_slice(self.bytes, self.length) }
	}
}

impl Default for ByteSlice {
	fn default() -> Self {
		Self::empty()
	}
}

/// One delivered post.
///
/// Both slices point at buffers owned by this value; they are released when the
/// tweet is dropped, or from C via [crate::tweetfeed_tweet_free].
#[repr(C)]
#[derive(Debug)]
pub struct Tweet {
	user_name: ByteSlice,
	body: ByteSlice,
}

// SAFETY: the slices point at heap buffers uniquely owned by this Tweet.
unsafe impl Send for Tweet {}

impl Tweet {
	/// Copy the author and body into fresh allocations.
	///
	/// Returns [Error::AllocationFailure] instead of aborting when memory runs out.
	pub fn new(user_name: &[u8], body: &[u8]) -> Result<Box<Self>, Error> {
		let user_name = Self::copy(user_name)?;
		let body = match Self::copy(body) {
			Ok(body) => body,
			Err(err) => {
				// SAFETY: user_name was just produced by copy.
				unsafe { Self::release(user_name) };
				return Err(err);
			}
		};

		Ok(Box::new(Self { user_name, body }))
	}

	pub fn from_record(record: &RawRecord) -> Result<Box<Self>, Error> {
		Self::new(&record.user_name, &record.body)
	}

	pub fn user_name(&self) -> &[u8] {
		// SAFETY: owned by self and never null.
		unsafe { std::slice::from_raw_parts(self.user_name.bytes, self.user_name.length) }
	}

	pub fn body(&self) -> &[u8] {
		// SAFETY: owned by self and never null.
		unsafe { std::slice::from_raw_parts(self.body.bytes, self.body.length) }
	}

	fn copy(src: &[u8]) -> Result<ByteSlice, Error> {
		let mut buf = Vec::new();
		buf.try_reserve_exact(src.len()).map_err(|_| Error::AllocationFailure)?;
		buf.extend_from_slice(src);

		let length = buf.len();
		let bytes = Box::into_raw(buf.into_boxed_slice()) as *const u8;
		Ok(ByteSlice { bytes, length })
	}

	/// # Safety
	///
	/// The slice must have been produced by [Tweet::copy] and not released yet.
	unsafe fn release(slice: ByteSlice) {
		let raw = ptr::slice_from_raw_parts_mut(slice.bytes as *mut u8, slice.length);
		drop(unsafe { Box::from_raw(raw) });
	}
}

impl Drop for Tweet {
	fn drop(&mut self) {
		// SAFETY: both slices came from Tweet::copy and are released exactly once, here.
		unsafe {
			Self::release(self.user_name);
			Self::release(self.body);
		}
	}
}
