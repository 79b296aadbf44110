//! Live post feed for desktop hosts, with delivery onto the host's own event loop.
//!
//! A [Context] wraps a host loop through a [adapter::LoopAdapter]. Streams created
//! under it run the feed on a worker thread and hand every post, in order, to the
//! loop. The C surface (`tweetfeed_*`) addresses both through integer handles.

pub mod adapter;
mod api;
mod context;
mod error;
mod ffi;
pub mod feed;
mod id;
mod log;
mod registry;
mod stream;
mod tweet;

pub use api::*;
pub use context::*;
pub use error::*;
pub use id::*;
pub use log::*;
pub use registry::*;
pub use stream::*;
pub use tweet::*;
