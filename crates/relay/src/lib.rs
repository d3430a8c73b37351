//! Server-sent event relay.
//!
//! Downstream services (repository pull, provider execution) answer with a
//! chunked `text/event-stream` body. [`FrameDecoder`] reassembles complete
//! frames from arbitrary network reads and [`SseRelay`] turns a byte stream
//! into a lazy sequence of parsed records.

pub mod error;
pub mod execution;
pub mod frame;
pub mod pull;
pub mod stream;

pub use error::{RelayError, Result};
pub use execution::{ExecutionClient, ExecutionPayload, ExecutionSession};
pub use frame::{parse_frame, FrameDecoder, FrameError, DATA_MARKER, FRAME_DELIMITER};
pub use pull::{PullRequest, PullSession, PullUpdate, RepoPullClient};
pub use stream::{ByteStream, SseRelay};
