//! Progress events for jobrelay
//!
//! This crate provides the event record emitted by a job, the canonical stage
//! enumeration, and the emitter that delivers events in order to the caller
//! stream, the session recorder, and any live observers.

mod bus;
mod emitter;
mod types;

pub use bus::EventBus;
pub use emitter::{EmitError, EventEmitter, EventSink, SinkError};
pub use types::*;
