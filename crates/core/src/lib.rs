//! Domain types shared by every jobrelay crate.
//!
//! A [`Job`] is built from a validated [`JobRequest`]; nothing downstream of
//! validation ever sees a raw request.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
