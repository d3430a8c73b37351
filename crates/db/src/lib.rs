mod error;
pub mod models;
mod pool;
pub mod store;

pub use error::*;
pub use models::{NewSession, SessionRecord};
pub use pool::*;
pub use store::*;
