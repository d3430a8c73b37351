use std::time::Duration;

mod execute;
mod health;
mod sessions;

pub use execute::*;
pub use health::*;
pub use sessions::*;

pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
