mod job;
mod provider;

pub use job::*;
pub use provider::*;
