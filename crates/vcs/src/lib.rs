pub mod auth;
pub mod error;
pub mod git;
pub mod traits;

pub use auth::{authenticated_url, redact};
pub use error::{Result, VcsError};
pub use git::{GitAuthor, GitVcs};
pub use traits::{VersionControl, Workspace};
