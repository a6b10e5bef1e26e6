pub mod error;
pub mod nt_status;
pub mod logging;

use error::SMBError;

/// Result alias used across every crate in this workspace.
pub type SMBResult<T> = Result<T, SMBError>;
