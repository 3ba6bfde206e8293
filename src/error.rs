/*!
 * Error types for Orbit Mount
 */

use orbit_core_resilience::Retryable;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MountError>;

#[derive(Debug, Error)]
pub enum MountError {
    /// Path does not exist on the backing store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backing store refused the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Remote failure that is expected to clear up on its own
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Remote failure that retrying will not fix
    #[error("Remote operation failed: {0}")]
    Remote(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Negative or otherwise unusable file offset
    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),

    /// Operation on a handle that was already released
    #[error("Handle {0} is closed")]
    HandleClosed(u64),

    /// uid/gid could not be resolved to a user/group name
    #[error("Identity lookup failed: {0}")]
    Identity(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MountError {
    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            MountError::Transient(_) => true,
            MountError::Io(io_err) => Self::is_io_transient(io_err),
            _ => false,
        }
    }

    /// Check if an I/O error is transient
    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
        )
    }

    /// Convert to filesystem error code (libc errno)
    pub fn to_errno(&self) -> i32 {
        match self {
            MountError::NotFound(_) => libc::ENOENT,
            MountError::PermissionDenied(_) => libc::EACCES,
            MountError::InvalidOffset(_) | MountError::Config(_) => libc::EINVAL,
            MountError::HandleClosed(_) => libc::EBADF,
            MountError::Identity(_) => libc::EPERM,
            MountError::Io(io_err) => io_err.raw_os_error().unwrap_or(libc::EIO),
            MountError::Transient(_) | MountError::Remote(_) => libc::EIO,
        }
    }
}

impl Retryable for MountError {
    fn is_transient(&self) -> bool {
        MountError::is_transient(self)
    }
}

impl From<MountError> for io::Error {
    fn from(err: MountError) -> Self {
        let kind = match &err {
            MountError::Io(_) => io::ErrorKind::Other,
            MountError::NotFound(_) => io::ErrorKind::NotFound,
            MountError::PermissionDenied(_) | MountError::Identity(_) => {
                io::ErrorKind::PermissionDenied
            }
            MountError::InvalidOffset(_) | MountError::Config(_) => io::ErrorKind::InvalidInput,
            MountError::Transient(_) => io::ErrorKind::TimedOut,
            MountError::HandleClosed(_) | MountError::Remote(_) => io::ErrorKind::Other,
        };
        match err {
            MountError::Io(io_err) => io_err,
            other => io::Error::new(kind, other),
        }
    }
}
