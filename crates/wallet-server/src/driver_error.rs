//! Driver error types.
//!
//! Most failures of a single command are answered with a reply and never
//! surface here. These are the ones the driver cannot answer itself.

use std::fmt;

use crate::{password::PasswordError, storage::StorageError};

/// Errors that can occur while processing an event.
#[derive(Debug)]
pub enum DriverError {
    /// Event names a session the driver does not know.
    ///
    /// The runtime delivered a line for a connection that was never accepted
    /// or already closed. Indicates a runtime bug.
    SessionNotFound(u64),

    /// Session ID reused while the first session is still open.
    ///
    /// Session IDs are random; a collision is astronomically unlikely. The
    /// runtime should drop the new connection.
    SessionAlreadyExists(u64),

    /// Storage backend failed.
    ///
    /// May be transient (I/O) or permanent (corruption). The driver answers
    /// the client with a generic error reply before reporting this.
    Storage(StorageError),

    /// Stored credential could not be checked.
    Password(PasswordError),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "session not found: {id}"),
            Self::SessionAlreadyExists(id) => write!(f, "session already exists: {id}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Password(err) => write!(f, "password error: {err}"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Password(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for DriverError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<PasswordError> for DriverError {
    fn from(err: PasswordError) -> Self {
        Self::Password(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display() {
        assert_eq!(DriverError::SessionNotFound(42).to_string(), "session not found: 42");
        assert_eq!(
            DriverError::SessionAlreadyExists(7).to_string(),
            "session already exists: 7"
        );
        assert_eq!(
            DriverError::from(StorageError::Io("disk full".into())).to_string(),
            "storage error: I/O error: disk full"
        );
    }

    #[test]
    fn wrapped_errors_expose_source() {
        use std::error::Error;

        assert!(DriverError::from(PasswordError::InvalidKey).source().is_some());
        assert!(DriverError::SessionNotFound(1).source().is_none());
    }
}
