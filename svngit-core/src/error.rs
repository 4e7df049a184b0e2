//! Error taxonomy for the bridge
//!
//! Every condition that crosses a component boundary is a typed variant so
//! the protocol layer can map it onto the matching SVN error response.

use crate::object::ObjectId;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while translating between SVN and Git
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("No such revision: r{0}")]
    NoSuchRevision(u64),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path '{path}' is out of date (based on r{base_revision})")]
    OutOfDate { path: String, base_revision: u64 },

    #[error("Concurrent modification: another commit was published first")]
    ConcurrentModification,

    #[error("Path '{path}' is already locked by {owner}")]
    AlreadyLocked { path: String, owner: String },

    #[error("Lock token does not match the lock on '{path}'")]
    InvalidToken { path: String },

    #[error("No lock on path '{path}'")]
    NotLocked { path: String },

    #[error("Commit touches locked path '{path}' without the matching lock token")]
    LockMismatch { path: String },

    #[error("Timed out waiting for commit locks")]
    LockTimeout,

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Property '{name}' cannot be stored in a Git-backed repository")]
    PropertyUnsupported { name: String },

    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    #[error("Git object missing: {0}")]
    ObjectMissing(ObjectId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Conditions a client can recover from by refreshing and retrying.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            BridgeError::ProtocolViolation(_)
                | BridgeError::StorageCorruption(_)
                | BridgeError::ObjectMissing(_)
                | BridgeError::Io(_)
                | BridgeError::Database(_)
                | BridgeError::Serialization(_)
        )
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(e: rusqlite::Error) -> Self {
        BridgeError::Database(e.to_string())
    }
}

impl From<bincode::Error> for BridgeError {
    fn from(e: bincode::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<git2::Error> for BridgeError {
    fn from(e: git2::Error) -> Self {
        BridgeError::StorageCorruption(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(BridgeError::NotFound("/a".into()).is_recoverable());
        assert!(BridgeError::ConcurrentModification.is_recoverable());
        assert!(BridgeError::LockTimeout.is_recoverable());
        assert!(!BridgeError::ProtocolViolation("bad item".into()).is_recoverable());
        assert!(!BridgeError::StorageCorruption("truncated tree".into()).is_recoverable());
    }
}
