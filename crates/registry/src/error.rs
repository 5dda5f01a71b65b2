//! Errors emitted by registry operations.

use thiserror::Error;

/// Registry failure modes.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A qualified name is already registered with a different payload.
    #[error("operation '{qualified_name}' is already registered with a different schema")]
    DuplicateOperation {
        /// The colliding qualified name.
        qualified_name: String,
    },
    /// Lookup for an unknown qualified name.
    #[error("operation '{qualified_name}' is not registered")]
    NotFound {
        /// The requested qualified name.
        qualified_name: String,
    },
    /// Snapshot file could not be read or written.
    #[error("catalog snapshot I/O error: {0}")]
    SnapshotIo(#[from] std::io::Error),
    /// Snapshot bytes could not be encoded or decoded.
    #[error("catalog snapshot encoding error: {0}")]
    SnapshotEncoding(#[from] postcard::Error),
    /// No snapshot location could be determined.
    #[error("no catalog snapshot path configured and no config directory available")]
    NoSnapshotPath,
}
