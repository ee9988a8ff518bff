//! Error types for the Tidemark sync engine.

use alloc::string::String;
use core::fmt;

/// Result type alias for Tidemark operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for sync-engine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A client submitted a mutation id that is not the next expected one.
    UnexpectedMutationId {
        client_id: String,
        expected: u64,
        got: u64,
    },
    /// A client declared a group id inconsistent with its recorded one.
    ClientGroupMismatch {
        client_id: String,
        expected: String,
        got: String,
    },
    /// A diff was iterated after its snapshotter advanced again.
    InvalidDiff,
    /// A diff spans a schema-invalidating change; dependent views must be
    /// rebuilt, not patched.
    ResetRequired,
    /// Table not found.
    TableNotFound {
        name: String,
    },
    /// No mutator registered under the given name.
    UnknownMutator {
        name: String,
    },
    /// Invalid operation.
    InvalidOperation {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnexpectedMutationId {
                client_id,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Unexpected mutation id for client {}: expected {}, got {}",
                    client_id, expected, got
                )
            }
            Error::ClientGroupMismatch {
                client_id,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Client group mismatch for client {}: recorded {}, got {}",
                    client_id, expected, got
                )
            }
            Error::InvalidDiff => {
                write!(f, "Diff invalidated by a later advance")
            }
            Error::ResetRequired => {
                write!(f, "Diff spans a schema change; rebuild dependent views")
            }
            Error::TableNotFound { name } => {
                write!(f, "Table not found: {}", name)
            }
            Error::UnknownMutator { name } => {
                write!(f, "Unknown mutator: {}", name)
            }
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
        }
    }
}

impl Error {
    /// Creates an unexpected mutation id error.
    pub fn unexpected_mutation_id(client_id: impl Into<String>, expected: u64, got: u64) -> Self {
        Error::UnexpectedMutationId {
            client_id: client_id.into(),
            expected,
            got,
        }
    }

    /// Creates a client group mismatch error.
    pub fn client_group_mismatch(
        client_id: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Error::ClientGroupMismatch {
            client_id: client_id.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Error::TableNotFound { name: name.into() }
    }

    /// Creates an unknown mutator error.
    pub fn unknown_mutator(name: impl Into<String>) -> Self {
        Error::UnknownMutator { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}
