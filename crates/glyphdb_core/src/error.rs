//! Error types for GlyphDB core.

use crate::types::RecordId;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// Callers that only need to branch on the failure family (retry, show a
/// login prompt, report corruption) match on this instead of the full enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A row, table, glyph, session or backup does not exist.
    NotFound,
    /// Malformed schema, query, migration descriptor or record.
    Validation,
    /// Bad password, missing or expired session, foreign ownership.
    Auth,
    /// Unique violation, duplicate migration, scope already open.
    Conflict,
    /// Checksum mismatch or undecryptable ciphertext.
    Integrity,
    /// Underlying persistence failure.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Conflict => "conflict",
            Self::Integrity => "integrity",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in GlyphDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] glyphdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR or JSON encoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The engine directory is held by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Journal frame is damaged somewhere other than its tail.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: String,
        /// Actual checksum.
        actual: String,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed (wrong key, tampered ciphertext or AAD).
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Table not found.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Name of the table.
        table: String,
    },

    /// Record not found.
    #[error("record {id} not found in table {table}")]
    RecordNotFound {
        /// The table searched.
        table: String,
        /// The missing record id.
        id: RecordId,
    },

    /// Some other addressed object (glyph, session, backup) does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked up.
        message: String,
    },

    /// Input failed validation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// Unique index violation.
    #[error("unique constraint {index} on table {table} violated by key {key}")]
    UniqueViolation {
        /// Table owning the index.
        table: String,
        /// Name of the violated index.
        index: String,
        /// Rendered conflicting key.
        key: String,
    },

    /// Other conflicting state.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Authentication or authorization failure.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description of the failure.
        message: String,
    },

    /// Other integrity failure (unreadable snapshot, bad artifact).
    #[error("integrity error: {message}")]
    Integrity {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Returns the error family.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(_)
            | Self::Io(_)
            | Self::Codec { .. }
            | Self::DatabaseLocked
            | Self::EncryptionFailed { .. } => ErrorKind::Storage,
            Self::JournalCorruption { .. }
            | Self::ChecksumMismatch { .. }
            | Self::DecryptionFailed { .. }
            | Self::Integrity { .. } => ErrorKind::Integrity,
            Self::InvalidKeySize { .. } | Self::KeyDerivationFailed { .. } | Self::Validation { .. } => {
                ErrorKind::Validation
            }
            Self::TableNotFound { .. } | Self::RecordNotFound { .. } | Self::NotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::UniqueViolation { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Auth { .. } => ErrorKind::Auth,
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation failed error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Creates a record not found error.
    pub fn record_not_found(table: impl Into<String>, id: RecordId) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            id,
        }
    }

    /// Creates a generic not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a unique violation error.
    pub fn unique_violation(
        table: impl Into<String>,
        index: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::UniqueViolation {
            table: table.into(),
            index: index.into(),
            key: key.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Returns true for [`ErrorKind::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true for [`ErrorKind::Conflict`].
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<ciborium::ser::Error<io::Error>> for CoreError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::codec(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(CoreError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(CoreError::auth("x").kind(), ErrorKind::Auth);
        assert_eq!(CoreError::unique_violation("t", "i", "k").kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::decryption_failed("x").kind(), ErrorKind::Integrity);
        assert_eq!(CoreError::table_not_found("t").kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::DatabaseLocked.kind(), ErrorKind::Storage);
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = glyphdb_storage::StorageError::TooLarge { size: 1 }.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn messages_name_the_subject() {
        let err = CoreError::record_not_found("users", RecordId::new(7));
        assert_eq!(err.to_string(), "record #7 not found in table users");
        assert!(err.is_not_found());
    }
}
