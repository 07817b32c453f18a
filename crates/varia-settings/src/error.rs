//! Error types for settings registry operations.

use thiserror::Error;

/// Primary error type for settings registry operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A required field was empty or missing.
    #[error("missing required field")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
    /// A field contained an invalid value.
    #[error("invalid field value")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// A setting with the requested key already exists.
    #[error("duplicate settings key")]
    DuplicateKey {
        /// Key that was already taken.
        key: String,
    },
    /// The operation targeted a key that does not exist.
    #[error("settings key not found")]
    NotFound {
        /// Key that failed to resolve.
        key: String,
    },
    /// A backup document failed to parse.
    #[error("invalid backup document")]
    InvalidBackup {
        /// Reason the document was rejected.
        reason: String,
    },
    /// A multi-row transaction was rolled back.
    #[error("operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying cause.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The attachment collaborator reported a failure.
    #[error("attachment store operation failed")]
    Attachment {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying cause.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A change notification payload was malformed.
    #[error("invalid notification payload")]
    InvalidNotification {
        /// Raw payload received on the channel.
        payload: String,
    },
    /// Underlying database operation failed.
    #[error("database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: sqlx::Error,
    },
    /// Data layer operation failed.
    #[error("data access failed")]
    DataAccess {
        /// Operation identifier.
        operation: &'static str,
        /// Source data-layer error.
        source: varia_data::DataError,
    },
}

/// Convenience alias for settings registry results.
pub type SettingsResult<T> = Result<T, SettingsError>;
