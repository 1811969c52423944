//! Error types for the OrgClaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all OrgClaw operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Model execution errors ---
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    // --- Org context errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Consent errors ---
    #[error("Consent error: {0}")]
    Consent(#[from] ConsentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Invalid routing key: {0}")]
    InvalidRoutingKey(String),

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Executor not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty response from model")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Failed to read org context at {path}: {reason}")]
    Read { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("Consent required: instance {instance_id} has not granted '{consent_type}'")]
    Required {
        instance_id: String,
        consent_type: String,
    },

    #[error("Invalid consent type '{0}'")]
    InvalidType(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_displays_correctly() {
        let err = Error::Execution(ExecutionError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn session_error_wraps_store_error() {
        let err: SessionError = StoreError::QueryFailed("disk I/O".into()).into();
        assert!(err.to_string().contains("disk I/O"));
    }

    #[test]
    fn consent_error_names_the_missing_type() {
        let err = ConsentError::Required {
            instance_id: "inst-1".into(),
            consent_type: "data_processing".into(),
        };
        assert!(err.to_string().contains("inst-1"));
        assert!(err.to_string().contains("data_processing"));
    }
}
