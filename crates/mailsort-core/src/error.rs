//! Error types for mailsort

use thiserror::Error;

/// Result type alias using mailsort's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mailsort
#[derive(Error, Debug)]
pub enum Error {
    // Vector store errors
    #[error("Database error: {0}")]
    Database(#[from] lancedb::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    // Mailbox errors
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Connection failed to {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Invalid email format: {0}")]
    InvalidEmailFormat(String),

    // Remote service errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // A collaborator answered outside its contract
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true for connectivity failures the adapter layer may retry
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ConnectionFailed { .. } => true,
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Returns true when a collaborator broke its request/response contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::ContractViolation(_))
    }

    /// Returns true if the error reports a missing vector index
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::IndexNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        let e = Error::ConnectionFailed {
            host: "imap.example.com".to_string(),
            reason: "refused".to_string(),
        };
        assert!(e.is_transient());
        assert!(!e.is_contract_violation());

        let e = Error::ContractViolation("unknown category 'Urgent'".to_string());
        assert!(e.is_contract_violation());
        assert!(!e.is_transient());

        assert!(Error::IndexNotFound("emails".to_string()).is_not_found());
        assert!(!Error::Imap("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_display() {
        let e = Error::InvalidConfig {
            field: "mail.username".to_string(),
            reason: "must not be empty".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Invalid configuration: mail.username: must not be empty"
        );
    }
}
