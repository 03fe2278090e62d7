//! Unified error types for cachet.
//!
//! Capacity pressure and lazy expiration are not errors; they degrade to a
//! miss. Only validation failures reach the caller.

use crate::config::ConfigError;

/// Unified error types for the response cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key generation input is empty or otherwise unusable.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A key failed validation.
    #[error("INVALID_KEY: {0}")]
    InvalidKey(String),

    /// A policy or one of its conditions is malformed.
    #[error("INVALID_POLICY: {0}")]
    InvalidPolicy(String),

    /// No policy is registered under the given name.
    #[error("POLICY_NOT_FOUND: {0}")]
    PolicyNotFound(String),

    /// A typed value could not be encoded or decoded.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration failed to load or validate.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PolicyNotFound("burst".to_string());
        assert!(err.to_string().contains("POLICY_NOT_FOUND"));
        assert!(err.to_string().contains("burst"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: Error = ConfigError::Invalid { field: "max_entries".into(), reason: "must be greater than 0".into() }.into();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().starts_with("CONFIG_ERROR"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
