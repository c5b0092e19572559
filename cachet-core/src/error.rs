//! Error types for Cachet operations

use thiserror::Error;

/// Configuration errors.
///
/// Raised synchronously at construction or at the first offending call,
/// never silently coerced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Backing cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A cached value did not have the expected shape. Surfaced instead of
    /// being mis-interpreted as data.
    #[error("Corrupt cache value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Atomic write failed: {reason}")]
    AtomicFailed { reason: String },

    #[error("Cache store lock poisoned")]
    LockPoisoned,
}

/// Secondary (authoritative) store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Secondary store request failed: {reason}")]
    RequestFailed { reason: String },

    /// The ordered batch fetch returned something other than a strictly
    /// ascending, duplicate-free subsequence of the requested ids.
    #[error("Ordered fetch contract violated: {reason}")]
    ContractViolation { reason: String },
}

/// Master error type for all Cachet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CachetError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for Cachet operations.
pub type CachetResult<T> = Result<T, CachetError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_missing_required() {
        let err = ConfigError::MissingRequired {
            field: "id_field".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Missing required"));
        assert!(msg.contains("id_field"));
    }

    #[test]
    fn test_cache_error_display_corrupt() {
        let err = CacheError::Corrupt {
            key: "acct:42".to_string(),
            reason: "expected an encoded id".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Corrupt cache value"));
        assert!(msg.contains("acct:42"));
        assert!(msg.contains("expected an encoded id"));
    }

    #[test]
    fn test_store_error_display_contract_violation() {
        let err = StoreError::ContractViolation {
            reason: "returned ids out of order".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Ordered fetch contract violated"));
        assert!(msg.contains("out of order"));
    }

    #[test]
    fn test_cachet_error_from_variants() {
        let config = CachetError::from(ConfigError::MissingRequired {
            field: "prefix".to_string(),
        });
        assert!(matches!(config, CachetError::Config(_)));

        let cache = CachetError::from(CacheError::LockPoisoned);
        assert!(matches!(cache, CachetError::Cache(_)));

        let store = CachetError::from(StoreError::RequestFailed {
            reason: "timeout".to_string(),
        });
        assert!(matches!(store, CachetError::Store(_)));
    }
}
