//! Model description and cache key generation.

use crate::error::ConfigError;
use crate::record::EntityKey;

/// Key-generation template for deriving cache keys from entity ids.
///
/// The cache key for id `k` is `prefix + k + suffix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyGen {
    prefix: String,
    suffix: String,
}

impl KeyGen {
    /// Create a key template with both a prefix and a suffix.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Create a key template with only a prefix, the common case.
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: String::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

/// Static description of an entity type: its unique id field name and the
/// key-generation template for deriving cache keys from ids.
///
/// Immutable configuration, created once at startup. The id field name is
/// carried for diagnostics - with typed [`EntityRecord`](crate::EntityRecord)
/// keys the "id field present on every entity" invariant holds by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    id_field: String,
    key_gen: KeyGen,
}

impl Model {
    /// Create a model description.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] when `id_field` is empty.
    pub fn new(id_field: impl Into<String>, key_gen: KeyGen) -> Result<Self, ConfigError> {
        let id_field = id_field.into();
        if id_field.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "id_field".to_string(),
            });
        }
        Ok(Self { id_field, key_gen })
    }

    /// Name of the unique id field, used in corruption diagnostics.
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn key_gen(&self) -> &KeyGen {
        &self.key_gen
    }

    /// Derive the cache key for an entity id.
    pub fn cache_key<K: EntityKey>(&self, id: &K) -> String {
        format!(
            "{}{}{}",
            self.key_gen.prefix,
            id.encode(),
            self.key_gen.suffix
        )
    }
}
