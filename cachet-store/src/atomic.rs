//! Atomic multi-key write batches.
//!
//! Any change spanning more than one logical key goes through an
//! [`AtomicWrite`]: a client-side request object enumerating primitive
//! operations that the backing store executes indivisibly. No intermediate
//! state is observable by other clients, and a failed batch leaves no
//! partial effect.

use std::time::Duration;

/// One primitive operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicOp {
    /// Set a scalar value, with an optional millisecond-precision TTL.
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Set a scalar value only if the key is absent.
    SetIfAbsent {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Delete a key of any shape.
    Delete { key: String },
    /// Apply a millisecond-precision TTL to an existing key.
    Expire { key: String, ttl: Duration },
    /// Set one field of a hash.
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    /// Delete one field of a hash.
    HashDelete { key: String, field: String },
    /// Add a member to a set.
    SetAdd { key: String, member: String },
    /// Remove a member from a set.
    SetRemove { key: String, member: String },
    /// Evict `member` from the query result structure it is currently
    /// associated with in the reverse hash, then drop the reverse mapping.
    ///
    /// Multiple-result structures get the member removed and receive the
    /// placeholder when they drain; single-result keys are overwritten with
    /// the placeholder. A member with no current association is a no-op.
    QueryEvict {
        reverse_key: String,
        member: String,
        multiple: bool,
        placeholder: String,
    },
    /// Write `member` into `result_key` and point the reverse mapping at it.
    ///
    /// Single-result keys are overwritten (one id is the entire result).
    /// Multiple-result keys are only touched when already cached - adding
    /// to an uncached key would fabricate a partial result set - and have
    /// the placeholder removed when a real member arrives. The reverse
    /// mapping is refreshed only when an association was written.
    QueryAssign {
        reverse_key: String,
        member: String,
        result_key: String,
        multiple: bool,
        placeholder: String,
    },
}

/// An ordered batch of primitive operations executed as one indivisible
/// unit by a [`CacheStore`](crate::CacheStore).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicWrite {
    ops: Vec<AtomicOp>,
}

impl AtomicWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: AtomicOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[AtomicOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<AtomicOp> {
        self.ops
    }

    /// Chainable scalar set.
    pub fn set(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        self.ops.push(AtomicOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    /// Chainable delete.
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(AtomicOp::Delete { key: key.into() });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch() {
        let write = AtomicWrite::new();
        assert!(write.is_empty());
        assert_eq!(write.len(), 0);
    }

    #[test]
    fn test_builder_order_is_preserved() {
        let write = AtomicWrite::new()
            .set("a", "1", None)
            .delete("b")
            .set("c", "3", Some(Duration::from_millis(10)));
        assert_eq!(write.len(), 3);
        assert!(matches!(write.ops()[0], AtomicOp::Set { .. }));
        assert!(matches!(write.ops()[1], AtomicOp::Delete { .. }));
        assert!(matches!(
            write.ops()[2],
            AtomicOp::Set { ttl: Some(_), .. }
        ));
    }
}
