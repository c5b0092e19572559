//! Cache write policy and per-call option sets.

use std::time::Duration;

/// Tri-state policy governing whether and how a write touches cache state.
///
/// Behavioral branching, dispatched via pattern matching. An unrecognized
/// mode is unrepresentable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Always (re)write the cache value.
    #[default]
    CacheAndOverwrite,
    /// Write only if absent (store-level "set if not exists").
    CacheIfNotExist,
    /// Never write; reads still consult the cache but writes are suppressed.
    NoCache,
}

/// Options for read paths.
///
/// `ttl` absent means no expiration. `negative_cache` forces negative-cache
/// reconciliation even when the manager's default is off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub mode: CacheMode,
    pub ttl: Option<Duration>,
    pub negative_cache: bool,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_negative_cache(mut self, enabled: bool) -> Self {
        self.negative_cache = enabled;
        self
    }
}

/// Options for write paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub mode: CacheMode,
    pub ttl: Option<Duration>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}
