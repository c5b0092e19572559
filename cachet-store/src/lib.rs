//! Cachet Store - Store Contracts and Backends
//!
//! Defines the backing cache store abstraction (scalar, hash, and set
//! primitives plus an atomic multi-key write), the secondary store
//! contract, and two implementations: an in-process memory store and a
//! Redis store that compiles atomic batches into Lua scripts.

pub mod atomic;
pub mod memory;
pub mod redis_backend;
pub mod traits;

pub use atomic::{AtomicOp, AtomicWrite};
pub use memory::MemoryStore;
pub use redis_backend::{RedisStore, RedisStoreError};
pub use traits::{CacheStore, SecondaryStore};
