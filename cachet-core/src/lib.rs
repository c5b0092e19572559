//! Cachet Core - Data Types
//!
//! Pure data structures with no behavior beyond key generation and value
//! encoding. All other crates depend on this. This crate contains ONLY
//! data types - no caching logic.

pub mod error;
pub mod mode;
pub mod model;
pub mod record;
pub mod value;

pub use error::{CacheError, CachetError, CachetResult, ConfigError, StoreError};
pub use mode::{CacheMode, SearchOptions, WriteOptions};
pub use model::{KeyGen, Model};
pub use record::{EntityKey, EntityRecord};
pub use value::{decode_id, decode_record, encode_record, CacheValue, VOID_SENTINEL};
