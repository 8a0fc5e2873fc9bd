// Cache module
//
// Versioned, chunk-aware response cache on top of a rate-limited key-value
// store.

pub mod chunking;
pub mod entry;
pub mod error;
pub mod key;
pub mod kv;
pub mod serialization;
pub mod store;
pub mod version;

pub use entry::{CacheEntry, ChunkManifest, EntryInfo, EntryMetadata, StatusClass};
pub use error::CacheError;
pub use key::CacheKey;
pub use kv::{KvStore, KvValue, MemoryKvStore, PutOptions, RedisKvStore};
pub use store::CacheStore;
pub use version::{VersionRegistry, DEFAULT_VERSION};
