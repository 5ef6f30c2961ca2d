//! Sitevault Storage Library
//!
//! Blob storage abstraction used by the upload coordinator and the orphan
//! reconciler, with a local filesystem backend and an in-memory backend.
//!
//! # Object key format
//!
//! Objects are addressed by `(bucket, key)`. Keys generated for uploads have the
//! shape `{folder}/{unix_millis}-{random}.{ext}` (folder and extension optional).
//! Keys must not contain `..`, a leading `/`, or empty segments. Key generation is
//! centralized in the `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::{generate_object_key, validate_bucket, validate_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
pub use sitevault_core::StorageBackend;
pub use traits::{PutOptions, Storage, StorageError, StorageResult, StoredObject};
