//! Metadata store access for sitevault
//!
//! The coordinator itself never touches the relational store: callers hand it
//! their own write operation. The only query sitevault issues is the
//! bucket-specific existence check the orphan reconciler uses to decide whether
//! a blob is still referenced.

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod reference;

pub use memory::InMemoryReferenceStore;
pub use pool::connect;
pub use postgres::PgReferenceStore;
pub use reference::{ReferenceError, ReferenceStore};
