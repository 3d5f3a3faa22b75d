//! Store-side plumbing: the bounded connection pool, the atomic Lua scripts,
//! and the cross-node consumer registry (spec.md §4.1–§4.3).

pub mod consumer_registry;
pub mod error;
pub mod keys;
pub mod pool;
pub mod scripts;

pub use consumer_registry::ConsumerRegistry;
pub use error::StoreError;
pub use pool::StorePool;
pub use scripts::ScriptRegistry;
