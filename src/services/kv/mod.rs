//! Multi-store key-value engine with remote and local backends.
//!
//! - **StoreEngine**: one store's entries (scalars, lists, sets) with TTL
//! - **StoreRegistry**: store name → engine, created lazily
//! - **MemoryBackend**: the registry behind the [`KvBackend`] contract
//! - **RedisBackend**: the same contract on a Redis-compatible server
//! - **BackendSelector**: health-based routing with local fallback
//!
//! # Example
//!
//! ```ignore
//! use rdict::services::kv::{BackendSelector, Command, MemoryBackend};
//!
//! let selector = BackendSelector::memory_only(MemoryBackend::new());
//! let reply = selector
//!     .dispatch(&Command::LPush { store: "s".into(), key: "l".into(), value: "a".into() })
//!     .await?;
//! assert_eq!(reply.into_length()?, 1);
//! ```

mod backend;
mod engine;
mod entry;
mod health;
mod memory;
mod random;
mod registry;
mod remote;
mod selector;

#[cfg(test)]
mod tests;

pub use backend::{Command, ExportedStores, KvBackend, Reply};
pub use engine::{StoreEngine, validate_key};
pub use entry::{Entry, EntryKind, EntryValue};
pub use health::{BackendState, HealthCheckConfig, HealthState};
pub use memory::MemoryBackend;
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use registry::{StoreRegistry, validate_store_name};
pub use remote::RedisBackend;
pub use selector::BackendSelector;
