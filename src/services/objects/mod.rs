//! Object storage used as the snapshot destination.
//!
//! A bucket is addressed by slash-separated object keys. Two backends:
//!
//! - **FilesystemObjectStore**: a directory is the bucket; writes are
//!   committed by renaming a synced temporary file over the target, so a
//!   reader sees either the old object or the new one, never a partial write
//! - **MemoryObjectStore**: non-persistent, for tests and embedding

mod backend;
mod filesystem;
mod memory;
mod types;
mod validation;

pub use backend::ObjectStore;
pub use filesystem::FilesystemObjectStore;
pub use memory::MemoryObjectStore;
pub use types::ObjectMeta;
pub use validation::normalize_key;
