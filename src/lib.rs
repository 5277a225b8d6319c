//! rdict: a multi-store key-value service.
//!
//! Stores hold scalars, lists and sets. Operations go to a remote
//! data-structure server when it is healthy and fall back to an in-process
//! engine when it is not. Searches are answered through a TTL + LRU cache,
//! and every N successful mutations the full state is snapshotted to object
//! storage.
//!
//! The entry point for embedding is [`AppContext`]:
//!
//! ```rust,ignore
//! use rdict::AppContext;
//!
//! let ctx = AppContext::in_memory();
//! ctx.set("users", "alice", "admin".into(), None).await?;
//! assert_eq!(ctx.get("users", "alice").await?, "admin");
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod http;
pub mod reliability;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
