//! Storage, caching and snapshot services behind the HTTP surface.

pub mod cache;
pub mod kv;
pub mod objects;
pub mod search;
pub mod snapshot;
