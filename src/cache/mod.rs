//! Versioned response cache for the application shell and GET responses.
//!
//! This module provides:
//! - Named cache generations (`<prefix><version>`), one of which is active
//! - Atomic precaching of the application shell
//! - Exact (method, URL) lookups and wholesale overwrites of successful GETs
//! - Garbage collection of stale generations after activation

mod manager;
mod storage;
mod traits;

pub use manager::CacheManager;
pub use traits::CacheStorage;
