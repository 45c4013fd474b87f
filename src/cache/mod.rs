//! Generic read-through caching for list queries.
//!
//! This module knows nothing about books. It provides:
//! - the four read strategies (cache-first, network-first, cache-only, network-only)
//! - basic offline mode (serve stored data when the network is unavailable)
//! - write-back of fetched data into the local store

mod layer;
mod traits;

pub use layer::CacheLayer;
pub use traits::CacheStrategy;
