//! Core types for the caching system.

use serde::Deserialize;

/// Which source a read consults first, and whether it falls back.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
  /// Local store first; on miss fetch remote and populate the store
  #[default]
  CacheFirst,
  /// Remote first; on failure serve whatever the store has
  NetworkFirst,
  /// Local store only
  CacheOnly,
  /// Remote only, the store is neither read nor written
  NetworkOnly,
}

impl std::str::FromStr for CacheStrategy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().replace('_', "-").as_str() {
      "cache-first" => Ok(Self::CacheFirst),
      "network-first" => Ok(Self::NetworkFirst),
      "cache-only" => Ok(Self::CacheOnly),
      "network-only" => Ok(Self::NetworkOnly),
      other => Err(format!(
        "unknown cache strategy '{}' (expected cache-first, network-first, cache-only or network-only)",
        other
      )),
    }
  }
}

/// Result from a cache operation, including data and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  /// Remote failed and the store answered instead.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from the local store
  Cache,
  /// Network unavailable, serving stored data
  Offline,
}
