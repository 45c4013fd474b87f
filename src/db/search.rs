//! Keyword search pages cached by query.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::Database;
use crate::models::HomeBook;

/// Identifies one page of keyword search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey {
  pub keyword: String,
  pub page: u32,
  pub page_size: u32,
}

impl SearchKey {
  pub fn new(keyword: &str, page: u32, page_size: u32) -> Self {
    Self {
      keyword: normalize_keyword(keyword),
      page,
      page_size,
    }
  }

  /// Stable, fixed-length key for storage.
  pub fn cache_hash(&self) -> String {
    let input = format!("search:{}:{}:{}", self.keyword, self.page, self.page_size);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Trim, lowercase and collapse inner whitespace so "  Dune  Messiah" and
/// "dune messiah" share a cache entry.
fn normalize_keyword(keyword: &str) -> String {
  keyword
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

/// Search results stored in SQLite with a freshness window.
#[derive(Clone)]
pub struct SearchCache {
  db: Arc<Database>,
  ttl: Duration,
}

impl SearchCache {
  pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
    Self { db, ttl }
  }

  /// Cached results for `key`, or `None` when missing or older than the TTL.
  pub fn lookup(&self, key: &SearchKey) -> Result<Option<Vec<HomeBook>>> {
    let row: Option<(Vec<u8>, i64)> = self.db.with_conn(|conn| {
      conn
        .query_row(
          "SELECT data, cached_at FROM search_cache WHERE query_hash = ?1",
          params![key.cache_hash()],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to query search cache: {}", e))
    })?;

    let Some((data, cached_at)) = row else {
      return Ok(None);
    };

    let cached_at = DateTime::<Utc>::from_timestamp_millis(cached_at)
      .ok_or_else(|| eyre!("Invalid cached_at timestamp {}", cached_at))?;
    if Utc::now() - cached_at > self.ttl {
      return Ok(None);
    }

    let books = serde_json::from_slice(&data)
      .map_err(|e| eyre!("Failed to deserialize search results: {}", e))?;
    Ok(Some(books))
  }

  pub fn store(&self, key: &SearchKey, books: &[HomeBook]) -> Result<()> {
    self.store_at(key, books, Utc::now())
  }

  fn store_at(&self, key: &SearchKey, books: &[HomeBook], cached_at: DateTime<Utc>) -> Result<()> {
    let data =
      serde_json::to_vec(books).map_err(|e| eyre!("Failed to serialize search results: {}", e))?;

    self.db.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO search_cache (query_hash, keyword, page, page_size, data, cached_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            key.cache_hash(),
            key.keyword,
            key.page,
            key.page_size,
            data,
            cached_at.timestamp_millis()
          ],
        )
        .map_err(|e| eyre!("Failed to store search results: {}", e))?;
      Ok(())
    })
  }

  /// Drop every cached search page.
  pub fn clear(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      conn
        .execute("DELETE FROM search_cache", [])
        .map_err(|e| eyre!("Failed to clear search cache: {}", e))
    })
  }
}
