//! Serde-deserializable types matching the reader API responses.
//!
//! These types are separate from the stored records so the wire format can
//! drift (camelCase, numeric ids, missing fields) without touching the store.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

use crate::models::{HomeBanner, HomeBook, HomeCategory};

/// Envelope every endpoint answers with: `{ok, data, message}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiResponse<T> {
  #[serde(default)]
  pub ok: bool,
  pub data: Option<T>,
  pub message: Option<String>,
}

impl<T> ApiResponse<T> {
  #[cfg(test)]
  pub fn success(data: T) -> Self {
    Self {
      ok: true,
      data: Some(data),
      message: None,
    }
  }

  #[cfg(test)]
  pub fn failure(message: impl Into<String>) -> Self {
    Self {
      ok: false,
      data: None,
      message: Some(message.into()),
    }
  }

  /// Unwrap the payload. A rejected response and an ok response without
  /// data are both errors.
  pub fn into_data(self) -> Result<T> {
    if !self.ok {
      return Err(eyre!(
        "Server rejected request: {}",
        self.message.as_deref().unwrap_or("no message")
      ));
    }
    self
      .data
      .ok_or_else(|| eyre!("Response marked ok but carried no data"))
  }
}

/// Accept both `"id": "42"` and `"id": 42`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Id {
    Str(String),
    Num(i64),
  }

  Ok(match Id::deserialize(deserializer)? {
    Id::Str(s) => s,
    Id::Num(n) => n.to_string(),
  })
}

/// Drop repeated keys, keeping the last occurrence of each. Matches what
/// replace-on-conflict leaves behind in the store.
fn keep_last<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
  K: Eq + Hash,
  F: Fn(&T) -> K,
{
  let mut seen = HashSet::new();
  let mut kept: Vec<T> = items
    .into_iter()
    .rev()
    .filter(|item| seen.insert(key(item)))
    .collect();
  kept.reverse();
  kept
}

// ============================================================================
// Books
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBook {
  #[serde(deserialize_with = "string_or_number")]
  pub id: String,
  #[serde(alias = "bookName")]
  pub title: String,
  #[serde(default, alias = "authorName")]
  pub author: String,
  #[serde(alias = "cover")]
  pub cover_url: Option<String>,
  pub intro: Option<String>,
  pub sort_order: Option<i64>,
  pub update_time: Option<i64>,
}

impl ApiBook {
  /// Convert into a stored record. Position in the response stands in for
  /// a missing sort order, `now_ms` for a missing update time.
  pub fn into_book(self, category: &str, position: usize, now_ms: i64) -> HomeBook {
    HomeBook {
      id: self.id,
      category: category.to_string(),
      title: self.title,
      author: self.author,
      cover_url: self.cover_url,
      intro: self.intro,
      sort_order: self.sort_order.unwrap_or(position as i64),
      update_time: self.update_time.unwrap_or(now_ms),
    }
  }
}

/// Paged list payload for search and ranking endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookPage {
  pub list: Option<Vec<ApiBook>>,
  #[serde(default)]
  pub total: u64,
}

impl BookPage {
  #[cfg(test)]
  pub fn new(list: Vec<ApiBook>) -> Self {
    Self {
      total: list.len() as u64,
      list: Some(list),
    }
  }

  pub fn into_list(self) -> Result<Vec<ApiBook>> {
    self
      .list
      .ok_or_else(|| eyre!("Response data carried no list"))
  }
}

/// Convert a page response into stored records for `category`.
/// A repeated id keeps only its last entry.
pub fn into_books(response: ApiResponse<BookPage>, category: &str, now_ms: i64) -> Result<Vec<HomeBook>> {
  let list = response.into_data()?.into_list()?;
  let books = list
    .into_iter()
    .enumerate()
    .map(|(position, book)| book.into_book(category, position, now_ms))
    .collect();
  Ok(keep_last(books, |book: &HomeBook| book.id.clone()))
}

// ============================================================================
// Home feed
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBanner {
  #[serde(deserialize_with = "string_or_number")]
  pub id: String,
  #[serde(rename = "type", default = "default_banner_type")]
  pub banner_type: String,
  #[serde(default)]
  pub title: String,
  pub image_url: String,
  pub link_url: Option<String>,
  #[serde(default)]
  pub sort_order: i64,
  #[serde(default = "default_true")]
  pub is_active: bool,
  pub update_time: Option<i64>,
}

fn default_banner_type() -> String {
  "top".to_string()
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCategory {
  #[serde(deserialize_with = "string_or_number")]
  pub id: String,
  #[serde(rename = "type", default = "default_category_type")]
  pub category_type: String,
  pub name: String,
  pub icon: Option<String>,
  #[serde(default)]
  pub sort_order: i64,
  pub update_time: Option<i64>,
}

fn default_category_type() -> String {
  "genre".to_string()
}

/// One titled shelf of books on the home screen.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiSection {
  pub category: String,
  #[serde(default)]
  pub books: Vec<ApiBook>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HomeFeed {
  #[serde(default)]
  pub banners: Vec<ApiBanner>,
  #[serde(default)]
  pub categories: Vec<ApiCategory>,
  #[serde(default)]
  pub sections: Vec<ApiSection>,
}

/// Home feed converted into stored records.
#[derive(Debug, Clone, Default)]
pub struct HomeFeedRecords {
  pub books: Vec<HomeBook>,
  pub banners: Vec<HomeBanner>,
  pub categories: Vec<HomeCategory>,
}

impl HomeFeed {
  pub fn into_records(self, now_ms: i64) -> HomeFeedRecords {
    let books = self
      .sections
      .into_iter()
      .flat_map(|section| {
        let category = section.category;
        section
          .books
          .into_iter()
          .enumerate()
          .map(move |(position, book)| book.into_book(&category, position, now_ms))
      })
      .collect();

    let banners = self
      .banners
      .into_iter()
      .map(|b| HomeBanner {
        id: b.id,
        banner_type: b.banner_type,
        title: b.title,
        image_url: b.image_url,
        link_url: b.link_url,
        sort_order: b.sort_order,
        is_active: b.is_active,
        update_time: b.update_time.unwrap_or(now_ms),
      })
      .collect();

    let categories = self
      .categories
      .into_iter()
      .map(|c| HomeCategory {
        id: c.id,
        category_type: c.category_type,
        name: c.name,
        icon: c.icon,
        sort_order: c.sort_order,
        update_time: c.update_time.unwrap_or(now_ms),
      })
      .collect();

    HomeFeedRecords {
      books: keep_last(books, |b: &HomeBook| (b.id.clone(), b.category.clone())),
      banners: keep_last(banners, |b: &HomeBanner| (b.id.clone(), b.banner_type.clone())),
      categories: keep_last(categories, |c: &HomeCategory| {
        (c.id.clone(), c.category_type.clone())
      }),
    }
  }
}
