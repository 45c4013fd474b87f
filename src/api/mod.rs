//! Remote side of the reader: the fetcher trait and its HTTP implementation.

pub mod client;
pub mod types;

use color_eyre::Result;
use std::future::Future;

use crate::models::RankingKind;
use types::{ApiResponse, BookPage, HomeFeed};

pub use client::ReaderApi;

/// Network source of books.
///
/// A returned `Ok` only means the call completed; callers still check the
/// envelope's `ok` flag and payload (see [`ApiResponse::into_data`]).
pub trait BookSource: Send + Sync {
  fn search(
    &self,
    keyword: &str,
    page: u32,
    page_size: u32,
  ) -> impl Future<Output = Result<ApiResponse<BookPage>>> + Send;

  fn ranking(
    &self,
    kind: RankingKind,
    page: u32,
    page_size: u32,
  ) -> impl Future<Output = Result<ApiResponse<BookPage>>> + Send;

  fn home_feed(&self) -> impl Future<Output = Result<ApiResponse<HomeFeed>>> + Send;
}
