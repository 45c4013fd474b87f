use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::api::types::{ApiResponse, BookPage, HomeFeed};
use crate::api::BookSource;
use crate::config::{ApiConfig, Config};
use crate::models::RankingKind;

/// HTTP client for the reader API
#[derive(Clone)]
pub struct ReaderApi {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  max_retries: u32,
  retry_delay: Duration,
}

impl ReaderApi {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let mut base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid api.base_url '{}': {}", config.base_url, e))?;

    // Url::join drops the last path segment unless the base ends in '/'
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .user_agent(concat!("novelshelf/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Config::get_api_token(),
      max_retries: config.max_retries,
      retry_delay: config.retry_delay(),
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint path '{}': {}", path, e))
  }

  /// GET `path` and decode the JSON body.
  ///
  /// Transport errors and 5xx responses are retried up to `max_retries`
  /// times; 4xx responses fail immediately.
  async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
    let url = self.endpoint(path)?;
    let mut attempt = 0u32;

    loop {
      let mut request = self.http.get(url.clone()).query(query);
      if let Some(token) = &self.token {
        request = request.bearer_auth(token);
      }

      match request.send().await {
        Ok(response) if response.status().is_server_error() && attempt < self.max_retries => {
          warn!(path, status = %response.status(), attempt, "server error, retrying");
        }
        Ok(response) => {
          let status = response.status();
          if !status.is_success() {
            return Err(eyre!("{} returned HTTP {}", path, status));
          }
          debug!(path, %status, "request succeeded");
          return response
            .json::<T>()
            .await
            .map_err(|e| eyre!("Failed to parse {} response: {}", path, e));
        }
        Err(e) if attempt < self.max_retries && !e.is_decode() => {
          warn!(path, error = %e, attempt, "request failed, retrying");
        }
        Err(e) => return Err(eyre!("Request to {} failed: {}", path, e)),
      }

      attempt += 1;
      tokio::time::sleep(self.retry_delay).await;
    }
  }
}

impl BookSource for ReaderApi {
  async fn search(
    &self,
    keyword: &str,
    page: u32,
    page_size: u32,
  ) -> Result<ApiResponse<BookPage>> {
    self
      .get_json(
        "book/search",
        &[
          ("keyword", keyword.to_string()),
          ("pageNum", page.to_string()),
          ("pageSize", page_size.to_string()),
        ],
      )
      .await
  }

  async fn ranking(
    &self,
    kind: RankingKind,
    page: u32,
    page_size: u32,
  ) -> Result<ApiResponse<BookPage>> {
    self
      .get_json(
        "book/rank",
        &[
          ("type", kind.as_str().to_string()),
          ("pageNum", page.to_string()),
          ("pageSize", page_size.to_string()),
        ],
      )
      .await
  }

  async fn home_feed(&self) -> Result<ApiResponse<HomeFeed>> {
    self.get_json("home/feed", &[]).await
  }
}
