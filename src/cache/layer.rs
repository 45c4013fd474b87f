//! Cache layer that orchestrates local reads with network fetching.

use color_eyre::{Report, Result};
use std::future::Future;
use tracing::{debug, warn};

use super::traits::{CacheResult, CacheStrategy};

/// Cache layer that decides, per call site, which source answers a read.
///
/// The layer holds no data itself. Callers hand it three closures: `load`
/// reads the local store, `fetch` calls the network, `save` writes fetched
/// data back to the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheLayer {
  strategy: CacheStrategy,
}

impl CacheLayer {
  pub fn new(strategy: CacheStrategy) -> Self {
    Self { strategy }
  }

  /// Fetch a list under the configured strategy. An empty local list counts
  /// as a miss.
  ///
  /// The `key` parameter only labels log lines (e.g. "ranking:hot").
  pub async fn fetch_list<T, L, LFut, F, FFut, S, SFut>(
    &self,
    key: &str,
    load: L,
    fetch: F,
    save: S,
  ) -> Result<CacheResult<Vec<T>>>
  where
    T: Clone,
    L: FnOnce() -> LFut,
    LFut: Future<Output = Result<Vec<T>>>,
    F: FnOnce() -> FFut,
    FFut: Future<Output = Result<Vec<T>>>,
    S: FnOnce(Vec<T>) -> SFut,
    SFut: Future<Output = Result<()>>,
  {
    let load = || async move {
      let cached = load().await?;
      Ok::<_, Report>((!cached.is_empty()).then_some(cached))
    };
    self.fetch_entry(key, load, fetch, save).await
  }

  /// Like [`fetch_list`](Self::fetch_list), for stores that know whether an
  /// entry exists. `Some(vec![])` is a hit, so a remembered empty result is
  /// served without a fetch.
  pub async fn fetch_entry<T, L, LFut, F, FFut, S, SFut>(
    &self,
    key: &str,
    load: L,
    fetch: F,
    save: S,
  ) -> Result<CacheResult<Vec<T>>>
  where
    T: Clone,
    L: FnOnce() -> LFut,
    LFut: Future<Output = Result<Option<Vec<T>>>>,
    F: FnOnce() -> FFut,
    FFut: Future<Output = Result<Vec<T>>>,
    S: FnOnce(Vec<T>) -> SFut,
    SFut: Future<Output = Result<()>>,
  {
    match self.strategy {
      CacheStrategy::CacheFirst => {
        match load().await {
          Ok(Some(cached)) => {
            debug!(key, count = cached.len(), "cache hit");
            return Ok(CacheResult::from_cache(cached));
          }
          Ok(None) => debug!(key, "cache miss"),
          Err(e) => warn!(key, error = %e, "cache read failed, falling back to network"),
        }

        let data = fetch().await?;
        Self::save_quietly(key, save, &data).await;
        Ok(CacheResult::from_network(data))
      }
      CacheStrategy::NetworkFirst => match fetch().await {
        Ok(data) => {
          Self::save_quietly(key, save, &data).await;
          Ok(CacheResult::from_network(data))
        }
        Err(fetch_err) => {
          warn!(key, error = %fetch_err, "network failed, trying local store");
          match load().await {
            Ok(Some(cached)) if !cached.is_empty() => Ok(CacheResult::offline(cached)),
            Ok(_) => Err(fetch_err),
            Err(e) => {
              warn!(key, error = %e, "cache read failed");
              Err(fetch_err)
            }
          }
        }
      },
      CacheStrategy::CacheOnly => Ok(CacheResult::from_cache(load().await?.unwrap_or_default())),
      CacheStrategy::NetworkOnly => Ok(CacheResult::from_network(fetch().await?)),
    }
  }

  /// Write fetched data back. The fetched data is still good if this fails.
  async fn save_quietly<T, S, SFut>(key: &str, save: S, data: &[T])
  where
    T: Clone,
    S: FnOnce(Vec<T>) -> SFut,
    SFut: Future<Output = Result<()>>,
  {
    if let Err(e) = save(data.to_vec()).await {
      warn!(key, error = %e, "failed to write fetched data to local store");
    }
  }
}
