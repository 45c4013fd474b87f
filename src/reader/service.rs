//! Reader service: ranking, search and home feed reads for the UI.
//!
//! Read operations never fail. Any store or network error is logged, sent
//! to the diagnostics channel, and turned into an empty list.

use chrono::Utc;
use color_eyre::{eyre::eyre, Report, Result};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::display::{to_display_items, DisplayItem};
use crate::api::types::{into_books, HomeFeedRecords};
use crate::api::BookSource;
use crate::cache::CacheLayer;
use crate::config::{CacheConfig, Config};
use crate::db::{
  sort_for_display, Database, HomeRecord, HomeStore, HomeTable, SearchCache, SearchKey,
};
use crate::dispatch::DispatcherProvider;
use crate::models::{HomeBanner, HomeBook, HomeCategory, RankingKind};

/// Category tag given to books that came from a keyword search
const SEARCH_CATEGORY: &str = "search";

/// Largest page a caller may ask the search endpoint for
const MAX_PAGE_SIZE: u32 = 100;

/// A read that degraded to an empty result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  /// What was being read (e.g. "ranking:hot", "search")
  pub operation: String,
  pub reason: String,
}

fn report(diagnostics: &broadcast::Sender<Diagnostic>, operation: &str, error: &Report) {
  warn!(operation, error = %error, "read failed, returning empty list");
  // No subscribers is fine
  let _ = diagnostics.send(Diagnostic {
    operation: operation.to_string(),
    reason: error.to_string(),
  });
}

fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

/// Coordinates the local store and the network for the reading app.
pub struct ReaderService<S: BookSource> {
  store: HomeStore,
  search_cache: SearchCache,
  source: S,
  strategies: CacheConfig,
  dispatch: DispatcherProvider,
  ranking_page_size: u32,
  max_retries: u32,
  retry_delay: Duration,
  diagnostics: broadcast::Sender<Diagnostic>,
}

impl<S: BookSource> ReaderService<S> {
  pub fn new(db: Arc<Database>, source: S, config: &Config, dispatch: DispatcherProvider) -> Self {
    let (diagnostics, _) = broadcast::channel(64);

    Self {
      store: HomeStore::new(db.clone()),
      search_cache: SearchCache::new(db, config.cache.search_ttl()),
      source,
      strategies: config.cache.clone(),
      dispatch,
      ranking_page_size: config.api.ranking_page_size,
      max_retries: config.api.max_retries,
      retry_delay: config.api.retry_delay(),
      diagnostics,
    }
  }

  /// Receive a [`Diagnostic`] for every read that degraded to empty.
  pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
    self.diagnostics.subscribe()
  }

  #[cfg(test)]
  pub fn store(&self) -> &HomeStore {
    &self.store
  }

  /// Run a store closure on the I/O dispatcher.
  async fn on_io<R, F>(&self, f: F) -> Result<R>
  where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    self.dispatch.io().run(f).await?
  }

  /// Put network results in store read order, on the compute dispatcher.
  async fn sorted<R: HomeRecord>(&self, mut records: Vec<R>) -> Result<Vec<R>> {
    self
      .dispatch
      .compute()
      .run(move || {
        sort_for_display(&mut records);
        records
      })
      .await
  }

  /// Map to display rows on the compute dispatcher, or degrade to empty.
  async fn collapse(&self, operation: &str, result: Result<Vec<HomeBook>>) -> Vec<DisplayItem> {
    let result = match result {
      Ok(books) => {
        self
          .dispatch
          .compute()
          .run(move || to_display_items(books))
          .await
      }
      Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
      report(&self.diagnostics, operation, &e);
      Vec::new()
    })
  }

  // ==========================================================================
  // Rankings
  // ==========================================================================

  pub async fn get_hot_ranking(&self) -> Vec<DisplayItem> {
    self.ranking(RankingKind::Hot).await
  }

  pub async fn get_update_ranking(&self) -> Vec<DisplayItem> {
    self.ranking(RankingKind::Update).await
  }

  pub async fn get_newest_ranking(&self) -> Vec<DisplayItem> {
    self.ranking(RankingKind::Newest).await
  }

  async fn ranking(&self, kind: RankingKind) -> Vec<DisplayItem> {
    let operation = format!("ranking:{}", kind);
    let result = self.fetch_ranking(kind, &operation).await;
    self.collapse(&operation, result).await
  }

  async fn fetch_ranking(&self, kind: RankingKind, operation: &str) -> Result<Vec<HomeBook>> {
    let category = kind.as_str();
    let layer = CacheLayer::new(self.strategies.rankings);

    let result = layer
      .fetch_list(
        operation,
        || {
          let store = self.store.clone();
          self.on_io(move || store.get_by_category::<HomeBook>(category))
        },
        || async {
          let response = self
            .source
            .ranking(kind, 1, self.ranking_page_size)
            .await?;
          self.sorted(into_books(response, category, now_ms())?).await
        },
        |books: Vec<HomeBook>| {
          let store = self.store.clone();
          self.on_io(move || store.replace_category(category, &books))
        },
      )
      .await?;

    debug!(
      operation,
      source = ?result.source,
      count = result.data.len(),
      "read complete"
    );
    Ok(result.data)
  }

  // ==========================================================================
  // Search
  // ==========================================================================

  /// Search by keyword. `page` is 1-based; `page_size` is clamped to 1..=100.
  /// A blank keyword returns nothing without touching either source.
  pub async fn search_by_keyword(&self, keyword: &str, page: u32, page_size: u32) -> Vec<DisplayItem> {
    if keyword.trim().is_empty() {
      return Vec::new();
    }

    let result = self
      .fetch_search(keyword, page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
      .await;
    self.collapse("search", result).await
  }

  async fn fetch_search(&self, keyword: &str, page: u32, page_size: u32) -> Result<Vec<HomeBook>> {
    let key = SearchKey::new(keyword, page, page_size);
    let label = format!("search:{}:{}", key.keyword, page);
    let layer = CacheLayer::new(self.strategies.search);

    // A remembered empty page is a hit; zero-hit keywords stay cached too
    let result = layer
      .fetch_entry(
        &label,
        || {
          let cache = self.search_cache.clone();
          let key = key.clone();
          self.on_io(move || cache.lookup(&key))
        },
        || async {
          let response = self.source.search(keyword.trim(), page, page_size).await?;
          self.sorted(into_books(response, SEARCH_CATEGORY, now_ms())?).await
        },
        |books: Vec<HomeBook>| {
          let cache = self.search_cache.clone();
          let key = key.clone();
          self.on_io(move || cache.store(&key, &books))
        },
      )
      .await?;

    debug!(
      operation = %label,
      source = ?result.source,
      count = result.data.len(),
      "read complete"
    );
    Ok(result.data)
  }

  /// Copy one page of search results onto a home shelf. Books already on
  /// the shelf stay; a book that is already there is updated in place.
  /// Returns how many books were shelved.
  pub async fn shelve_search(
    &self,
    keyword: &str,
    page: u32,
    page_size: u32,
    shelf: &str,
  ) -> Result<usize> {
    if keyword.trim().is_empty() {
      return Ok(0);
    }

    let books: Vec<HomeBook> = self
      .fetch_search(keyword, page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
      .await?
      .into_iter()
      .map(|book| HomeBook {
        category: shelf.to_string(),
        ..book
      })
      .collect();

    let count = books.len();
    let store = self.store.clone();
    self.on_io(move || store.insert_all(&books)).await?;
    info!(shelf, count, "shelved search results");
    Ok(count)
  }

  /// Drop all cached search pages. Returns how many were removed.
  pub async fn clear_search_cache(&self) -> Result<usize> {
    let cache = self.search_cache.clone();
    self.on_io(move || cache.clear()).await
  }

  // ==========================================================================
  // Home feed
  // ==========================================================================

  /// Books of one home shelf (e.g. "recommend").
  pub async fn home_books(&self, category: &str) -> Vec<DisplayItem> {
    let operation = format!("home_books:{}", category);
    let result = self
      .fetch_home(category, &operation, |records| records.books)
      .await;
    self.collapse(&operation, result).await
  }

  /// Active banners of one type (e.g. "top").
  pub async fn home_banners(&self, banner_type: &str) -> Vec<HomeBanner> {
    let operation = format!("home_banners:{}", banner_type);
    self
      .fetch_home(banner_type, &operation, |records| records.banners)
      .await
      .unwrap_or_else(|e| {
        report(&self.diagnostics, &operation, &e);
        Vec::new()
      })
  }

  /// Category tiles of one type (e.g. "genre").
  pub async fn home_categories(&self, category_type: &str) -> Vec<HomeCategory> {
    let operation = format!("home_categories:{}", category_type);
    self
      .fetch_home(category_type, &operation, |records| records.categories)
      .await
      .unwrap_or_else(|e| {
        report(&self.diagnostics, &operation, &e);
        Vec::new()
      })
  }

  /// Read one category of home records under the home strategy.
  ///
  /// A miss pulls the whole feed and answers with the matching active
  /// records. Write-back then stores the whole feed, the same as
  /// [`refresh_home`](Self::refresh_home).
  async fn fetch_home<R>(
    &self,
    category: &str,
    operation: &str,
    pick: fn(HomeFeedRecords) -> Vec<R>,
  ) -> Result<Vec<R>>
  where
    R: HomeRecord,
  {
    let layer = CacheLayer::new(self.strategies.home);
    let owned_category = category.to_string();
    let fetched: Mutex<Option<HomeFeedRecords>> = Mutex::new(None);

    let result = layer
      .fetch_list(
        operation,
        || {
          let store = self.store.clone();
          let category = owned_category.clone();
          self.on_io(move || store.get_by_category::<R>(&category))
        },
        || async {
          let records = self.fetch_feed().await?;
          let category = owned_category.clone();
          let feed = records.clone();
          let picked = self
            .dispatch
            .compute()
            .run(move || {
              let mut picked: Vec<R> = pick(feed)
                .into_iter()
                .filter(|r| r.category() == category && r.is_active())
                .collect();
              sort_for_display(&mut picked);
              picked
            })
            .await?;
          *fetched.lock().await = Some(records);
          Ok(picked)
        },
        |_picked: Vec<R>| async {
          let records = fetched
            .lock()
            .await
            .take()
            .ok_or_else(|| eyre!("No fetched home feed to write back"))?;
          self.store_feed(records).await
        },
      )
      .await?;

    debug!(
      operation,
      source = ?result.source,
      count = result.data.len(),
      "read complete"
    );
    Ok(result.data)
  }

  /// Drop one home shelf. Returns how many books were removed.
  pub async fn clear_shelf(&self, category: &str) -> Result<usize> {
    let store = self.store.clone();
    let category = category.to_string();
    self
      .on_io(move || store.delete_by_category::<HomeBook>(&category))
      .await
  }

  /// Empty one home table. Returns how many rows were removed.
  pub async fn clear_table(&self, table: HomeTable) -> Result<usize> {
    let store = self.store.clone();
    self
      .on_io(move || match table {
        HomeTable::Books => store.clear_all::<HomeBook>(),
        HomeTable::Banners => store.clear_all::<HomeBanner>(),
        HomeTable::Categories => store.clear_all::<HomeCategory>(),
      })
      .await
  }

  /// Fetch the whole home feed and replace every shelf, banner group and
  /// category group it contains. Unlike reads, failures are returned.
  pub async fn refresh_home(&self) -> Result<()> {
    let records = self.fetch_feed().await?;
    self.store_feed(records).await
  }

  async fn fetch_feed(&self) -> Result<HomeFeedRecords> {
    let feed = self.source.home_feed().await?.into_data()?;
    self
      .dispatch
      .compute()
      .run(move || feed.into_records(now_ms()))
      .await
  }

  /// Replace the fed groups in all three tables as one transaction.
  async fn store_feed(&self, records: HomeFeedRecords) -> Result<()> {
    let counts = (
      records.books.len(),
      records.banners.len(),
      records.categories.len(),
    );

    let store = self.store.clone();
    self
      .on_io(move || {
        store.replace_home_feed(&records.books, &records.banners, &records.categories)
      })
      .await?;

    info!(
      books = counts.0,
      banners = counts.1,
      categories = counts.2,
      "home feed stored"
    );
    Ok(())
  }

  /// Live display rows for one home shelf. Yields the current rows first,
  /// then new rows after every change to the books table. Re-queries run on
  /// the I/O dispatcher.
  pub fn observe_home_books(&self, category: &str) -> impl Stream<Item = Vec<DisplayItem>> + Send + 'static {
    let diagnostics = self.diagnostics.clone();
    let main = self.dispatch.main().clone();
    let operation = format!("observe_home_books:{}", category);

    self
      .store
      .observe::<HomeBook>(category, self.dispatch.io().clone())
      .then(move |snapshot| {
        let diagnostics = diagnostics.clone();
        let main = main.clone();
        let operation = operation.clone();
        async move {
          let result = match snapshot {
            Ok(books) => main.run(move || to_display_items(books)).await,
            Err(e) => Err(e),
          };
          result.unwrap_or_else(|e| {
            report(&diagnostics, &operation, &e);
            Vec::new()
          })
        }
      })
  }

  /// Clear books, banners and categories together.
  ///
  /// The clear is one transaction. A failed attempt leaves everything in
  /// place and is retried up to `max_retries` times; the last error is
  /// returned rather than swallowed.
  pub async fn clear_home_data(&self) -> Result<()> {
    let mut attempt = 0u32;

    loop {
      let store = self.store.clone();
      match self.on_io(move || store.clear_all_home_data()).await {
        Ok(()) => {
          info!("home data cleared");
          return Ok(());
        }
        Err(e) if attempt < self.max_retries => {
          warn!(attempt, error = %e, "clearing home data failed, retrying");
        }
        Err(e) => {
          return Err(e.wrap_err(format!(
            "Failed to clear home data after {} attempts",
            attempt + 1
          )));
        }
      }

      attempt += 1;
      tokio::time::sleep(self.retry_delay).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{ApiBanner, ApiBook, ApiCategory, ApiResponse, ApiSection, BookPage, HomeFeed};
  use crate::cache::CacheStrategy;
  use crate::config::{ApiConfig, DispatchConfig, StoreConfig};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::time::timeout;

  /// Canned network answers. `None` simulates a transport failure.
  #[derive(Default)]
  struct FakeSource {
    page: Option<ApiResponse<BookPage>>,
    feed: Option<ApiResponse<HomeFeed>>,
    calls: AtomicUsize,
  }

  impl FakeSource {
    fn with_page(page: ApiResponse<BookPage>) -> Self {
      Self {
        page: Some(page),
        ..Self::default()
      }
    }

    fn with_feed(feed: HomeFeed) -> Self {
      Self {
        feed: Some(ApiResponse::success(feed)),
        ..Self::default()
      }
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl BookSource for FakeSource {
    async fn search(&self, _keyword: &str, _page: u32, _page_size: u32) -> Result<ApiResponse<BookPage>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.page.clone().ok_or_else(|| eyre!("connection refused"))
    }

    async fn ranking(&self, _kind: RankingKind, _page: u32, _page_size: u32) -> Result<ApiResponse<BookPage>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.page.clone().ok_or_else(|| eyre!("connection refused"))
    }

    async fn home_feed(&self) -> Result<ApiResponse<HomeFeed>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.feed.clone().ok_or_else(|| eyre!("connection refused"))
    }
  }

  fn config(strategy: CacheStrategy) -> Config {
    Config {
      api: ApiConfig {
        base_url: "http://localhost/".to_string(),
        timeout_secs: 1,
        max_retries: 2,
        retry_delay_ms: 0,
        ranking_page_size: 20,
      },
      store: StoreConfig::default(),
      cache: CacheConfig::default().with_strategy(strategy),
      dispatch: DispatchConfig::default(),
    }
  }

  fn service_with(source: FakeSource, strategy: CacheStrategy) -> ReaderService<FakeSource> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    ReaderService::new(db, source, &config(strategy), DispatcherProvider::inline())
  }

  fn service(source: FakeSource) -> ReaderService<FakeSource> {
    service_with(source, CacheStrategy::CacheFirst)
  }

  fn api_book(id: &str, title: &str) -> ApiBook {
    ApiBook {
      id: id.to_string(),
      title: title.to_string(),
      author: format!("{} author", title),
      cover_url: None,
      intro: None,
      sort_order: None,
      update_time: None,
    }
  }

  fn stored_book(id: &str, category: &str, sort_order: i64) -> HomeBook {
    HomeBook {
      id: id.to_string(),
      category: category.to_string(),
      title: format!("Stored {}", id),
      author: "Someone".to_string(),
      cover_url: None,
      intro: None,
      sort_order,
      update_time: 0,
    }
  }

  fn ranks(items: &[DisplayItem]) -> Vec<(&str, usize)> {
    items.iter().map(|i| (i.id.as_str(), i.rank)).collect()
  }

  fn sample_feed() -> HomeFeed {
    HomeFeed {
      banners: vec![
        ApiBanner {
          id: "b1".to_string(),
          banner_type: "top".to_string(),
          title: "Summer sale".to_string(),
          image_url: "https://img/b1.png".to_string(),
          link_url: None,
          sort_order: 1,
          is_active: true,
          update_time: Some(10),
        },
        ApiBanner {
          id: "b2".to_string(),
          banner_type: "top".to_string(),
          title: "Expired".to_string(),
          image_url: "https://img/b2.png".to_string(),
          link_url: None,
          sort_order: 0,
          is_active: false,
          update_time: Some(10),
        },
      ],
      categories: vec![ApiCategory {
        id: "c1".to_string(),
        category_type: "genre".to_string(),
        name: "Fantasy".to_string(),
        icon: Some("dragon".to_string()),
        sort_order: 0,
        update_time: None,
      }],
      sections: vec![ApiSection {
        category: "recommend".to_string(),
        books: vec![api_book("r1", "Emma"), api_book("r2", "Dune")],
      }],
    }
  }

  #[tokio::test]
  async fn test_ranking_served_from_store_without_network() {
    let service = service(FakeSource::default());
    service
      .store()
      .insert_all(&[
        stored_book("c", "hot", 3),
        stored_book("a", "hot", 1),
        stored_book("b", "hot", 2),
      ])
      .unwrap();

    let items = service.get_hot_ranking().await;

    assert_eq!(ranks(&items), vec![("a", 1), ("b", 2), ("c", 3)]);
    assert_eq!(service.source.calls(), 0);
  }

  #[tokio::test]
  async fn test_empty_store_and_rejected_fetch_returns_empty() {
    let service = service(FakeSource::with_page(ApiResponse::failure("maintenance")));
    let mut diagnostics = service.subscribe_diagnostics();

    let items = service.get_update_ranking().await;

    assert!(items.is_empty());
    let diagnostic = diagnostics.try_recv().unwrap();
    assert_eq!(diagnostic.operation, "ranking:update");
    assert!(diagnostic.reason.contains("maintenance"));
  }

  #[tokio::test]
  async fn test_empty_store_and_ok_fetch_ranks_and_populates() {
    let page = BookPage::new(vec![api_book("A", "Alpha"), api_book("B", "Beta")]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));

    let items = service.get_newest_ranking().await;

    assert_eq!(
      items,
      vec![
        DisplayItem {
          id: "A".to_string(),
          title: "Alpha".to_string(),
          author: "Alpha author".to_string(),
          rank: 1,
        },
        DisplayItem {
          id: "B".to_string(),
          title: "Beta".to_string(),
          author: "Beta author".to_string(),
          rank: 2,
        },
      ]
    );

    let stored: Vec<HomeBook> = service.store().get_by_category("newest").unwrap();
    assert_eq!(stored.len(), 2);

    // Second read is a cache hit
    service.get_newest_ranking().await;
    assert_eq!(service.source.calls(), 1);
  }

  #[tokio::test]
  async fn test_network_and_cache_reads_rank_alike() {
    let mut late = api_book("A", "Alpha");
    late.sort_order = Some(2);
    let mut early = api_book("B", "Beta");
    early.sort_order = Some(1);
    let page = BookPage::new(vec![late, early]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));

    let from_network = service.get_hot_ranking().await;
    let from_store = service.get_hot_ranking().await;

    assert_eq!(ranks(&from_network), vec![("B", 1), ("A", 2)]);
    assert_eq!(from_network, from_store);
    assert_eq!(service.source.calls(), 1);
  }

  #[tokio::test]
  async fn test_repeated_ids_collapse_before_ranking() {
    let page = BookPage::new(vec![api_book("A", "First"), api_book("A", "Second")]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));

    let from_network = service.get_hot_ranking().await;
    let from_store = service.get_hot_ranking().await;

    assert_eq!(from_network.len(), 1);
    assert_eq!(from_network[0].title, "Second");
    assert_eq!(from_network, from_store);
  }

  #[tokio::test]
  async fn test_transport_failure_returns_empty() {
    let service = service(FakeSource::default());
    let mut diagnostics = service.subscribe_diagnostics();

    assert!(service.get_hot_ranking().await.is_empty());
    assert!(diagnostics
      .try_recv()
      .unwrap()
      .reason
      .contains("connection refused"));
  }

  #[tokio::test]
  async fn test_store_failure_and_network_failure_returns_empty() {
    let service = service(FakeSource::default());
    service
      .store()
      .database()
      .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE home_books")?))
      .unwrap();

    assert!(service.get_hot_ranking().await.is_empty());
  }

  #[tokio::test]
  async fn test_store_failure_falls_back_to_network() {
    let page = BookPage::new(vec![api_book("A", "Alpha")]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));
    service
      .store()
      .database()
      .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE home_books")?))
      .unwrap();

    // Read and write-back both fail; the fetched list is still shown
    assert_eq!(ranks(&service.get_hot_ranking().await), vec![("A", 1)]);
  }

  #[tokio::test]
  async fn test_network_only_does_not_populate_store() {
    let page = BookPage::new(vec![api_book("A", "Alpha")]);
    let service = service_with(
      FakeSource::with_page(ApiResponse::success(page)),
      CacheStrategy::NetworkOnly,
    );

    assert_eq!(service.get_hot_ranking().await.len(), 1);
    assert!(service
      .store()
      .get_by_category::<HomeBook>("hot")
      .unwrap()
      .is_empty());
  }

  #[tokio::test]
  async fn test_network_first_serves_store_when_offline() {
    let service = service_with(FakeSource::default(), CacheStrategy::NetworkFirst);
    service
      .store()
      .insert_all(&[stored_book("x", "hot", 0)])
      .unwrap();

    assert_eq!(ranks(&service.get_hot_ranking().await), vec![("x", 1)]);
    assert_eq!(service.source.calls(), 1);
  }

  #[tokio::test]
  async fn test_search_caches_by_normalized_keyword() {
    let page = BookPage::new(vec![api_book("1", "Dune"), api_book("2", "Dune Messiah")]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));

    let first = service.search_by_keyword("Dune", 1, 20).await;
    let second = service.search_by_keyword("  dune ", 1, 20).await;

    assert_eq!(ranks(&first), vec![("1", 1), ("2", 2)]);
    assert_eq!(first, second);
    assert_eq!(service.source.calls(), 1);

    // Search results don't leak into the home tables
    assert!(service
      .store()
      .get_by_category::<HomeBook>(SEARCH_CATEGORY)
      .unwrap()
      .is_empty());
  }

  #[tokio::test]
  async fn test_search_sorts_network_results() {
    let mut second = api_book("1", "Dune");
    second.sort_order = Some(5);
    let mut first = api_book("2", "Emma");
    first.sort_order = Some(0);
    let page = BookPage::new(vec![second, first]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));

    let from_network = service.search_by_keyword("classics", 1, 20).await;
    let from_cache = service.search_by_keyword("classics", 1, 20).await;

    assert_eq!(ranks(&from_network), vec![("2", 1), ("1", 2)]);
    assert_eq!(from_network, from_cache);
  }

  #[tokio::test]
  async fn test_search_without_hits_is_cached() {
    let service = service(FakeSource::with_page(ApiResponse::success(BookPage::new(vec![]))));
    let mut diagnostics = service.subscribe_diagnostics();

    assert!(service.search_by_keyword("nothing here", 1, 20).await.is_empty());
    assert!(service.search_by_keyword("nothing here", 1, 20).await.is_empty());

    assert_eq!(service.source.calls(), 1);
    assert!(diagnostics.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_shelve_search_merges_into_shelf() {
    let page = BookPage::new(vec![api_book("1", "Dune"), api_book("x", "Emma")]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));
    service
      .store()
      .insert_all(&[stored_book("x", "mine", 0), stored_book("keep", "mine", 9)])
      .unwrap();

    assert_eq!(service.shelve_search("dune", 1, 20, "mine").await.unwrap(), 2);

    let shelf: Vec<HomeBook> = service.store().get_by_category("mine").unwrap();
    assert_eq!(shelf.len(), 3);
    let x = shelf.iter().find(|b| b.id == "x").unwrap();
    assert_eq!(x.title, "Emma");
  }

  #[tokio::test]
  async fn test_search_blank_keyword_skips_sources() {
    let service = service(FakeSource::default());
    let mut diagnostics = service.subscribe_diagnostics();

    assert!(service.search_by_keyword("   ", 1, 20).await.is_empty());
    assert_eq!(service.source.calls(), 0);
    assert!(diagnostics.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_search_malformed_response_returns_empty() {
    let malformed = ApiResponse::<BookPage> {
      ok: true,
      data: None,
      message: None,
    };
    let service = service(FakeSource::with_page(malformed));
    let mut diagnostics = service.subscribe_diagnostics();

    assert!(service.search_by_keyword("dune", 1, 20).await.is_empty());
    assert_eq!(diagnostics.try_recv().unwrap().operation, "search");
  }

  #[tokio::test]
  async fn test_clear_search_cache_forces_refetch() {
    let page = BookPage::new(vec![api_book("1", "Dune")]);
    let service = service(FakeSource::with_page(ApiResponse::success(page)));

    service.search_by_keyword("dune", 1, 20).await;
    assert_eq!(service.clear_search_cache().await.unwrap(), 1);
    service.search_by_keyword("dune", 1, 20).await;

    assert_eq!(service.source.calls(), 2);
  }

  #[tokio::test]
  async fn test_home_banners_miss_fetches_active_only() {
    let service = service(FakeSource::with_feed(sample_feed()));

    let banners = service.home_banners("top").await;
    assert_eq!(banners.len(), 1);
    assert_eq!(banners[0].id, "b1");

    let stored: Vec<HomeBanner> = service.store().get_by_category("top").unwrap();
    assert_eq!(stored.len(), 1);

    service.home_banners("top").await;
    assert_eq!(service.source.calls(), 1);
  }

  #[tokio::test]
  async fn test_home_miss_stores_the_whole_feed() {
    let service = service(FakeSource::with_feed(sample_feed()));

    assert_eq!(service.home_banners("top").await.len(), 1);

    // The other groups were stored by the same write-back
    let store = service.store();
    assert_eq!(store.get_by_category::<HomeBook>("recommend").unwrap().len(), 2);
    assert_eq!(store.get_by_category::<HomeCategory>("genre").unwrap().len(), 1);

    service.home_books("recommend").await;
    service.home_categories("genre").await;
    assert_eq!(service.source.calls(), 1);
  }

  #[tokio::test]
  async fn test_home_read_network_only_leaves_store_alone() {
    let service = service_with(FakeSource::with_feed(sample_feed()), CacheStrategy::NetworkOnly);

    assert_eq!(service.home_books("recommend").await.len(), 2);
    assert!(service
      .store()
      .get_by_category::<HomeBook>("recommend")
      .unwrap()
      .is_empty());
  }

  #[tokio::test]
  async fn test_home_books_and_categories_from_feed() {
    let service = service(FakeSource::with_feed(sample_feed()));

    let books = service.home_books("recommend").await;
    assert_eq!(ranks(&books), vec![("r1", 1), ("r2", 2)]);

    let categories = service.home_categories("genre").await;
    assert_eq!(categories[0].name, "Fantasy");
  }

  #[tokio::test]
  async fn test_home_feed_failure_returns_empty() {
    let service = service(FakeSource::default());
    let mut diagnostics = service.subscribe_diagnostics();

    assert!(service.home_categories("genre").await.is_empty());
    assert_eq!(
      diagnostics.try_recv().unwrap().operation,
      "home_categories:genre"
    );
  }

  #[tokio::test]
  async fn test_refresh_home_populates_every_table() {
    let service = service(FakeSource::with_feed(sample_feed()));

    service.refresh_home().await.unwrap();

    let store = service.store();
    assert_eq!(store.get_by_category::<HomeBook>("recommend").unwrap().len(), 2);
    assert_eq!(store.get_by_category::<HomeBanner>("top").unwrap().len(), 1);
    assert_eq!(store.get_by_category::<HomeCategory>("genre").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_refresh_home_surfaces_failure() {
    let service = service(FakeSource::default());
    assert!(service.refresh_home().await.is_err());
  }

  #[tokio::test]
  async fn test_failed_refresh_leaves_previous_feed() {
    let service = service(FakeSource::with_feed(sample_feed()));
    service
      .store()
      .insert_all(&[stored_book("old", "recommend", 0)])
      .unwrap();
    service
      .store()
      .database()
      .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE home_categories")?))
      .unwrap();

    assert!(service.refresh_home().await.is_err());

    let books: Vec<HomeBook> = service.store().get_by_category("recommend").unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, "old");
    assert!(service
      .store()
      .get_by_category::<HomeBanner>("top")
      .unwrap()
      .is_empty());
  }

  #[tokio::test]
  async fn test_clear_table_empties_only_that_table() {
    let service = service(FakeSource::with_feed(sample_feed()));
    service.refresh_home().await.unwrap();

    assert_eq!(service.clear_table(HomeTable::Banners).await.unwrap(), 2);

    let store = service.store();
    assert!(store.get_by_category::<HomeBanner>("top").unwrap().is_empty());
    assert_eq!(store.get_by_category::<HomeBook>("recommend").unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_observe_home_books_follows_refresh() {
    let service = service(FakeSource::with_feed(sample_feed()));
    let mut rows = Box::pin(service.observe_home_books("recommend"));

    let initial = timeout(Duration::from_secs(1), rows.next()).await.unwrap().unwrap();
    assert!(initial.is_empty());

    service.refresh_home().await.unwrap();

    let refreshed = timeout(Duration::from_secs(1), rows.next()).await.unwrap().unwrap();
    assert_eq!(ranks(&refreshed), vec![("r1", 1), ("r2", 2)]);
  }

  #[tokio::test]
  async fn test_clear_shelf_only_removes_that_shelf() {
    let service = service(FakeSource::default());
    service
      .store()
      .insert_all(&[stored_book("a", "recommend", 0), stored_book("b", "hot", 0)])
      .unwrap();

    assert_eq!(service.clear_shelf("recommend").await.unwrap(), 1);
    assert_eq!(ranks(&service.get_hot_ranking().await), vec![("b", 1)]);
  }

  #[tokio::test]
  async fn test_clear_home_data_empties_all_tables() {
    let service = service(FakeSource::with_feed(sample_feed()));
    service.refresh_home().await.unwrap();

    service.clear_home_data().await.unwrap();

    let store = service.store();
    assert!(store.get_by_category::<HomeBook>("recommend").unwrap().is_empty());
    assert!(store.get_by_category::<HomeBanner>("top").unwrap().is_empty());
    assert!(store.get_by_category::<HomeCategory>("genre").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_clear_home_data_failure_is_not_swallowed() {
    let service = service(FakeSource::with_feed(sample_feed()));
    service.refresh_home().await.unwrap();
    service
      .store()
      .database()
      .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE home_banners")?))
      .unwrap();

    let err = service.clear_home_data().await.unwrap_err();
    assert!(err.to_string().contains("after 3 attempts"));

    // Rolled back: the books shelf is still there
    assert_eq!(
      service
        .store()
        .get_by_category::<HomeBook>("recommend")
        .unwrap()
        .len(),
      2
    );
  }
}
