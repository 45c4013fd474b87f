//! Home feed store: books, banners and categories, each keyed by category.
//!
//! Every read orders by ascending `sort_order`, newest `update_time` first on ties.
//! Writes bump a per-table version so [`HomeStore::observe`] subscribers re-query.

use color_eyre::{eyre::eyre, Result};
use futures::{Stream, StreamExt};
use rusqlite::{params, Transaction};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use super::Database;
use crate::dispatch::Dispatcher;
use crate::models::{HomeBanner, HomeBook, HomeCategory};

/// The three home feed tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeTable {
  Books,
  Banners,
  Categories,
}

impl HomeTable {
  pub const ALL: [HomeTable; 3] = [Self::Books, Self::Banners, Self::Categories];

  pub fn name(&self) -> &'static str {
    match self {
      Self::Books => "home_books",
      Self::Banners => "home_banners",
      Self::Categories => "home_categories",
    }
  }

  fn tracks_active(&self) -> bool {
    matches!(self, Self::Banners)
  }

  fn index(&self) -> usize {
    *self as usize
  }
}

/// A record that lives in one of the home feed tables.
pub trait HomeRecord: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  const TABLE: HomeTable;

  /// Unique within the record's category
  fn id(&self) -> &str;

  fn category(&self) -> &str;

  fn sort_order(&self) -> i64;

  /// Unix milliseconds
  fn update_time(&self) -> i64;

  /// Inactive records are stored but never returned by reads.
  /// Only honoured by tables that track it.
  fn is_active(&self) -> bool {
    true
  }
}

impl HomeRecord for HomeBook {
  const TABLE: HomeTable = HomeTable::Books;

  fn id(&self) -> &str {
    &self.id
  }

  fn category(&self) -> &str {
    &self.category
  }

  fn sort_order(&self) -> i64 {
    self.sort_order
  }

  fn update_time(&self) -> i64 {
    self.update_time
  }
}

impl HomeRecord for HomeBanner {
  const TABLE: HomeTable = HomeTable::Banners;

  fn id(&self) -> &str {
    &self.id
  }

  fn category(&self) -> &str {
    &self.banner_type
  }

  fn sort_order(&self) -> i64 {
    self.sort_order
  }

  fn update_time(&self) -> i64 {
    self.update_time
  }

  fn is_active(&self) -> bool {
    self.is_active
  }
}

impl HomeRecord for HomeCategory {
  const TABLE: HomeTable = HomeTable::Categories;

  fn id(&self) -> &str {
    &self.id
  }

  fn category(&self) -> &str {
    &self.category_type
  }

  fn sort_order(&self) -> i64 {
    self.sort_order
  }

  fn update_time(&self) -> i64 {
    self.update_time
  }
}

/// Repository over the home feed tables.
///
/// Methods are synchronous; async callers run them through an I/O dispatcher.
#[derive(Clone)]
pub struct HomeStore {
  db: Arc<Database>,
  /// Write version per table, indexed by `HomeTable::index`
  changes: Arc<[watch::Sender<u64>; 3]>,
}

impl HomeStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self {
      db,
      changes: Arc::new(std::array::from_fn(|_| watch::channel(0u64).0)),
    }
  }

  #[cfg(test)]
  pub fn database(&self) -> &Arc<Database> {
    &self.db
  }

  fn notify(&self, table: HomeTable) {
    self.changes[table.index()].send_modify(|version| *version += 1);
  }

  /// One-shot read of a category.
  pub fn get_by_category<R: HomeRecord>(&self, category: &str) -> Result<Vec<R>> {
    let table = R::TABLE;
    let sql = format!(
      "SELECT data FROM {} WHERE category = ?1{} ORDER BY sort_order ASC, update_time DESC",
      table.name(),
      if table.tracks_active() {
        " AND is_active = 1"
      } else {
        ""
      }
    );

    self.db.with_conn(|conn| {
      let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map(params![category], |row| row.get::<_, Vec<u8>>(0))
        .map_err(|e| eyre!("Failed to query {}: {}", table.name(), e))?;

      let mut records = Vec::new();
      for data in rows {
        let data = data.map_err(|e| eyre!("Failed to read {} row: {}", table.name(), e))?;
        match serde_json::from_slice::<R>(&data) {
          Ok(record) => records.push(record),
          Err(e) => warn!(table = table.name(), error = %e, "skipping undecodable row"),
        }
      }
      Ok(records)
    })
  }

  /// Subscribe to a category.
  ///
  /// Yields the current snapshot immediately, then a fresh snapshot after
  /// every write to the record's table. Each call starts a new subscription.
  /// Writes that land between two polls are coalesced into one snapshot.
  /// Every re-query runs on `io`.
  pub fn observe<R: HomeRecord>(
    &self,
    category: &str,
    io: Dispatcher,
  ) -> impl Stream<Item = Result<Vec<R>>> + Send + 'static {
    let store = self.clone();
    let category: Arc<str> = Arc::from(category);
    let rx = self.changes[R::TABLE.index()].subscribe();

    WatchStream::new(rx).then(move |_| {
      let store = store.clone();
      let category = category.clone();
      let io = io.clone();
      async move {
        io.run(move || store.get_by_category::<R>(&category))
          .await
          .and_then(|records| records)
      }
    })
  }

  /// Insert records, replacing any with the same (id, category).
  pub fn insert_all<R: HomeRecord>(&self, records: &[R]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }

    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      insert_rows(&tx, records)?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))
    })?;

    debug!(table = R::TABLE.name(), count = records.len(), "inserted records");
    self.notify(R::TABLE);
    Ok(())
  }

  /// Swap the whole contents of a category in one transaction.
  pub fn replace_category<R: HomeRecord>(&self, category: &str, records: &[R]) -> Result<()> {
    if let Some(stray) = records.iter().find(|r| r.category() != category) {
      return Err(eyre!(
        "Record {} has category '{}', expected '{}'",
        stray.id(),
        stray.category(),
        category
      ));
    }

    self.replace_in_transaction(&[category], records)?;
    debug!(table = R::TABLE.name(), category, count = records.len(), "replaced category");
    Ok(())
  }

  /// Swap in a fetched home feed across all three tables in one
  /// transaction. Every category present in the feed is replaced; categories
  /// the feed doesn't mention are left alone. Readers see either the old feed
  /// or the new one, never a mix.
  pub fn replace_home_feed(
    &self,
    books: &[HomeBook],
    banners: &[HomeBanner],
    categories: &[HomeCategory],
  ) -> Result<()> {
    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      replace_present_categories(&tx, books)?;
      replace_present_categories(&tx, banners)?;
      replace_present_categories(&tx, categories)?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))
    })?;

    debug!(
      books = books.len(),
      banners = banners.len(),
      categories = categories.len(),
      "replaced home feed"
    );
    for table in HomeTable::ALL {
      self.notify(table);
    }
    Ok(())
  }

  fn replace_in_transaction<R: HomeRecord>(&self, categories: &[&str], records: &[R]) -> Result<()> {
    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      replace_rows(&tx, categories, records)?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))
    })?;

    self.notify(R::TABLE);
    Ok(())
  }

  /// Delete every record of a category. Returns the number of rows removed.
  pub fn delete_by_category<R: HomeRecord>(&self, category: &str) -> Result<usize> {
    let table = R::TABLE;
    let deleted = self.db.with_conn(|conn| {
      conn
        .execute(
          &format!("DELETE FROM {} WHERE category = ?1", table.name()),
          params![category],
        )
        .map_err(|e| eyre!("Failed to delete from {}: {}", table.name(), e))
    })?;

    if deleted > 0 {
      self.notify(table);
    }
    Ok(deleted)
  }

  /// Empty one table.
  pub fn clear_all<R: HomeRecord>(&self) -> Result<usize> {
    let table = R::TABLE;
    let deleted = self.db.with_conn(|conn| {
      conn
        .execute(&format!("DELETE FROM {}", table.name()), [])
        .map_err(|e| eyre!("Failed to clear {}: {}", table.name(), e))
    })?;

    if deleted > 0 {
      self.notify(table);
    }
    Ok(deleted)
  }

  /// Empty books, banners and categories as one unit.
  ///
  /// Either all three tables end up empty or none is touched: a failure
  /// rolls the transaction back and is returned to the caller.
  pub fn clear_all_home_data(&self) -> Result<()> {
    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      for table in HomeTable::ALL {
        tx.execute(&format!("DELETE FROM {}", table.name()), [])
          .map_err(|e| eyre!("Failed to clear {}: {}", table.name(), e))?;
      }
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))
    })?;

    for table in HomeTable::ALL {
      self.notify(table);
    }
    Ok(())
  }
}

/// Sort in store read order, for lists that did not come from the store.
pub fn sort_for_display<R: HomeRecord>(records: &mut [R]) {
  records.sort_by(|a, b| {
    a.sort_order()
      .cmp(&b.sort_order())
      .then_with(|| b.update_time().cmp(&a.update_time()))
  });
}

/// Replace every category that appears in `records`.
fn replace_present_categories<R: HomeRecord>(tx: &Transaction<'_>, records: &[R]) -> Result<()> {
  let categories: BTreeSet<&str> = records.iter().map(|r| r.category()).collect();
  if categories.is_empty() {
    return Ok(());
  }

  let categories: Vec<&str> = categories.into_iter().collect();
  replace_rows(tx, &categories, records)
}

fn replace_rows<R: HomeRecord>(tx: &Transaction<'_>, categories: &[&str], records: &[R]) -> Result<()> {
  let table = R::TABLE;
  for category in categories {
    tx.execute(
      &format!("DELETE FROM {} WHERE category = ?1", table.name()),
      params![category],
    )
    .map_err(|e| eyre!("Failed to delete old {} rows: {}", table.name(), e))?;
  }
  insert_rows(tx, records)
}

fn insert_rows<R: HomeRecord>(tx: &Transaction<'_>, records: &[R]) -> Result<()> {
  let table = R::TABLE;
  let sql = if table.tracks_active() {
    format!(
      "INSERT OR REPLACE INTO {} (id, category, sort_order, update_time, is_active, data)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      table.name()
    )
  } else {
    format!(
      "INSERT OR REPLACE INTO {} (id, category, sort_order, update_time, data)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      table.name()
    )
  };

  let mut stmt = tx
    .prepare(&sql)
    .map_err(|e| eyre!("Failed to prepare insert: {}", e))?;

  for record in records {
    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    let result = if table.tracks_active() {
      stmt.execute(params![
        record.id(),
        record.category(),
        record.sort_order(),
        record.update_time(),
        record.is_active(),
        data
      ])
    } else {
      stmt.execute(params![
        record.id(),
        record.category(),
        record.sort_order(),
        record.update_time(),
        data
      ])
    };

    result.map_err(|e| eyre!("Failed to store {} record {}: {}", table.name(), record.id(), e))?;
  }

  Ok(())
}
