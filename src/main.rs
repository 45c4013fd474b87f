mod api;
mod cache;
mod config;
mod db;
mod dispatch;
mod logging;
mod models;
mod reader;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ReaderApi;
use crate::cache::CacheStrategy;
use crate::db::{Database, HomeTable};
use crate::dispatch::DispatcherProvider;
use crate::reader::{Diagnostic, DisplayItem, ReaderService};

#[derive(Parser, Debug)]
#[command(name = "novelshelf")]
#[command(about = "Browse novel rankings, search and the home feed with an offline cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/novelshelf/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Override the cache strategy for every read
  /// (cache-first, network-first, cache-only, network-only)
  #[arg(short, long, global = true)]
  strategy: Option<CacheStrategy>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Hot ranking
  Hot,
  /// Recently updated ranking
  Update,
  /// Newest ranking
  Newest,
  /// Search books by keyword
  Search {
    keyword: String,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    page_size: u32,
    /// Also add the results to this home shelf
    #[arg(long)]
    shelve: Option<String>,
  },
  /// Show the home feed (refreshing it first with --refresh)
  Home {
    /// Shelf to list
    #[arg(long, default_value = "recommend")]
    shelf: String,
    #[arg(long)]
    refresh: bool,
  },
  /// Follow one home shelf, refreshing the feed periodically
  Watch {
    #[arg(long, default_value = "recommend")]
    shelf: String,
    /// Seconds between feed refreshes
    #[arg(long, default_value_t = 60)]
    every: u64,
  },
  /// Delete cached home data and search results, or one shelf with --shelf,
  /// or one table with --table
  Clear {
    #[arg(long, conflicts_with = "table")]
    shelf: Option<String>,
    #[arg(long, value_enum)]
    table: Option<TableArg>,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TableArg {
  Books,
  Banners,
  Categories,
}

impl From<TableArg> for HomeTable {
  fn from(table: TableArg) -> Self {
    match table {
      TableArg::Books => HomeTable::Books,
      TableArg::Banners => HomeTable::Banners,
      TableArg::Categories => HomeTable::Categories,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let config = match args.strategy {
    Some(strategy) => config::Config {
      cache: config.cache.with_strategy(strategy),
      ..config
    },
    None => config,
  };

  let _log_guard = logging::init(&config::Config::data_dir()?.join("logs"), args.verbose)?;
  tracing::info!(command = ?args.command, "starting");

  let dispatch = DispatcherProvider::from_config(&config.dispatch);
  let store_path = config.store_path()?;
  let db = Arc::new(
    dispatch
      .unconfined()
      .run(move || Database::open(&store_path))
      .await??,
  );
  let api = ReaderApi::new(&config.api)?;
  let service = ReaderService::new(db, api, &config, dispatch);
  let mut diagnostics = service.subscribe_diagnostics();

  match args.command {
    Command::Hot => print_items(&service.get_hot_ranking().await),
    Command::Update => print_items(&service.get_update_ranking().await),
    Command::Newest => print_items(&service.get_newest_ranking().await),
    Command::Search {
      keyword,
      page,
      page_size,
      shelve,
    } => {
      print_items(&service.search_by_keyword(&keyword, page, page_size).await);
      if let Some(shelf) = shelve {
        let added = service
          .shelve_search(&keyword, page, page_size, &shelf)
          .await?;
        println!("Added {} books to shelf {}", added, shelf);
      }
    }
    Command::Home { shelf, refresh } => {
      if refresh {
        service.refresh_home().await?;
      }

      for banner in service.home_banners("top").await {
        println!("[banner] {}  {}", banner.title, banner.image_url);
      }
      let categories = service.home_categories("genre").await;
      if !categories.is_empty() {
        let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
        println!("[genres] {}", names.join(" | "));
      }
      println!("[{}]", shelf);
      print_items(&service.home_books(&shelf).await);
    }
    Command::Watch { shelf, every } => watch_shelf(&service, &shelf, every).await?,
    Command::Clear {
      shelf: Some(shelf), ..
    } => {
      let removed = service.clear_shelf(&shelf).await?;
      println!("Removed {} books from shelf {}", removed, shelf);
    }
    Command::Clear {
      table: Some(table), ..
    } => {
      let table = HomeTable::from(table);
      let removed = service.clear_table(table).await?;
      println!("Removed {} rows from {}", removed, table.name());
    }
    Command::Clear {
      shelf: None,
      table: None,
    } => {
      service.clear_home_data().await?;
      let searches = service.clear_search_cache().await?;
      println!("Cleared home data and {} cached searches", searches);
    }
  }

  // Reads degrade to empty lists; say why
  while let Ok(Diagnostic { operation, reason }) = diagnostics.try_recv() {
    eprintln!("warning: {} unavailable: {}", operation, reason);
  }

  Ok(())
}

/// Print the shelf whenever it changes until Ctrl-C.
async fn watch_shelf(service: &ReaderService<ReaderApi>, shelf: &str, every: u64) -> Result<()> {
  use futures::StreamExt;

  let mut rows = Box::pin(service.observe_home_books(shelf));
  let mut refresh = tokio::time::interval(Duration::from_secs(every.max(1)));

  loop {
    tokio::select! {
      _ = refresh.tick() => {
        if let Err(e) = service.refresh_home().await {
          tracing::warn!(error = %e, "home refresh failed");
          eprintln!("warning: refresh failed: {}", e);
        }
      }
      snapshot = rows.next() => match snapshot {
        Some(items) => {
          println!("--- {} ---", shelf);
          print_items(&items);
        }
        None => break,
      },
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  Ok(())
}

fn print_items(items: &[DisplayItem]) {
  if items.is_empty() {
    println!("(nothing to show)");
    return;
  }

  for item in items {
    println!("{:>3}. {} - {}", item.rank, item.title, item.author);
  }
}
