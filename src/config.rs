use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheStrategy;

/// Application configuration. Built once at startup and handed to
/// constructors; nothing reads it from global state.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL the endpoint paths are joined onto (e.g. "https://api.example.com/v1/")
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Attempts after the first one for transport errors and 5xx responses
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  #[serde(default = "default_page_size")]
  pub ranking_page_size: u32,
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_max_retries() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  1000
}

fn default_page_size() -> u32 {
  20
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// Database file. Defaults to $XDG_DATA_HOME/novelshelf/home.db
  pub path: Option<PathBuf>,
}

/// Strategy per call site, plus search cache freshness.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub rankings: CacheStrategy,
  #[serde(default)]
  pub search: CacheStrategy,
  #[serde(default)]
  pub home: CacheStrategy,
  #[serde(default = "default_search_ttl_minutes")]
  pub search_ttl_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      rankings: CacheStrategy::default(),
      search: CacheStrategy::default(),
      home: CacheStrategy::default(),
      search_ttl_minutes: default_search_ttl_minutes(),
    }
  }
}

impl CacheConfig {
  /// Apply one strategy to every call site.
  pub fn with_strategy(self, strategy: CacheStrategy) -> Self {
    Self {
      rankings: strategy,
      search: strategy,
      home: strategy,
      ..self
    }
  }

  pub fn search_ttl(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.search_ttl_minutes)
  }
}

fn default_search_ttl_minutes() -> i64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
  /// Max concurrent local store operations
  #[serde(default = "default_io_concurrency")]
  pub io_concurrency: usize,
  /// Max concurrent CPU-bound transforms
  #[serde(default = "default_compute_concurrency")]
  pub compute_concurrency: usize,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      io_concurrency: default_io_concurrency(),
      compute_concurrency: default_compute_concurrency(),
    }
  }
}

fn default_io_concurrency() -> usize {
  4
}

fn default_compute_concurrency() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(2)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./novelshelf.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/novelshelf/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/novelshelf/config.yaml\n\
                 with at least `api: {{ base_url: ... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("novelshelf.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("novelshelf").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the optional API bearer token from NOVELSHELF_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("NOVELSHELF_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  /// Directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("novelshelf"))
  }

  /// Resolved database path.
  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("home.db")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://books.example.com/api/\n").unwrap();

    assert_eq!(config.api.base_url, "https://books.example.com/api/");
    assert_eq!(config.api.max_retries, 3);
    assert_eq!(config.api.retry_delay(), Duration::from_millis(1000));
    assert_eq!(config.api.timeout(), Duration::from_secs(15));
    assert_eq!(config.cache.rankings, CacheStrategy::CacheFirst);
    assert_eq!(config.cache.search_ttl_minutes, 30);
    assert_eq!(config.dispatch.io_concurrency, 4);
    assert!(config.store.path.is_none());
  }

  #[test]
  fn test_strategies_parse_kebab_case() {
    let yaml = r#"
api:
  base_url: http://localhost:8080/
cache:
  rankings: network-first
  search: cache-only
  home: network-only
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.cache.rankings, CacheStrategy::NetworkFirst);
    assert_eq!(config.cache.search, CacheStrategy::CacheOnly);
    assert_eq!(config.cache.home, CacheStrategy::NetworkOnly);
  }

  #[test]
  fn test_missing_base_url_is_an_error() {
    assert!(Config::parse("cache:\n  search_ttl_minutes: 5\n").is_err());
  }

  #[test]
  fn test_with_strategy_overrides_every_call_site() {
    let cache = CacheConfig::default().with_strategy(CacheStrategy::NetworkOnly);
    assert_eq!(cache.rankings, CacheStrategy::NetworkOnly);
    assert_eq!(cache.search, CacheStrategy::NetworkOnly);
    assert_eq!(cache.home, CacheStrategy::NetworkOnly);
    assert_eq!(cache.search_ttl_minutes, 30);
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "api:\n  base_url: http://localhost/\nstore:\n  path: /tmp/shelf.db"
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.store_path().unwrap(), PathBuf::from("/tmp/shelf.db"));
  }

  #[test]
  fn test_load_missing_explicit_path_fails() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
