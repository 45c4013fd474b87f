use serde::{Deserialize, Serialize};

/// Book shown on the home feed or in a ranking/search list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeBook {
  pub id: String,
  /// Feed section or ranking this book belongs to (e.g. "hot", "recommend")
  pub category: String,
  pub title: String,
  pub author: String,
  pub cover_url: Option<String>,
  pub intro: Option<String>,
  pub sort_order: i64,
  /// Unix milliseconds
  pub update_time: i64,
}

/// Carousel banner on the home screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeBanner {
  pub id: String,
  pub banner_type: String,
  pub title: String,
  pub image_url: String,
  pub link_url: Option<String>,
  pub sort_order: i64,
  pub is_active: bool,
  pub update_time: i64,
}

/// Genre/category tile on the home screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeCategory {
  pub id: String,
  pub category_type: String,
  pub name: String,
  pub icon: Option<String>,
  pub sort_order: i64,
  pub update_time: i64,
}

/// Ranking lists served from `home_books`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingKind {
  Hot,
  Update,
  Newest,
}

impl RankingKind {
  /// Category tag in the store, also the `type` query value on the wire
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Hot => "hot",
      Self::Update => "update",
      Self::Newest => "newest",
    }
  }
}

impl std::fmt::Display for RankingKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
