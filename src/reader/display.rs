use serde::Serialize;

use crate::models::HomeBook;

/// Row shown in a ranking or search list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayItem {
  pub id: String,
  pub title: String,
  pub author: String,
  /// 1-based position in the list it was produced for
  pub rank: usize,
}

/// Project books into display rows, ranked by list position.
pub fn to_display_items(books: Vec<HomeBook>) -> Vec<DisplayItem> {
  books
    .into_iter()
    .enumerate()
    .map(|(index, book)| DisplayItem {
      id: book.id,
      title: book.title,
      author: book.author,
      rank: index + 1,
    })
    .collect()
}
