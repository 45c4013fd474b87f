/// Schema for the home feed and search cache. Idempotent, run on every open.
///
/// Each row keeps the record's full JSON payload in `data`; the other
/// columns exist for keys, filtering and ordering.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS home_books (
    id TEXT NOT NULL,
    category TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    update_time INTEGER NOT NULL DEFAULT 0,
    data BLOB NOT NULL,
    PRIMARY KEY (id, category)
);

CREATE INDEX IF NOT EXISTS idx_home_books_order
    ON home_books(category, sort_order, update_time);

CREATE TABLE IF NOT EXISTS home_banners (
    id TEXT NOT NULL,
    category TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    update_time INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    data BLOB NOT NULL,
    PRIMARY KEY (id, category)
);

CREATE INDEX IF NOT EXISTS idx_home_banners_order
    ON home_banners(category, sort_order, update_time);

CREATE TABLE IF NOT EXISTS home_categories (
    id TEXT NOT NULL,
    category TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    update_time INTEGER NOT NULL DEFAULT 0,
    data BLOB NOT NULL,
    PRIMARY KEY (id, category)
);

CREATE INDEX IF NOT EXISTS idx_home_categories_order
    ON home_categories(category, sort_order, update_time);

-- Keyword search pages, keyed by hash of (keyword, page, page_size)
CREATE TABLE IF NOT EXISTS search_cache (
    query_hash TEXT PRIMARY KEY,
    keyword TEXT NOT NULL,
    page INTEGER NOT NULL,
    page_size INTEGER NOT NULL,
    data BLOB NOT NULL,
    cached_at INTEGER NOT NULL
);
"#;
