pub mod crawler;

pub use crawler::{BasicAuth, DEFAULT_MAX_PAGES, HttpCrawler, SelectorConfig, SourceConfig};
