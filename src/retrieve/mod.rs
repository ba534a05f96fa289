//! Context retrieval strategies.
//!
//! Two independent orchestrations over the scraper, embedder, and vector
//! store: [`current_page`] answers "what on this page is relevant to the
//! query" with a layered fallback ladder, and [`product_search`] answers
//! "which pages across a site match the query" via an external search
//! provider. Only the asking orchestrator couples them.

pub mod current_page;
pub mod product_search;

pub use current_page::CurrentPageRetriever;
pub use product_search::{ProductSearch, SitePatterns, SiteRule};
