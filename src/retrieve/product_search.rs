//! Cross-page product search and recommendation.
//!
//! A recommendation subsystem must never crash the user-facing flow: provider
//! failures collapse to an empty result set and per-URL scrape/embed failures
//! are skipped individually while the batch continues.
//!
//! Candidate URLs come back from the search provider over-fetched (3x) and
//! are split into detail pages and listing pages by the per-domain
//! [`SitePatterns`] registry; when too few detail pages arrive directly, one
//! bounded hop into listing pages harvests more.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::embed::Embedder;
use crate::scrape::{ScrapeMode, Scraper};
use crate::search::SearchProvider;
use crate::stores::{VectorBackend, VectorRecord};

/// Results requested from the unscoped similarity search.
pub const PRODUCT_TOP_K: usize = 10;

/// Provider results are over-fetched by this ratio to absorb irrelevant hits.
pub const OVER_FETCH_RATIO: usize = 3;

/// Candidate detail pages indexed per query.
pub const TARGET_CANDIDATES: usize = 4;

/// Upper bound on links harvested from a single listing page.
pub const MAX_LISTING_LINKS: usize = 20;

/// One site's URL-shape heuristic: a URL containing any marker in its path is
/// a product detail page; everything else on that site is a listing page.
#[derive(Clone, Debug)]
pub struct SiteRule {
    pub domain: String,
    pub detail_markers: Vec<String>,
}

impl SiteRule {
    pub fn new<I, S>(domain: impl Into<String>, detail_markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domain: domain.into().to_lowercase(),
            detail_markers: detail_markers
                .into_iter()
                .map(|marker| marker.into().to_lowercase())
                .collect(),
        }
    }
}

/// Registry of per-domain URL-pattern heuristics. Unknown domains default to
/// treating every URL as a detail page, so the pipeline still works on sites
/// nobody registered.
#[derive(Clone, Debug)]
pub struct SitePatterns {
    rules: Vec<SiteRule>,
}

impl SitePatterns {
    pub fn new(rules: Vec<SiteRule>) -> Self {
        Self { rules }
    }

    pub fn register(&mut self, rule: SiteRule) {
        self.rules.push(rule);
    }

    /// Whether `url` looks like a product detail page on `site` (or on any
    /// registered site when no site is given).
    pub fn is_detail_page(&self, url: &str, site: Option<&str>) -> bool {
        let url_lower = url.to_lowercase();
        for rule in &self.rules {
            if !url_lower.contains(&rule.domain) {
                continue;
            }
            if let Some(site) = site {
                if !site.to_lowercase().contains(&rule.domain) {
                    continue;
                }
            }
            return rule
                .detail_markers
                .iter()
                .any(|marker| url_lower.contains(marker));
        }
        true
    }
}

impl Default for SitePatterns {
    fn default() -> Self {
        Self::new(vec![
            SiteRule::new("myntra.com", ["/buy"]),
            SiteRule::new("ajio.com", ["/p/"]),
            SiteRule::new("nykaafashion.com", ["/p/"]),
            SiteRule::new("amazon.in", ["/dp/"]),
            SiteRule::new("flipkart.com", ["/p/"]),
            SiteRule::new("allensolly.abfrl.in", ["/p/"]),
        ])
    }
}

pub struct ProductSearch {
    scraper: Arc<Scraper>,
    embedder: Embedder,
    store: Arc<dyn VectorBackend>,
    provider: Arc<dyn SearchProvider>,
    patterns: SitePatterns,
}

impl ProductSearch {
    pub fn new(
        scraper: Arc<Scraper>,
        embedder: Embedder,
        store: Arc<dyn VectorBackend>,
        provider: Arc<dyn SearchProvider>,
        patterns: SitePatterns,
    ) -> Self {
        Self {
            scraper,
            embedder,
            store,
            provider,
            patterns,
        }
    }

    /// Recommends product URLs for `query`, optionally restricted to one
    /// site. Returns a set of distinct URLs; callers consume it unordered.
    pub async fn recommend(&self, site: Option<&str>, query: &str) -> HashSet<String> {
        let candidates = self.collect_candidates(site, query).await;
        if candidates.is_empty() {
            info!(query, "no candidate product pages found");
            return HashSet::new();
        }

        for url in &candidates {
            if let Err(err) = self.index_candidate(url).await {
                warn!(url, %err, "skipping candidate");
            }
        }

        // Url-prefixed at index time, plain here: identity lives in the
        // stored side of the similarity.
        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(%err, "query embedding failed; returning empty recommendation");
                return HashSet::new();
            }
        };

        match self.store.search(&query_embedding, PRODUCT_TOP_K, None).await {
            Ok(hits) => {
                let urls: HashSet<String> = hits.into_iter().map(|hit| hit.url).collect();
                info!(query, count = urls.len(), "product recommendation ready");
                urls
            }
            Err(err) => {
                warn!(%err, "similarity search failed; returning empty recommendation");
                HashSet::new()
            }
        }
    }

    /// Queries the provider and resolves listing pages into detail pages.
    async fn collect_candidates(&self, site: Option<&str>, query: &str) -> Vec<String> {
        let results = match self
            .provider
            .text_search(query, site, TARGET_CANDIDATES * OVER_FETCH_RATIO)
            .await
        {
            Ok(results) => results,
            Err(err) => {
                warn!(%err, "search provider failed; returning no candidates");
                return Vec::new();
            }
        };

        let mut detail = Vec::new();
        let mut listing = Vec::new();
        for result in results {
            if let Some(site) = site {
                if !result.url.to_lowercase().contains(&site.to_lowercase()) {
                    continue;
                }
            }
            if self.patterns.is_detail_page(&result.url, site) {
                detail.push(result.url);
            } else {
                listing.push(result.url);
            }
        }
        debug!(
            detail = detail.len(),
            listing = listing.len(),
            "partitioned provider results"
        );

        if detail.len() < TARGET_CANDIDATES && !listing.is_empty() {
            self.harvest_listings(site, &listing, &mut detail).await;
        }

        detail.truncate(TARGET_CANDIDATES);
        detail
    }

    /// One bounded hop into listing pages, stopping at the target count.
    async fn harvest_listings(&self, site: Option<&str>, listing: &[String], detail: &mut Vec<String>) {
        let mut seen: HashSet<String> = detail.iter().cloned().collect();
        for page in listing {
            if detail.len() >= TARGET_CANDIDATES {
                break;
            }
            let Ok(base) = Url::parse(page) else {
                continue;
            };
            let links = match self.scraper.links(page).await {
                Ok(links) => links,
                Err(err) => {
                    warn!(url = page, %err, "listing page fetch failed");
                    continue;
                }
            };
            let mut harvested = 0usize;
            for link in links {
                if detail.len() >= TARGET_CANDIDATES || harvested >= MAX_LISTING_LINKS {
                    break;
                }
                if link.host_str() != base.host_str() {
                    continue;
                }
                let link = link.to_string();
                if let Some(site) = site {
                    if !link.to_lowercase().contains(&site.to_lowercase()) {
                        continue;
                    }
                }
                if !self.patterns.is_detail_page(&link, site) {
                    continue;
                }
                if seen.insert(link.clone()) {
                    detail.push(link);
                    harvested += 1;
                }
            }
        }
    }

    /// Scrapes one candidate page and upserts its document record.
    async fn index_candidate(&self, url: &str) -> Result<(), crate::types::AssistError> {
        let chunks = self.scraper.scrape(url, ScrapeMode::Summary).await?;
        let Some(chunk) = chunks.into_iter().next() else {
            debug!(url, "candidate page had no summary text");
            return Ok(());
        };
        // Url-prefixed so similarity leans on URL identity as well as
        // content: slugs usually carry the product name.
        let embedding = self.embedder.embed(&format!("{url} {}", chunk.text)).await?;
        self.store.put(VectorRecord::document(url, embedding)).await
    }
}
