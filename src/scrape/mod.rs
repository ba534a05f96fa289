//! Multi-strategy web scraper with graceful degradation.
//!
//! Two modes share one fetch path: `Summary` condenses heading/paragraph text
//! into a single bounded chunk, `Full` attempts structured field extraction
//! (via [`fields::FieldRegistry`]) and windows the whole page text. Browser
//! internal and otherwise non-fetchable URLs yield an empty chunk list before
//! any network call; network failures surface as [`ScrapeError`] so callers
//! can choose their fallback.

pub mod fields;

use std::time::Duration;

use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;
use url::Url;

use crate::types::{Chunk, ScrapeError, CHUNK_MAX_CHARS, CHUNK_NOISE_MIN_CHARS};

pub use fields::{FieldRegistry, FieldRule, Refine};

/// URL scheme prefixes that can never be fetched over the network.
/// Checked case-insensitively before anything else.
const DENIED_SCHEME_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "brave://",
    "opera://",
    "vivaldi://",
    "moz-extension://",
    "about:",
    "file://",
    "data:",
    "javascript:",
    "blob:",
    "view-source:",
];

/// Sites block obvious non-browser agents outright.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// What shape of chunks a scrape should produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrapeMode {
    /// One chunk of heading/paragraph text, capped at [`CHUNK_MAX_CHARS`].
    Summary,
    /// Structured field header plus fixed-size windows over the page text.
    Full,
}

/// Returns `true` when the URL is something we can actually fetch.
pub fn is_fetchable(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    if DENIED_SCHEME_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        return false;
    }
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// Collapses runs of whitespace into single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Clone)]
pub struct Scraper {
    client: Client,
    registry: FieldRegistry,
}

impl Scraper {
    pub fn new(client: Client, registry: FieldRegistry) -> Self {
        Self { client, registry }
    }

    /// Builds a scraper with its own HTTP client and the default field table.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ScrapeError::new("<client>", err.to_string()))?;
        Ok(Self::new(client, FieldRegistry::default()))
    }

    /// Fetches `url` and extracts chunks per `mode`.
    ///
    /// Non-fetchable URLs return `Ok(vec![])` without touching the network;
    /// fetch failures return a [`ScrapeError`] carrying the URL and cause.
    pub async fn scrape(&self, url: &str, mode: ScrapeMode) -> Result<Vec<Chunk>, ScrapeError> {
        if !is_fetchable(url) {
            debug!(url, "skipping non-fetchable url");
            return Ok(Vec::new());
        }
        let html = self.fetch(url).await?;
        let chunks = match mode {
            ScrapeMode::Summary => self.summary_from_html(url, &html),
            ScrapeMode::Full => self.full_from_html(url, &html),
        };
        debug!(url, count = chunks.len(), ?mode, "scraped page");
        Ok(chunks)
    }

    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ScrapeError::new(url, err.to_string()))?
            .error_for_status()
            .map_err(|err| ScrapeError::new(url, err.to_string()))?;
        response
            .text()
            .await
            .map_err(|err| ScrapeError::new(url, err.to_string()))
    }

    /// Summary extraction over already-fetched HTML: heading and paragraph
    /// text in document order, concatenated into one chunk that stops at the
    /// last element still fitting under the bound.
    pub fn summary_from_html(&self, url: &str, html: &str) -> Vec<Chunk> {
        let doc = Html::parse_document(html);
        let Ok(selector) = Selector::parse("h1, h2, h3, h4, h5, h6, p") else {
            return Vec::new();
        };

        let mut chunk = String::new();
        for element in doc.select(&selector) {
            let text = normalize_whitespace(&element.text().collect::<String>());
            if text.is_empty() {
                continue;
            }
            let needed = if chunk.is_empty() {
                text.chars().count()
            } else {
                text.chars().count() + 1
            };
            if chunk.chars().count() + needed > CHUNK_MAX_CHARS {
                break;
            }
            if !chunk.is_empty() {
                chunk.push(' ');
            }
            chunk.push_str(&text);
        }

        if chunk.is_empty() {
            Vec::new()
        } else {
            vec![Chunk::new(url, chunk, 0)]
        }
    }

    /// Full extraction over already-fetched HTML: structured header (if any
    /// field matched) prefixed to the raw page text, whitespace-normalized,
    /// split into fixed windows, noise windows dropped.
    pub fn full_from_html(&self, url: &str, html: &str) -> Vec<Chunk> {
        let doc = Html::parse_document(html);
        let header = self.registry.extract_header(&doc);
        let body = page_text(&doc);

        let combined = match header {
            Some(header) if body.is_empty() => header,
            Some(header) => format!("{header} {body}"),
            None => body,
        };
        let combined = normalize_whitespace(&combined);
        if combined.is_empty() {
            return Vec::new();
        }

        char_windows(&combined, CHUNK_MAX_CHARS)
            .into_iter()
            .filter(|window| window.trim().chars().count() > CHUNK_NOISE_MIN_CHARS)
            .enumerate()
            .map(|(idx, window)| Chunk::new(url, window, idx))
            .collect()
    }

    /// Fetches a listing page and returns the links it carries.
    pub async fn links(&self, url: &str) -> Result<Vec<Url>, ScrapeError> {
        if !is_fetchable(url) {
            return Ok(Vec::new());
        }
        let base = Url::parse(url).map_err(|err| ScrapeError::new(url, err.to_string()))?;
        let html = self.fetch(url).await?;
        Ok(self.extract_links(&base, &html))
    }

    /// Absolute same-document links harvested from a listing page, in
    /// document order, deduplicated.
    pub fn extract_links(&self, base: &Url, html: &str) -> Vec<Url> {
        let doc = Html::parse_document(html);
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();
        for element in doc.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(absolute) = base.join(href) else {
                continue;
            };
            if !matches!(absolute.scheme(), "http" | "https") {
                continue;
            }
            if seen.insert(absolute.to_string()) {
                links.push(absolute);
            }
        }
        links
    }
}

/// Visible text of the page body (script/style/noscript excluded), in
/// document order. Falls back to the whole document when there is no body.
fn page_text(doc: &Html) -> String {
    let body = Selector::parse("body").ok().and_then(|selector| {
        doc.select(&selector)
            .next()
            .map(|element| element.id())
    });
    let root = match body {
        Some(id) => id,
        None => doc.tree.root().id(),
    };

    let Some(start) = doc.tree.get(root) else {
        return String::new();
    };

    let mut out = String::new();
    for node in start.descendants() {
        if let Node::Text(text) = node.value() {
            let skip = node
                .parent()
                .and_then(ElementRef::wrap)
                .map(|el| matches!(el.value().name(), "script" | "style" | "noscript"))
                .unwrap_or(false);
            if skip {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(trimmed);
            }
        }
    }
    out
}

/// Splits text into fixed windows of at most `size` characters.
fn char_windows(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|window| window.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> Scraper {
        Scraper::new(Client::new(), FieldRegistry::default())
    }

    #[tokio::test]
    async fn browser_internal_urls_yield_empty_without_network() {
        let scraper = scraper();
        for url in [
            "chrome://settings",
            "CHROME://history",
            "about:blank",
            "file:///etc/passwd",
            "data:text/html,<p>x</p>",
            "javascript:alert(1)",
            "ftp://example.com/file",
        ] {
            let chunks = scraper.scrape(url, ScrapeMode::Full).await.unwrap();
            assert!(chunks.is_empty(), "{url} should not be scraped");
        }
    }

    #[test]
    fn fetchable_check_is_case_insensitive() {
        assert!(is_fetchable("https://shop.example/p/1"));
        assert!(is_fetchable("HTTP://shop.example"));
        assert!(!is_fetchable("Chrome-Extension://abc"));
        assert!(!is_fetchable("View-Source:https://x"));
    }

    #[test]
    fn summary_stops_before_overflowing_the_bound() {
        let long = "word ".repeat(150).trim().to_string(); // 749 chars
        let html = format!(
            "<html><body><h1>Heading One</h1><p>{long}</p><p>{long}</p></body></html>"
        );
        let chunks = scraper().summary_from_html("https://x", &html);
        assert_eq!(chunks.len(), 1);
        let text = &chunks[0].text;
        assert!(text.chars().count() <= CHUNK_MAX_CHARS);
        // First paragraph fits (11 + 1 + 749), second would overflow.
        assert!(text.starts_with("Heading One"));
        assert_eq!(text.matches("word").count(), 150);
    }

    #[test]
    fn summary_of_empty_page_is_empty() {
        let chunks = scraper().summary_from_html("https://x", "<html><body></body></html>");
        assert!(chunks.is_empty());
    }

    #[test]
    fn full_mode_prefixes_structured_header_and_windows_text() {
        let body = "detail ".repeat(400); // ~2800 chars of body text
        let html = format!(
            r#"<html><body>
                <h1 id="productTitle">Frost Free Refrigerator</h1>
                <span class="price">$19.99</span>
                <p>{body}</p>
            </body></html>"#
        );
        let chunks = scraper().full_from_html("https://shop.example/p/1", &html);
        assert!(chunks.len() >= 3);
        assert!(chunks[0].text.contains("TITLE: Frost Free Refrigerator"));
        assert!(chunks[0].text.contains("PRICE: $19.99"));
        for (idx, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence_no, idx);
            assert!(chunk.text.chars().count() <= CHUNK_MAX_CHARS);
            assert!(chunk.text.trim().chars().count() > CHUNK_NOISE_MIN_CHARS);
        }
    }

    #[test]
    fn full_mode_drops_noise_windows() {
        // 1005 chars total: second window is a 5-char tail.
        let text = "a".repeat(1005);
        let html = format!("<html><body><p>{text}</p></body></html>");
        let chunks = scraper().full_from_html("https://x", &html);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn full_mode_skips_script_and_style_text() {
        let html = r#"<html><body>
            <script>var secret = "do-not-index-this-script-content";</script>
            <style>.hidden { display: none; }</style>
            <p>Visible product copy that is long enough to keep around here.</p>
        </body></html>"#;
        let chunks = scraper().full_from_html("https://x", html);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].text.contains("do-not-index"));
        assert!(chunks[0].text.contains("Visible product copy"));
    }

    #[test]
    fn link_extraction_resolves_and_dedupes() {
        let base = Url::parse("https://shop.example/list").unwrap();
        let html = r#"
            <a href="/p/1">one</a>
            <a href="https://shop.example/p/2">two</a>
            <a href="/p/1">dup</a>
            <a href="javascript:void(0)">nope</a>
            <a href="mailto:x@y.z">nope</a>"#;
        let links = scraper().extract_links(&base, html);
        let rendered: Vec<String> = links.iter().map(|u| u.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "https://shop.example/p/1".to_string(),
                "https://shop.example/p/2".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn network_failure_carries_url_and_cause() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/p/404");
                then.status(404);
            })
            .await;

        let scraper = scraper();
        let err = scraper
            .scrape(&server.url("/p/404"), ScrapeMode::Full)
            .await
            .unwrap_err();
        assert!(err.url.contains("/p/404"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_then_full_extraction_end_to_end() {
        let server = httpmock::MockServer::start_async().await;
        let body = format!(
            "<html><body><h1>Gadget</h1><p>{}</p></body></html>",
            "useful text ".repeat(60)
        );
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/p/1");
                then.status(200)
                    .header("content-type", "text/html")
                    .body(&body);
            })
            .await;

        let chunks = scraper()
            .scrape(&server.url("/p/1"), ScrapeMode::Full)
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks[0].text.contains("Gadget"));
    }
}
