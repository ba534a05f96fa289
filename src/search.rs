//! External web-search provider interface.
//!
//! Product search only needs "give me candidate URLs for this query"; the
//! provider is best-effort and may legitimately return nothing. The concrete
//! implementation talks to a SearXNG-style metasearch endpoint with a JSON
//! format, restricted per-domain with a `site:` query prefix.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::types::AssistError;

/// One candidate result from the provider.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchResult {
    pub url: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Free-text search, optionally restricted to one site's domain.
    async fn text_search(
        &self,
        query: &str,
        site: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, AssistError>;
}

/// SearXNG JSON API client (`GET {base}/search?q=…&format=json`).
pub struct SearxProvider {
    client: Client,
    base_url: String,
}

impl SearxProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AssistError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AssistError::Storage(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[async_trait]
impl SearchProvider for SearxProvider {
    async fn text_search(
        &self,
        query: &str,
        site: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, AssistError> {
        let effective = match site {
            Some(site) if !site.trim().is_empty() => format!("site:{site} {query}"),
            _ => query.to_string(),
        };
        let endpoint = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&endpoint)
            .query(&[("q", effective.as_str()), ("format", "json")])
            .send()
            .await
            .map_err(|err| AssistError::Storage(format!("search provider: {err}")))?
            .error_for_status()
            .map_err(|err| AssistError::Storage(format!("search provider: {err}")))?;

        let parsed: SearxResponse = response
            .json()
            .await
            .map_err(|err| AssistError::Storage(format!("search provider: {err}")))?;

        let mut results = parsed.results;
        results.truncate(max_results);
        debug!(query = effective, count = results.len(), "search provider results");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    #[tokio::test]
    async fn site_restriction_is_prefixed_and_results_capped() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("q", "site:shop.example blue jeans")
                    .query_param("format", "json");
                then.status(200).json_body(serde_json::json!({
                    "results": [
                        {"url": "https://shop.example/p/1"},
                        {"url": "https://shop.example/p/2"},
                        {"url": "https://shop.example/p/3"}
                    ]
                }));
            })
            .await;

        let provider = SearxProvider::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let results = provider
            .text_search("blue jeans", Some("shop.example"), 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://shop.example/p/1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn zero_results_is_not_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/search");
                then.status(200).json_body(serde_json::json!({"results": []}));
            })
            .await;

        let provider = SearxProvider::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let results = provider.text_search("anything", None, 10).await.unwrap();
        assert!(results.is_empty());
    }
}
