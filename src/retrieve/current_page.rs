//! Current-page context retrieval.
//!
//! Primary path: scrape the page in full mode, index every chunk under the
//! page's partition, and similarity-search the query against that partition.
//! Many pages cannot be indexed in time or are blocked outright, so the
//! ladder degrades to best-available raw text before giving up: embedding
//! retrieval beats raw text for precision, but a degraded answer beats
//! failing the user interaction.

use std::sync::Arc;

use tracing::{info, warn};

use crate::embed::Embedder;
use crate::scrape::{ScrapeMode, Scraper};
use crate::stores::{page_scope, VectorBackend, VectorRecord};
use crate::types::{Chunk, RetrievalResult, ScoredChunk};

/// Results requested from a page-scoped similarity search.
pub const CURRENT_PAGE_TOP_K: usize = 5;

/// Leading windows kept on the degraded path, bounding prompt size.
pub const DEGRADED_MAX_SEGMENTS: usize = 5;

pub struct CurrentPageRetriever {
    scraper: Arc<Scraper>,
    embedder: Embedder,
    store: Arc<dyn VectorBackend>,
}

impl CurrentPageRetriever {
    pub fn new(scraper: Arc<Scraper>, embedder: Embedder, store: Arc<dyn VectorBackend>) -> Self {
        Self {
            scraper,
            embedder,
            store,
        }
    }

    /// Retrieves page context relevant to `query`.
    ///
    /// Strictly sequential: scrape, index, search; each failure drops to the
    /// degraded path rather than backtracking. Per-chunk embedding or storage
    /// failures are logged and skipped; partial indexing is acceptable.
    pub async fn retrieve(&self, url: &str, query: &str) -> RetrievalResult {
        let chunks = match self.scraper.scrape(url, ScrapeMode::Full).await {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) => {
                warn!(url, "page yielded no chunks; degrading");
                return self.degraded(url, None).await;
            }
            Err(err) => {
                warn!(url, %err, "scrape failed; degrading");
                return self.degraded(url, None).await;
            }
        };

        let scope = page_scope(url);
        let mut indexed = 0usize;
        for chunk in &chunks {
            let embedding = match self.embedder.embed(&chunk.text).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(url, sequence_no = chunk.sequence_no, %err, "skipping chunk");
                    continue;
                }
            };
            let record = VectorRecord::page_chunk(url, chunk.text.clone(), embedding);
            if let Err(err) = self.store.put(record).await {
                warn!(url, sequence_no = chunk.sequence_no, %err, "failed to index chunk");
            } else {
                indexed += 1;
            }
        }
        info!(url, total = chunks.len(), indexed, "page indexed");

        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(url, %err, "query embedding failed; degrading");
                return self.degraded(url, Some(chunks)).await;
            }
        };

        match self
            .store
            .search(&query_embedding, CURRENT_PAGE_TOP_K, Some(&scope))
            .await
        {
            Ok(hits) if !hits.is_empty() => RetrievalResult::Found(
                hits.into_iter()
                    .map(|hit| ScoredChunk {
                        text: hit.content.unwrap_or(hit.url),
                        similarity: hit.similarity,
                    })
                    .collect(),
            ),
            Ok(_) => {
                warn!(url, "similarity search empty; degrading");
                self.degraded(url, Some(chunks)).await
            }
            Err(err) => {
                warn!(url, %err, "similarity search failed; degrading");
                self.degraded(url, Some(chunks)).await
            }
        }
    }

    /// Degraded path: best-available raw text, vector store bypassed.
    ///
    /// Chunks already scraped this request are reused; otherwise one fresh
    /// summary-mode scrape is attempted. Only when even that yields nothing
    /// does the ladder end in `Unavailable`.
    async fn degraded(&self, url: &str, scraped: Option<Vec<Chunk>>) -> RetrievalResult {
        if let Some(chunks) = scraped {
            if !chunks.is_empty() {
                let text = chunks
                    .iter()
                    .take(DEGRADED_MAX_SEGMENTS)
                    .map(|chunk| chunk.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                return RetrievalResult::Degraded(text);
            }
        }

        match self.scraper.scrape(url, ScrapeMode::Summary).await {
            Ok(chunks) if !chunks.is_empty() => RetrievalResult::Degraded(
                chunks
                    .into_iter()
                    .take(DEGRADED_MAX_SEGMENTS)
                    .map(|chunk| chunk.text)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Ok(_) => RetrievalResult::Unavailable,
            Err(err) => {
                warn!(url, %err, "degraded scrape failed as well");
                RetrievalResult::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbeddingProvider;
    use crate::scrape::FieldRegistry;
    use crate::stores::SqliteVectorStore;
    use httpmock::{Method::GET, MockServer};
    use tempfile::tempdir;

    async fn retriever() -> (CurrentPageRetriever, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteVectorStore::open(dir.path().join("vectors.db"))
            .await
            .unwrap();
        let retriever = CurrentPageRetriever::new(
            Arc::new(Scraper::new(reqwest::Client::new(), FieldRegistry::default())),
            Embedder::new(Arc::new(MockEmbeddingProvider::new())),
            Arc::new(store),
        );
        (retriever, dir)
    }

    /// Three ~1000-char windows, each dominated by a distinct token, so the
    /// bag-of-words mock ranks the middle window closest to a "zephyr" query.
    fn three_topic_page() -> String {
        let para1 = "alpine ".repeat(140);
        let para2 = "zephyr ".repeat(140);
        let para3 = "onyx ".repeat(190);
        format!("<html><body><p>{para1}</p><p>{para2}</p><p>{para3}</p></body></html>")
    }

    #[tokio::test]
    async fn most_similar_chunk_ranks_first() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/p/1");
                then.status(200).body(three_topic_page());
            })
            .await;

        let (retriever, _dir) = retriever().await;
        let result = retriever
            .retrieve(&server.url("/p/1"), "tell me about the zephyr")
            .await;

        match result {
            RetrievalResult::Found(chunks) => {
                assert!(!chunks.is_empty());
                assert!(
                    chunks[0].text.contains("zephyr"),
                    "expected zephyr window first, got: {}…",
                    &chunks[0].text[..40]
                );
                for pair in chunks.windows(2) {
                    assert!(pair[0].similarity >= pair[1].similarity);
                }
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_page_degrades_through_summary_to_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/p/empty");
                then.status(200).body("<html><body></body></html>");
            })
            .await;

        let (retriever, _dir) = retriever().await;
        let result = retriever.retrieve(&server.url("/p/empty"), "anything").await;
        assert_eq!(result, RetrievalResult::Unavailable);
    }

    #[tokio::test]
    async fn blocked_page_falls_back_to_unavailable_not_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/p/blocked");
                then.status(403);
            })
            .await;

        let (retriever, _dir) = retriever().await;
        let result = retriever
            .retrieve(&server.url("/p/blocked"), "anything")
            .await;
        assert_eq!(result, RetrievalResult::Unavailable);
    }

    #[tokio::test]
    async fn degraded_text_is_bounded() {
        // Ten windows of content; degraded path must keep at most five.
        let server = MockServer::start_async().await;
        let body = format!(
            "<html><body><p>{}</p></body></html>",
            "filler ".repeat(1450)
        );
        server
            .mock_async(|when, then| {
                when.method(GET).path("/p/long");
                then.status(200).body(body);
            })
            .await;

        let dir = tempdir().unwrap();
        let store = SqliteVectorStore::open(dir.path().join("vectors.db"))
            .await
            .unwrap();
        // Embedder whose provider emits the wrong dimension: indexing and the
        // query embedding both fail, forcing the degraded path with chunks.
        let retriever = CurrentPageRetriever::new(
            Arc::new(Scraper::new(reqwest::Client::new(), FieldRegistry::default())),
            Embedder::new(Arc::new(MockEmbeddingProvider::with_dim(7))),
            Arc::new(store),
        );

        match retriever.retrieve(&server.url("/p/long"), "anything").await {
            RetrievalResult::Degraded(text) => {
                let max = DEGRADED_MAX_SEGMENTS * 1000 + DEGRADED_MAX_SEGMENTS;
                assert!(text.len() <= max, "degraded text too long: {}", text.len());
            }
            other => panic!("expected Degraded, got {other:?}"),
        }
    }
}
