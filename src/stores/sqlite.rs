//! SQLite-backed vector store.
//!
//! Embeddings are stored as little-endian `f32` BLOBs alongside their payload
//! columns. Similarity is computed in Rust after a scope-filtered fetch, which
//! keeps the ordering contract (similarity descending, ties by insertion
//! order) and the defensive-normalization rule in one place. Upserts keep the
//! original rowid, so insertion order survives re-indexing of the same key.

use std::path::Path;

use async_trait::async_trait;
use tokio_rusqlite::{params, Connection};
use tracing::warn;

use super::{cosine_similarity, SearchHit, VectorBackend, VectorRecord};
use crate::types::{AssistError, EMBEDDING_DIM};

#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
    dim: usize,
}

impl SqliteVectorStore {
    /// Opens (and migrates) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AssistError> {
        let conn = Connection::open(path)
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))?;
        Self::with_connection(conn).await
    }

    /// Wraps an existing connection, creating the schema if needed.
    pub async fn with_connection(conn: Connection) -> Result<Self, AssistError> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS vectors (
                     key TEXT PRIMARY KEY,
                     url TEXT NOT NULL,
                     scope TEXT,
                     content TEXT,
                     embedding BLOB NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_vectors_scope ON vectors(scope);",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| AssistError::Storage(err.to_string()))?;
        Ok(Self {
            conn,
            dim: EMBEDDING_DIM,
        })
    }

    /// The underlying connection, shared with other stores on the same file.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn check_dim(&self, len: usize) -> Result<(), AssistError> {
        if len != self.dim {
            return Err(AssistError::DimensionMismatch {
                expected: self.dim,
                got: len,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for SqliteVectorStore {
    async fn put(&self, record: VectorRecord) -> Result<(), AssistError> {
        self.check_dim(record.embedding.len())?;
        let blob = encode_embedding(&record.embedding);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO vectors (key, url, scope, content, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(key) DO UPDATE SET
                         url = excluded.url,
                         scope = excluded.scope,
                         content = excluded.content,
                         embedding = excluded.embedding",
                    params![record.key, record.url, record.scope, record.content, blob],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<SearchHit>, AssistError> {
        self.check_dim(query_embedding.len())?;
        let query = query_embedding.to_vec();
        let scope = scope.map(str::to_string);
        let dim = self.dim;

        let mut hits = self
            .conn
            .call(move |conn| {
                // rowid order preserves first-insertion order across upserts,
                // which the stable sort below relies on for tie-breaking.
                let map_row = |row: &tokio_rusqlite::Row<'_>| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                };
                let mut raw = Vec::new();
                match &scope {
                    Some(value) => {
                        let mut stmt = conn
                            .prepare(
                                "SELECT url, content, embedding FROM vectors
                                 WHERE scope = ?1 ORDER BY rowid ASC",
                            )
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        let rows = stmt
                            .query_map([value], map_row)
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        for row in rows {
                            raw.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                        }
                    }
                    None => {
                        let mut stmt = conn
                            .prepare(
                                "SELECT url, content, embedding FROM vectors
                                 WHERE scope IS NULL ORDER BY rowid ASC",
                            )
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        let rows = stmt
                            .query_map([], map_row)
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        for row in rows {
                            raw.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                        }
                    }
                }

                let mut scored = Vec::new();
                for (url, content, blob) in raw {
                    let Some(embedding) = decode_embedding(&blob, dim) else {
                        warn!(url, "stored embedding has drifted dimension; skipping");
                        continue;
                    };
                    let similarity = cosine_similarity(&query, &embedding);
                    scored.push(SearchHit {
                        url,
                        content,
                        similarity,
                    });
                }
                Ok(scored)
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))?;

        // Stable: equal similarities keep fetch (insertion) order.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, scope: Option<&str>) -> Result<usize, AssistError> {
        let scope = scope.map(str::to_string);
        self.conn
            .call(move |conn| {
                let count: i64 = match &scope {
                    Some(value) => conn
                        .query_row(
                            "SELECT COUNT(*) FROM vectors WHERE scope = ?1",
                            [value],
                            |row| row.get(0),
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?,
                    None => conn
                        .query_row(
                            "SELECT COUNT(*) FROM vectors WHERE scope IS NULL",
                            [],
                            |row| row.get(0),
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?,
                };
                Ok(count as usize)
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8], dim: usize) -> Option<Vec<f32>> {
    if bytes.len() != dim * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
