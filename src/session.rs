//! Session and transcript persistence.
//!
//! A session pins a user to the page they are browsing; its transcript is an
//! append-only list of turns ordered by insertion. Sessions live in the same
//! SQLite file as the vector store so one `SHOPSIGHT_DB` path carries all
//! state.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{AssistError, ChatTurn, MessageType};

/// Stored `detected_intent` labels are truncated to this length.
pub const DETECTED_INTENT_MAX_CHARS: usize = 100;

/// A session row plus its transcript, oldest turn first.
#[derive(Clone, Debug)]
pub struct SessionDetails {
    pub session_id: String,
    pub user_id: String,
    pub current_url: Option<String>,
    pub current_domain: Option<String>,
    pub chat_messages: Vec<ChatTurn>,
}

/// A session row without its transcript, for listings.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub session_id: String,
    pub current_url: Option<String>,
    pub current_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session for `user_id` and returns its id.
    async fn create_session(
        &self,
        user_id: &str,
        current_url: Option<&str>,
        current_domain: Option<&str>,
    ) -> Result<String, AssistError>;

    /// Loads a session and its full transcript. A missing session, or one
    /// owned by a different user, is [`AssistError::SessionNotFound`].
    async fn get_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionDetails, AssistError>;

    /// All of one user's sessions, most recently touched first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, AssistError>;

    /// Appends one turn to the transcript.
    async fn append_message(
        &self,
        session_id: &str,
        message: &str,
        message_type: MessageType,
        detected_intent: Option<&str>,
    ) -> Result<(), AssistError>;

    /// Repoints the session at a new page.
    async fn update_current_page(
        &self,
        session_id: &str,
        current_url: Option<&str>,
        current_domain: Option<&str>,
    ) -> Result<(), AssistError>;
}

#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
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
                "CREATE TABLE IF NOT EXISTS chat_sessions (
                     id TEXT PRIMARY KEY,
                     user_id TEXT NOT NULL,
                     current_url TEXT,
                     current_domain TEXT,
                     created_at TEXT NOT NULL,
                     updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS chat_messages (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     session_id TEXT NOT NULL REFERENCES chat_sessions(id),
                     message TEXT NOT NULL,
                     message_type TEXT NOT NULL,
                     detected_intent TEXT,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_chat_messages_session
                     ON chat_messages(session_id);",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| AssistError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(
        &self,
        user_id: &str,
        current_url: Option<&str>,
        current_domain: Option<&str>,
    ) -> Result<String, AssistError> {
        let session_id = Uuid::new_v4().to_string();
        let id = session_id.clone();
        let user_id = user_id.to_string();
        let current_url = current_url.map(str::to_string);
        let current_domain = current_domain.map(str::to_string);
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO chat_sessions
                         (id, user_id, current_url, current_domain, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![id, user_id, current_url, current_domain, now],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))?;
        debug!(session_id, "session created");
        Ok(session_id)
    }

    async fn get_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionDetails, AssistError> {
        let id = session_id.to_string();
        let user = user_id.to_string();

        let row = self
            .conn
            .call(move |conn| {
                let session = conn
                    .query_row(
                        "SELECT current_url, current_domain FROM chat_sessions
                         WHERE id = ?1 AND user_id = ?2",
                        params![id, user],
                        |row| {
                            Ok((
                                row.get::<_, Option<String>>(0)?,
                                row.get::<_, Option<String>>(1)?,
                            ))
                        },
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let Some((current_url, current_domain)) = session else {
                    return Ok(None);
                };

                let mut stmt = conn
                    .prepare(
                        "SELECT message, message_type, detected_intent, created_at
                         FROM chat_messages WHERE session_id = ?1 ORDER BY id ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut messages = Vec::new();
                for row in rows {
                    messages.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(Some((current_url, current_domain, messages)))
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))?;

        let Some((current_url, current_domain, raw_messages)) = row else {
            return Err(AssistError::SessionNotFound(session_id.to_string()));
        };

        let mut chat_messages = Vec::with_capacity(raw_messages.len());
        for (message, message_type, detected_intent, created_at) in raw_messages {
            let message_type = message_type
                .parse::<MessageType>()
                .map_err(|err| AssistError::Storage(err.to_string()))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|err| AssistError::Storage(err.to_string()))?
                .with_timezone(&Utc);
            chat_messages.push(ChatTurn {
                message,
                message_type,
                detected_intent,
                created_at,
            });
        }

        Ok(SessionDetails {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            current_url,
            current_domain,
            chat_messages,
        })
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, AssistError> {
        let user = user_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, current_url, current_domain, created_at, updated_at
                         FROM chat_sessions WHERE user_id = ?1
                         ORDER BY updated_at DESC, rowid DESC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&user], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut summaries = Vec::new();
                for row in rows {
                    summaries.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(summaries)
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (session_id, current_url, current_domain, created_at, updated_at) in rows {
            let parse = |raw: &str| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|stamp| stamp.with_timezone(&Utc))
                    .map_err(|err| AssistError::Storage(err.to_string()))
            };
            summaries.push(SessionSummary {
                session_id,
                current_url,
                current_domain,
                created_at: parse(&created_at)?,
                updated_at: parse(&updated_at)?,
            });
        }
        Ok(summaries)
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &str,
        message_type: MessageType,
        detected_intent: Option<&str>,
    ) -> Result<(), AssistError> {
        let id = session_id.to_string();
        let message = message.to_string();
        let message_type = message_type.as_str().to_string();
        let detected_intent = detected_intent.map(|label| {
            if label.chars().count() > DETECTED_INTENT_MAX_CHARS {
                warn!(session_id, "detected_intent label truncated");
                label.chars().take(DETECTED_INTENT_MAX_CHARS).collect()
            } else {
                label.to_string()
            }
        });
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM chat_sessions WHERE id = ?1",
                        [&id],
                        |_| Ok(()),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?
                    .is_some();
                if !exists {
                    return Ok(false);
                }
                conn.execute(
                    "INSERT INTO chat_messages
                         (session_id, message, message_type, detected_intent, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, message, message_type, detected_intent, now],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute(
                    "UPDATE chat_sessions SET updated_at = ?2 WHERE id = ?1",
                    params![id, now],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(true)
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))?;

        if inserted {
            Ok(())
        } else {
            Err(AssistError::SessionNotFound(session_id.to_string()))
        }
    }

    async fn update_current_page(
        &self,
        session_id: &str,
        current_url: Option<&str>,
        current_domain: Option<&str>,
    ) -> Result<(), AssistError> {
        let id = session_id.to_string();
        let current_url = current_url.map(str::to_string);
        let current_domain = current_domain.map(str::to_string);
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn
            .call(move |conn| {
                let count = conn
                    .execute(
                        "UPDATE chat_sessions
                         SET current_url = ?2, current_domain = ?3, updated_at = ?4
                         WHERE id = ?1",
                        params![id, current_url, current_domain, now],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count > 0)
            })
            .await
            .map_err(|err| AssistError::Storage(err.to_string()))?;

        if updated {
            Ok(())
        } else {
            Err(AssistError::SessionNotFound(session_id.to_string()))
        }
    }
}
