//! Conversational shopping assistant backend.
//!
//! The pipeline behind a browser-extension shopping assistant: classify each
//! user query by intent and scope, gather grounding context for that scope
//! (scrape the current page, or search and index candidate product pages, or
//! replay the session transcript), and have an LLM compose the answer from
//! that context. State lives in one SQLite file holding both the embedding
//! index and session transcripts.
//!
//! Entry points:
//! - [`ask::Assistant`] runs one query end to end.
//! - [`ask::AppContext::from_settings`] wires everything from the
//!   environment.
//! - [`server::serve`] exposes the HTTP transport.

pub mod ask;
pub mod config;
pub mod embed;
pub mod intent;
pub mod llm;
pub mod prompts;
pub mod retrieve;
pub mod scrape;
pub mod search;
pub mod server;
pub mod session;
pub mod stores;
pub mod types;

pub use ask::{AppContext, Assistant, QueryRequest, QueryResponse, Reply};
pub use config::Settings;
pub use embed::{Embedder, EmbeddingProvider};
pub use intent::IntentClassifier;
pub use llm::ChatModel;
pub use retrieve::{CurrentPageRetriever, ProductSearch};
pub use scrape::{ScrapeMode, Scraper};
pub use search::SearchProvider;
pub use session::{SessionStore, SqliteSessionStore};
pub use stores::{SqliteVectorStore, VectorBackend};
pub use types::{
    AssistError, Chunk, Intent, IntentDecision, MessageType, RetrievalResult, Scope,
};
