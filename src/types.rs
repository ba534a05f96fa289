//! Core domain types shared across the retrieval pipeline.
//!
//! The types here define the data shapes the scraper, embedder, vector store,
//! and orchestrator must agree on: the unit of retrieval ([`Chunk`]), the
//! tagged retrieval outcome ([`RetrievalResult`]), the intent-classification
//! contract ([`IntentDecision`]), and the crate-wide error taxonomy
//! ([`AssistError`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Embedding dimension of the configured model. Mismatches anywhere in the
/// pipeline are contract violations, not user-facing errors.
pub const EMBEDDING_DIM: usize = 384;

/// Upper bound for a single chunk of page text, shared with the embedder's
/// truncation threshold.
pub const CHUNK_MAX_CHARS: usize = 1000;

/// Full-mode windows whose trimmed length is at or below this are noise.
pub const CHUNK_NOISE_MIN_CHARS: usize = 20;

/// A bounded span of text extracted from one page; the unit of embedding and
/// retrieval. Never mutated after creation; re-scraping a URL supersedes
/// (does not merge with) earlier chunks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_url: String,
    pub text: String,
    /// Order within the page. Irrelevant for ranking, used for fallback
    /// assembly when similarity search yields nothing.
    pub sequence_no: usize,
}

impl Chunk {
    pub fn new(source_url: impl Into<String>, text: impl Into<String>, sequence_no: usize) -> Self {
        Self {
            source_url: source_url.into(),
            text: text.into(),
            sequence_no,
        }
    }
}

/// A retrieved chunk paired with its cosine similarity to the query.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub similarity: f32,
}

/// Tagged outcome of a context-retrieval attempt.
///
/// Consumers branch on the variant instead of inspecting runtime shapes:
/// `Found` carries similarity-ranked chunks, `Degraded` carries best-available
/// raw page text (similarity search was bypassed or empty), and `Unavailable`
/// means no content could be extracted at all.
#[derive(Clone, Debug, PartialEq)]
pub enum RetrievalResult {
    Found(Vec<ScoredChunk>),
    Degraded(String),
    Unavailable,
}

impl RetrievalResult {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// What the user wants to do, per the classifier contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Ask,
    Todo,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Todo => "todo",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for Intent {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ask" => Ok(Self::Ask),
            "todo" => Ok(Self::Todo),
            "unknown" => Ok(Self::Unknown),
            other => Err(ContractViolation::new(format!(
                "intent '{other}' outside classifier contract"
            ))),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which information domain a query targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    CurrentPage,
    Product,
    ChatHistory,
    Cart,
    Order,
    Wishlist,
    Account,
    Unknown,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentPage => "current_page",
            Self::Product => "product",
            Self::ChatHistory => "chat_history",
            Self::Cart => "cart",
            Self::Order => "order",
            Self::Wishlist => "wishlist",
            Self::Account => "account",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for Scope {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current_page" => Ok(Self::CurrentPage),
            "product" => Ok(Self::Product),
            "chat_history" => Ok(Self::ChatHistory),
            "cart" => Ok(Self::Cart),
            "order" => Ok(Self::Order),
            "wishlist" => Ok(Self::Wishlist),
            "account" => Ok(Self::Account),
            "unknown" => Ok(Self::Unknown),
            other => Err(ContractViolation::new(format!(
                "scope '{other}' outside classifier contract"
            ))),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured decision produced once per query by the intent classifier and
/// consumed once by the orchestrator. Logged, never persisted as state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub intent: Intent,
    pub scope: Scope,
    /// Message forwarded to the downstream answering agent.
    pub forwarded_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl IntentDecision {
    /// Decision used when the classifier emits values outside its contract.
    pub fn unknown(forwarded_message: impl Into<String>) -> Self {
        Self {
            intent: Intent::Unknown,
            scope: Scope::Unknown,
            forwarded_message: forwarded_message.into(),
            confidence: None,
        }
    }

    /// Safest default when classification itself fails: the current page
    /// never requires a prior search and always has some grounding available.
    pub fn fallback_current_page(forwarded_message: impl Into<String>) -> Self {
        Self {
            intent: Intent::Ask,
            scope: Scope::CurrentPage,
            forwarded_message: forwarded_message.into(),
            confidence: None,
        }
    }
}

/// Author of a chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(ContractViolation::new(format!(
                "message type '{other}' is not user/assistant/system"
            ))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable turn of a session transcript, ordered by creation time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTurn {
    pub message: String,
    pub message_type: MessageType,
    pub detected_intent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A value crossed a component boundary in a shape the contract forbids.
/// These indicate bugs, not transient external failures.
#[derive(Debug, Clone, thiserror::Error)]
#[error("contract violation: {message}")]
pub struct ContractViolation {
    pub message: String,
}

impl ContractViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A page fetch failed in a way the caller may want to fall back from.
#[derive(Debug, Clone, thiserror::Error)]
#[error("scrape of {url} failed: {cause}")]
pub struct ScrapeError {
    pub url: String,
    pub cause: String,
}

impl ScrapeError {
    pub fn new(url: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cause: cause.into(),
        }
    }
}

/// Crate-wide error taxonomy.
///
/// Expected degradation (blocked scrape, empty provider result) is not an
/// error here: those travel through [`RetrievalResult`] and empty collections.
#[derive(Debug, thiserror::Error)]
pub enum AssistError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot embed empty input")]
    EmptyInput,

    #[error("vector store failure: {0}")]
    Storage(String),

    #[error("llm call failed: {0}")]
    Llm(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
