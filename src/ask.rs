//! Query orchestration.
//!
//! One entry point, [`Assistant::answer`], runs the whole pipeline: classify
//! the query (unless the caller pinned a scope), dispatch to the answering
//! path the decision selects, ground the final LLM call in whatever context
//! that path produced, and persist both turns to the session transcript. The
//! orchestrator never surfaces pipeline failures to the user as errors; every
//! internal failure becomes a friendly canned answer, and only invalid
//! requests (empty query, unknown session) err.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::embed::{Embedder, HttpEmbedder};
use crate::intent::IntentClassifier;
use crate::llm::{ChatModel, OpenAiChat};
use crate::prompts;
use crate::retrieve::{CurrentPageRetriever, ProductSearch, SitePatterns};
use crate::scrape::{is_fetchable, Scraper};
use crate::search::SearxProvider;
use crate::session::{SessionStore, SqliteSessionStore};
use crate::stores::SqliteVectorStore;
use crate::types::{
    AssistError, ChatTurn, Intent, IntentDecision, MessageType, RetrievalResult, Scope,
};

/// Shown when the current page is a browser-internal or otherwise
/// non-fetchable URL.
pub const NON_SCRAPABLE_ANSWER: &str =
    "I can't read this page, but I'm happy to help once you're on a product or shop page.";

/// Shown when a current-page question arrives without any page URL.
pub const NO_PAGE_ANSWER: &str =
    "I don't know which page you're looking at right now. Could you open the product page \
     and ask again?";

/// Shown when nothing at all could be extracted from the page.
pub const EXTRACTION_FAILED_ANSWER: &str =
    "I couldn't extract information from this page. It may be blocking automated access; \
     try asking in your own words and I'll do my best.";

/// Shown when the answering model itself fails.
pub const LLM_FAILURE_ANSWER: &str =
    "Something went wrong while putting your answer together. Please try again in a moment.";

/// Shown for action requests, which this assistant does not perform.
pub const ACTION_UNSUPPORTED_MESSAGE: &str =
    "I can't take actions like adding to cart or placing orders yet, but I can answer \
     questions about products and pages.";

/// Shown for account-data scopes with no backing integration.
pub const SCOPE_UNSUPPORTED_MESSAGE: &str =
    "I don't have access to your cart, orders, wishlist, or account details. I can help \
     with the page you're viewing or with finding products.";

/// Shown when the query was too vague to classify.
pub const UNCLEAR_MESSAGE: &str =
    "I'm not sure what you're asking for. Could you rephrase, or tell me which product \
     you mean?";

#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub user_query: String,
    /// Shop domain, used to restrict product search.
    pub domain: Option<String>,
    /// URL of the page the user is currently viewing. Absent, the session's
    /// last known page is used instead.
    pub current_page_url: Option<String>,
    /// When set, classification is skipped and this scope is answered
    /// directly as an `ask`.
    pub scope: Option<Scope>,
    /// When present, history is loaded from this session and both turns of
    /// the exchange are appended to it.
    pub session_id: Option<String>,
    /// Pre-rendered transcript supplied inline by sessionless callers.
    pub chat_history: Option<String>,
}

/// What the pipeline produced: a grounded answer, or a message explaining
/// that the request kind is not supported. The distinction matters to the
/// transport, which reports them under different keys.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Answer(String),
    Unsupported(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) | Self::Unsupported(text) => text,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueryResponse {
    pub reply: Reply,
    pub decision: IntentDecision,
}

pub struct Assistant {
    chat: Arc<dyn ChatModel>,
    classifier: IntentClassifier,
    retriever: CurrentPageRetriever,
    products: ProductSearch,
    sessions: Arc<dyn SessionStore>,
}

impl Assistant {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        retriever: CurrentPageRetriever,
        products: ProductSearch,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(chat.clone()),
            chat,
            retriever,
            products,
            sessions,
        }
    }

    /// Answers one user query end to end.
    pub async fn answer(
        &self,
        user_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse, AssistError> {
        if request.user_query.trim().is_empty() {
            return Err(AssistError::InvalidInput("query must not be empty".to_string()));
        }

        // History comes from the session when there is one; an unknown
        // session is the caller's mistake and the only pipeline error that
        // propagates. Sessionless callers may supply a transcript inline.
        let session = match &request.session_id {
            Some(session_id) => Some(self.sessions.get_session(session_id, user_id).await?),
            None => None,
        };
        let history = match &session {
            Some(details) => details.chat_messages.clone(),
            None => match &request.chat_history {
                Some(text) if !text.trim().is_empty() => vec![ChatTurn {
                    message: text.clone(),
                    message_type: MessageType::System,
                    detected_intent: None,
                    created_at: Utc::now(),
                }],
                _ => Vec::new(),
            },
        };

        // The session tracks the page the user is browsing: a request that
        // names a different URL repoints it, and a request that names none
        // falls back to the session's last known page.
        if let (Some(session_id), Some(url)) =
            (&request.session_id, request.current_page_url.as_deref())
        {
            let known = session
                .as_ref()
                .and_then(|details| details.current_url.as_deref());
            if known != Some(url) {
                if let Err(err) = self
                    .sessions
                    .update_current_page(session_id, Some(url), request.domain.as_deref())
                    .await
                {
                    warn!(session_id, %err, "failed to repoint session page");
                }
            }
        }
        let page_url = request
            .current_page_url
            .clone()
            .or_else(|| session.as_ref().and_then(|details| details.current_url.clone()));

        let decision = match request.scope {
            Some(scope) => IntentDecision {
                intent: Intent::Ask,
                scope,
                forwarded_message: request.user_query.clone(),
                confidence: None,
            },
            None => {
                self.classifier
                    .classify(&request.user_query, &history)
                    .await
            }
        };
        let reply = self
            .dispatch(request, page_url.as_deref(), &decision, &history)
            .await;

        if let Some(session_id) = &request.session_id {
            self.record_exchange(session_id, &request.user_query, reply.text(), &decision)
                .await;
        }

        info!(
            intent = %decision.intent,
            scope = %decision.scope,
            "query answered"
        );
        Ok(QueryResponse { reply, decision })
    }

    async fn dispatch(
        &self,
        request: &QueryRequest,
        page_url: Option<&str>,
        decision: &IntentDecision,
        history: &[ChatTurn],
    ) -> Reply {
        match (decision.intent, decision.scope) {
            (Intent::Ask, Scope::CurrentPage) => Reply::Answer(
                self.answer_current_page(page_url, &decision.forwarded_message)
                    .await,
            ),
            (Intent::Ask, Scope::Product) => Reply::Answer(
                self.answer_product(request.domain.as_deref(), &decision.forwarded_message)
                    .await,
            ),
            (Intent::Ask, Scope::ChatHistory) => Reply::Answer(
                self.answer_chat_history(history, &decision.forwarded_message)
                    .await,
            ),
            (Intent::Ask, Scope::Cart | Scope::Order | Scope::Wishlist | Scope::Account) => {
                Reply::Unsupported(SCOPE_UNSUPPORTED_MESSAGE.to_string())
            }
            (Intent::Todo, _) => Reply::Unsupported(ACTION_UNSUPPORTED_MESSAGE.to_string()),
            _ => Reply::Unsupported(UNCLEAR_MESSAGE.to_string()),
        }
    }

    async fn answer_current_page(&self, page_url: Option<&str>, query: &str) -> String {
        let Some(url) = page_url else {
            return NO_PAGE_ANSWER.to_string();
        };
        if !is_fetchable(url) {
            return NON_SCRAPABLE_ANSWER.to_string();
        }

        let context = match self.retriever.retrieve(url, query).await {
            RetrievalResult::Found(chunks) => chunks
                .into_iter()
                .map(|chunk| chunk.text)
                .collect::<Vec<_>>()
                .join("\n\n"),
            RetrievalResult::Degraded(text) => text,
            RetrievalResult::Unavailable => return EXTRACTION_FAILED_ANSWER.to_string(),
        };

        self.complete_or_apologize(&prompts::current_page(&context), query)
            .await
    }

    async fn answer_product(&self, domain: Option<&str>, query: &str) -> String {
        let mut urls: Vec<String> = self
            .products
            .recommend(domain, query)
            .await
            .into_iter()
            .collect();
        urls.sort();
        self.complete_or_apologize(&prompts::product_recommendation(query, &urls), query)
            .await
    }

    async fn answer_chat_history(&self, history: &[ChatTurn], query: &str) -> String {
        self.complete_or_apologize(&prompts::chat_history(history), query)
            .await
    }

    async fn complete_or_apologize(&self, system: &str, user: &str) -> String {
        match self.chat.complete(system, user).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(%err, "answer completion failed");
                LLM_FAILURE_ANSWER.to_string()
            }
        }
    }

    /// Transcript writes are best-effort; a persistence failure must not undo
    /// an answer already produced.
    async fn record_exchange(
        &self,
        session_id: &str,
        query: &str,
        answer: &str,
        decision: &IntentDecision,
    ) {
        let label = format!("{}/{}", decision.intent, decision.scope);
        if let Err(err) = self
            .sessions
            .append_message(session_id, query, MessageType::User, Some(&label))
            .await
        {
            warn!(session_id, %err, "failed to persist user turn");
        }
        if let Err(err) = self
            .sessions
            .append_message(session_id, answer, MessageType::Assistant, None)
            .await
        {
            warn!(session_id, %err, "failed to persist assistant turn");
        }
    }
}

/// Fully wired application state: the assistant plus the session store the
/// transport needs directly.
pub struct AppContext {
    pub assistant: Arc<Assistant>,
    pub sessions: Arc<dyn SessionStore>,
}

impl AppContext {
    /// Builds every component from [`Settings`]. The vector store and session
    /// tables share one SQLite connection.
    pub async fn from_settings(settings: &Settings) -> Result<Self, AssistError> {
        let scraper = Arc::new(
            Scraper::with_timeout(settings.scrape_timeout)
                .map_err(|err| AssistError::Storage(err.to_string()))?,
        );
        let embedder = Embedder::new(Arc::new(HttpEmbedder::new(
            &settings.embedding_base_url,
            settings.embedding_model.clone(),
            &settings.embedding_api_key,
            settings.llm_timeout,
        )?));
        let vectors = SqliteVectorStore::open(&settings.database_path).await?;
        let sessions: Arc<dyn SessionStore> = Arc::new(
            SqliteSessionStore::with_connection(vectors.connection().clone()).await?,
        );
        let vectors = Arc::new(vectors);
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(
            &settings.llm_base_url,
            settings.llm_model.clone(),
            &settings.llm_api_key,
            settings.llm_timeout,
        )?);
        let provider = Arc::new(SearxProvider::new(
            settings.search_base_url.clone(),
            settings.scrape_timeout,
        )?);

        let retriever =
            CurrentPageRetriever::new(scraper.clone(), embedder.clone(), vectors.clone());
        let products = ProductSearch::new(
            scraper,
            embedder,
            vectors,
            provider,
            SitePatterns::default(),
        );

        Ok(Self {
            assistant: Arc::new(Assistant::new(chat, retriever, products, sessions.clone())),
            sessions,
        })
    }
}
