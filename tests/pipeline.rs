//! End-to-end pipeline tests: real SQLite state, mocked web pages and search
//! results, a scripted chat model.

use std::sync::Arc;

use async_trait::async_trait;
use httpmock::{Method::GET, MockServer};
use tempfile::tempdir;

use shopsight::ask::{AppContext, Assistant, QueryRequest};
use shopsight::embed::{Embedder, MockEmbeddingProvider};
use shopsight::llm::ChatModel;
use shopsight::retrieve::{CurrentPageRetriever, ProductSearch, SitePatterns};
use shopsight::scrape::{FieldRegistry, Scraper};
use shopsight::search::{SearchProvider, SearchResult};
use shopsight::session::{SessionStore, SqliteSessionStore};
use shopsight::stores::{page_scope, SqliteVectorStore, VectorBackend};
use shopsight::types::AssistError;

/// Chat double: fixed JSON for the classifier call, echoed prompt for the
/// answering call, so assertions can see exactly what context was packed.
struct ScriptedChat {
    decision: serde_json::Value,
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AssistError> {
        Ok(format!("{system}\n---\n{user}"))
    }

    async fn complete_json(
        &self,
        _system: &str,
        _user: &str,
    ) -> Result<serde_json::Value, AssistError> {
        Ok(self.decision.clone())
    }
}

struct StaticSearch(Vec<String>);

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn text_search(
        &self,
        _query: &str,
        _site: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, AssistError> {
        Ok(self
            .0
            .iter()
            .take(max_results)
            .map(|url| SearchResult { url: url.clone() })
            .collect())
    }
}

struct Harness {
    assistant: Assistant,
    vectors: Arc<SqliteVectorStore>,
    sessions: Arc<dyn SessionStore>,
    _dir: tempfile::TempDir,
}

async fn harness(decision: serde_json::Value, search_results: Vec<String>) -> Harness {
    let dir = tempdir().unwrap();
    let vectors = SqliteVectorStore::open(dir.path().join("state.db"))
        .await
        .unwrap();
    let sessions: Arc<dyn SessionStore> = Arc::new(
        SqliteSessionStore::with_connection(vectors.connection().clone())
            .await
            .unwrap(),
    );
    let vectors = Arc::new(vectors);
    let scraper = Arc::new(Scraper::new(reqwest::Client::new(), FieldRegistry::default()));
    let embedder = Embedder::new(Arc::new(MockEmbeddingProvider::new()));
    let chat: Arc<dyn ChatModel> = Arc::new(ScriptedChat { decision });

    let retriever = CurrentPageRetriever::new(scraper.clone(), embedder.clone(), vectors.clone());
    let products = ProductSearch::new(
        scraper,
        embedder,
        vectors.clone(),
        Arc::new(StaticSearch(search_results)),
        SitePatterns::default(),
    );
    Harness {
        assistant: Assistant::new(chat, retriever, products, sessions.clone()),
        vectors,
        sessions,
        _dir: dir,
    }
}

fn product_page(title: &str, price: &str, copy: &str) -> String {
    format!(
        r#"<html><body>
            <h1 id="productTitle">{title}</h1>
            <span class="price">{price}</span>
            <p>{}</p>
        </body></html>"#,
        format!("{copy} ").repeat(12)
    )
}

#[tokio::test]
async fn price_question_is_answered_from_the_current_page() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/p/fridge");
            then.status(200).body(product_page(
                "Frost Free Refrigerator",
                "$19.99",
                "Double door refrigerator with quiet compressor and ample storage.",
            ));
        })
        .await;

    let harness = harness(
        serde_json::json!({
            "intent": "ask",
            "scope": "current_page",
            "message_forward": "what is the price of this refrigerator?"
        }),
        Vec::new(),
    )
    .await;

    let url = server.url("/p/fridge");
    let request = QueryRequest {
        user_query: "how much does this cost?".to_string(),
        domain: None,
        current_page_url: Some(url.clone()),
        scope: None,
        session_id: None,
        chat_history: None,
    };
    let response = harness.assistant.answer("user-1", &request).await.unwrap();
    let answer = response.reply.text();
    assert!(answer.contains("19.99"), "answer: {answer}");

    // Asking again re-scrapes the same content; content-addressed keys keep
    // the page partition from growing.
    let before = harness
        .vectors
        .count(Some(&page_scope(&url)))
        .await
        .unwrap();
    harness.assistant.answer("user-1", &request).await.unwrap();
    let after = harness
        .vectors
        .count(Some(&page_scope(&url)))
        .await
        .unwrap();
    assert_eq!(before, after);
    assert!(before >= 1);
}

#[tokio::test]
async fn product_search_indexes_candidates_and_recommends_the_match() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/p/jeans");
            then.status(200).body(product_page(
                "Slim Fit Blue Denim Jeans",
                "$39.00",
                "Classic blue denim jeans with a slim fit and stretch fabric.",
            ));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/p/fridge");
            then.status(200).body(product_page(
                "Frost Free Refrigerator",
                "$19.99",
                "Double door refrigerator with quiet compressor and ample storage.",
            ));
        })
        .await;

    let jeans_url = server.url("/p/jeans");
    let fridge_url = server.url("/p/fridge");
    let harness = harness(
        serde_json::json!({
            "intent": "ask",
            "scope": "product",
            "message_forward": "blue denim jeans with slim fit"
        }),
        vec![jeans_url.clone(), fridge_url.clone()],
    )
    .await;

    let request = QueryRequest {
        user_query: "find me blue jeans".to_string(),
        domain: None,
        current_page_url: None,
        scope: None,
        session_id: None,
        chat_history: None,
    };
    let response = harness.assistant.answer("user-1", &request).await.unwrap();
    let answer = response.reply.text();
    assert!(
        answer.contains(&jeans_url),
        "answer should list {jeans_url}: {answer}"
    );

    // Both candidates were indexed as document records; the index is shared
    // across queries and sessions.
    assert_eq!(harness.vectors.count(None).await.unwrap(), 2);
}

#[tokio::test]
async fn chat_history_answers_come_from_the_transcript_alone() {
    let harness = harness(
        serde_json::json!({
            "intent": "ask",
            "scope": "chat_history",
            "message_forward": "which fridge did you mention?"
        }),
        Vec::new(),
    )
    .await;

    let session_id = harness
        .sessions
        .create_session("user-1", None, None)
        .await
        .unwrap();
    harness
        .sessions
        .append_message(
            &session_id,
            "The Frost Free Refrigerator costs $19.99.",
            shopsight::types::MessageType::Assistant,
            None,
        )
        .await
        .unwrap();

    let request = QueryRequest {
        user_query: "which fridge was that again?".to_string(),
        domain: None,
        current_page_url: None,
        scope: None,
        session_id: Some(session_id.clone()),
        chat_history: None,
    };
    let response = harness.assistant.answer("user-1", &request).await.unwrap();
    assert!(response.reply.text().contains("Frost Free Refrigerator"));

    // The exchange itself was appended after answering.
    let details = harness
        .sessions
        .get_session(&session_id, "user-1")
        .await
        .unwrap();
    assert_eq!(details.chat_messages.len(), 3);
}

mod transport {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn app(decision: serde_json::Value) -> (axum::Router, tempfile::TempDir) {
        let harness = harness(decision, Vec::new()).await;
        let Harness {
            assistant,
            sessions,
            _dir,
            ..
        } = harness;
        let context = Arc::new(AppContext {
            assistant: Arc::new(assistant),
            sessions,
        });
        (shopsight::server::router(context), _dir)
    }

    fn decision_stub() -> serde_json::Value {
        serde_json::json!({
            "intent": "ask",
            "scope": "chat_history",
            "message_forward": "x"
        })
    }

    #[tokio::test]
    async fn health_endpoint_is_open() {
        let (app, _dir) = app(decision_stub()).await;
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn query_without_auth_is_unauthorized() {
        let (app, _dir) = app(decision_stub()).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"user_query": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_query_is_a_bad_request() {
        let (app, _dir) = app(decision_stub()).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer user-1")
                    .body(Body::from(r#"{"user_query": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_listing_is_scoped_to_the_caller() {
        let (app, _dir) = app(decision_stub()).await;

        for (user, url) in [
            ("user-1", "https://shop.example/p/1"),
            ("user-1", "https://shop.example/p/2"),
            ("user-2", "https://shop.example/p/3"),
        ] {
            let created = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/sessions")
                        .header(header::CONTENT_TYPE, "application/json")
                        .header(header::AUTHORIZATION, format!("Bearer {user}"))
                        .body(Body::from(format!(r#"{{"current_url": "{url}"}}"#)))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(created.status(), StatusCode::CREATED);
        }

        let listed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sessions")
                    .header(header::AUTHORIZATION, "Bearer user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        let bytes = listed.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let sessions = body.as_array().unwrap();
        assert_eq!(sessions.len(), 2);
        for session in sessions {
            let url = session["current_url"].as_str().unwrap();
            assert!(url.ends_with("/p/1") || url.ends_with("/p/2"));
        }

        let anonymous = app
            .oneshot(
                Request::builder()
                    .uri("/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sessions_round_trip_over_http() {
        let (app, _dir) = app(decision_stub()).await;

        let created = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer user-1")
                    .body(Body::from(
                        r#"{"current_url": "https://shop.example/p/1", "current_domain": "shop.example"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let bytes = created.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let fetched = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/sessions/{session_id}"))
                    .header(header::AUTHORIZATION, "Bearer user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let bytes = fetched.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["current_url"], "https://shop.example/p/1");

        // Someone else's token cannot read the session.
        let forbidden = app
            .oneshot(
                Request::builder()
                    .uri(format!("/sessions/{session_id}"))
                    .header(header::AUTHORIZATION, "Bearer intruder")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(forbidden.status(), StatusCode::NOT_FOUND);
    }
}
