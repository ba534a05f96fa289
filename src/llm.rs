//! LLM client boundary.
//!
//! Everything above this module treats the model as a black box:
//! `complete(system, user) -> text`, plus a JSON-constrained variant used only
//! by the intent classifier. The concrete client speaks the OpenAI
//! chat-completions protocol against a configurable base URL; no retry loop
//! beyond what the HTTP client itself does.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::types::AssistError;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Plain text completion.
    async fn complete(&self, system: &str, user: &str) -> Result<String, AssistError>;

    /// Completion constrained to emit a single JSON object.
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
    ) -> Result<serde_json::Value, AssistError>;
}

pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, AssistError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|err| AssistError::Llm(err.to_string()))?,
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| AssistError::Llm(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }

    async fn request(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, AssistError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.7,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: json_mode.then(|| ResponseFormat {
                format_type: "json_object",
            }),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| AssistError::Llm(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(AssistError::Llm(format!(
                "chat endpoint returned {status}: {text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| AssistError::Llm(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AssistError::Llm("chat endpoint returned no choices".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AssistError> {
        self.request(system, user, false).await
    }

    async fn complete_json(
        &self,
        system: &str,
        user: &str,
    ) -> Result<serde_json::Value, AssistError> {
        let raw = self.request(system, user, true).await?;
        serde_json::from_str(&raw)
            .map_err(|err| AssistError::Llm(format!("model emitted invalid JSON: {err}")))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn plain_completion_extracts_first_choice() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "Sure, it costs $19.99."}}
                    ]
                }));
            })
            .await;

        let chat = OpenAiChat::new(&server.base_url(), "test-model", "key", Duration::from_secs(5))
            .unwrap();
        let answer = chat.complete("system", "what's the price?").await.unwrap();
        assert_eq!(answer, "Sure, it costs $19.99.");
    }

    #[tokio::test]
    async fn json_mode_parses_object_and_rejects_garbage() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_contains("json_object");
                then.status(200).json_body(serde_json::json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "{\"intent\": \"ask\"}"}}
                    ]
                }));
            })
            .await;

        let chat = OpenAiChat::new(&server.base_url(), "test-model", "key", Duration::from_secs(5))
            .unwrap();
        let value = chat.complete_json("system", "user").await.unwrap();
        assert_eq!(value["intent"], "ask");
    }

    #[tokio::test]
    async fn quota_failures_surface_as_llm_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let chat = OpenAiChat::new(&server.base_url(), "test-model", "key", Duration::from_secs(5))
            .unwrap();
        assert!(matches!(
            chat.complete("s", "u").await,
            Err(AssistError::Llm(_))
        ));
    }
}
