//! Intent classification.
//!
//! One schema-constrained LLM call per query. The model must emit exactly the
//! enumerated intent/scope values; anything else is treated as a contract
//! violation and collapses to `unknown/unknown`. A hard classifier failure
//! (endpoint down, invalid JSON) degrades to asking about the current page,
//! which never needs a prior search and always has some grounding available.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::llm::ChatModel;
use crate::prompts;
use crate::types::{ChatTurn, Intent, IntentDecision, Scope};

/// Turns of context prepended to bias scope resolution.
const HISTORY_WINDOW: usize = 6;

/// Shape the model is asked to emit. Enum values are validated separately so
/// an out-of-contract string is distinguishable from malformed JSON.
#[derive(Debug, Deserialize)]
struct RawDecision {
    intent: String,
    scope: String,
    #[serde(default)]
    message_forward: String,
    #[serde(default)]
    confidence: Option<f32>,
}

pub struct IntentClassifier {
    chat: Arc<dyn ChatModel>,
}

impl IntentClassifier {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// Classifies a query into an [`IntentDecision`], never erring: contract
    /// violations become `unknown/unknown`, hard failures become the
    /// current-page default.
    pub async fn classify(&self, query: &str, recent_history: &[ChatTurn]) -> IntentDecision {
        let system = prompts::intent_classifier();
        let user = if recent_history.is_empty() {
            query.to_string()
        } else {
            format!(
                "Recent conversation:\n{}\n\nCurrent query: {query}",
                prompts::recent_history(recent_history, HISTORY_WINDOW)
            )
        };

        let value = match self.chat.complete_json(&system, &user).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "intent classification failed; defaulting to current_page");
                return IntentDecision::fallback_current_page(query);
            }
        };

        let raw: RawDecision = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                error!(%err, "classifier output did not match schema");
                return IntentDecision::unknown(query);
            }
        };

        let (intent, scope) = match (raw.intent.parse::<Intent>(), raw.scope.parse::<Scope>()) {
            (Ok(intent), Ok(scope)) => (intent, scope),
            (intent_result, scope_result) => {
                error!(
                    intent = raw.intent,
                    scope = raw.scope,
                    intent_ok = intent_result.is_ok(),
                    scope_ok = scope_result.is_ok(),
                    "classifier emitted out-of-contract values"
                );
                return IntentDecision::unknown(query);
            }
        };

        let forwarded_message = if raw.message_forward.trim().is_empty() {
            query.to_string()
        } else {
            raw.message_forward
        };

        let decision = IntentDecision {
            intent,
            scope,
            forwarded_message,
            confidence: raw.confidence,
        };
        info!(
            intent = %decision.intent,
            scope = %decision.scope,
            confidence = ?decision.confidence,
            "classified query"
        );
        decision
    }
}
