//! Prompt assembly.
//!
//! Only the contract matters here: which context is packed into the system
//! prompt for each answering path. The wording is deliberately short.

use crate::types::ChatTurn;

/// System prompt for the intent classifier's schema-constrained call.
pub fn intent_classifier() -> String {
    r#"You are an intent classifier for a shopping assistant.
Respond with a single JSON object, no markdown, exactly these fields:
{"intent": "ask|todo|unknown", "scope": "current_page|product|chat_history|cart|order|wishlist|account|unknown", "message_forward": "string", "confidence": 0.0}

intent is "ask" when the user wants information or expresses purchase interest,
"todo" when they want an action performed (add to cart, place order, wishlist),
"unknown" when the query is too vague.
scope is "current_page" for questions about what they are viewing now ("this",
"here"), "product" for searching or browsing new products ("find", "show me"),
"chat_history" for things already discussed ("those", "you showed", "earlier").
message_forward is the query restated for the next agent."#
        .to_string()
}

/// System prompt grounding an answer in retrieved current-page context.
pub fn current_page(context: &str) -> String {
    format!(
        "You are a helpful shopping assistant. Answer the user's question using \
         only the context extracted from the page they are viewing. Always state \
         the price, rating, and availability when the context contains them. If \
         something is genuinely absent from the context, say you could not find \
         it on this page.\n\nCONTEXT FROM CURRENT PAGE:\n{context}"
    )
}

/// System prompt presenting product-search results.
pub fn product_recommendation(user_query: &str, urls: &[String]) -> String {
    let listing = if urls.is_empty() {
        "(no matching products were found)".to_string()
    } else {
        urls.iter()
            .map(|url| format!("- {url}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You are a helpful shop vendor. The user searched for: \"{user_query}\". \
         Present the matching products below as a short list with a one-line \
         description inferred from each URL slug and a clickable link. Be brief \
         and concrete; if the list is empty, say no matches were found and \
         suggest rephrasing.\n\nPRODUCT URLS:\n{listing}"
    )
}

/// System prompt for answering out of the session transcript.
pub fn chat_history(turns: &[ChatTurn]) -> String {
    let transcript = if turns.is_empty() {
        "(no prior conversation)".to_string()
    } else {
        turns
            .iter()
            .map(|turn| format!("{}: {}", turn.message_type, turn.message))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You are a helpful shopping assistant. Answer the user's question using \
         only the prior conversation below. Reference what was discussed \
         naturally and be specific about names and prices that appear in it.\n\n\
         CONVERSATION HISTORY:\n{transcript}"
    )
}

/// Compact rendering of recent turns, prepended to the classifier input to
/// bias scope resolution.
pub fn recent_history(turns: &[ChatTurn], max_turns: usize) -> String {
    turns
        .iter()
        .rev()
        .take(max_turns)
        .rev()
        .map(|turn| format!("{}: {}", turn.message_type, turn.message))
        .collect::<Vec<_>>()
        .join("\n")
}
