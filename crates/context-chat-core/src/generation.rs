//! Generation trait and prompt assembly.
//!
//! [`PromptTurn`] is the wire shape the generation endpoint expects
//! (`{ role, parts: [{ text }] }`). The server path always sends a single
//! user turn built by [`build_prompt`]; the client fallback path replays its
//! local buffer of turns instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::models::{GenerationResult, RetrievedPassage};

/// Separator placed between retrieved passages in the context block.
pub const PASSAGE_SEPARATOR: &str = "\n---\n";

/// Role as understood by the generation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One entry of the `contents` array sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTurn {
    pub role: PromptRole,
    pub parts: Vec<Part>,
}

impl PromptTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Model,
            parts: vec![Part { text: text.into() }],
        }
    }

    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }
}

/// Invokes a hosted text-generation model.
///
/// One call per invocation: no streaming and no retry. A failed call is
/// reported once to the caller.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, turns: &[PromptTurn]) -> Result<GenerationResult, GenerationError>;
}

/// Join passages into the context block, or `None` when there is nothing
/// to add.
pub fn context_block(passages: &[RetrievedPassage]) -> Option<String> {
    if passages.is_empty() {
        return None;
    }
    let joined = passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR);
    Some(joined)
}

/// Assemble the single-turn prompt for the server path.
pub fn build_prompt(passages: &[RetrievedPassage], message: &str) -> PromptTurn {
    match context_block(passages) {
        Some(context) => PromptTurn::user(format!("Context:\n{}\n\nUser:\n{}", context, message)),
        None => PromptTurn::user(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(s: &str) -> RetrievedPassage {
        RetrievedPassage {
            content: s.to_string(),
        }
    }

    #[test]
    fn test_prompt_without_context_is_raw_message() {
        let turn = build_prompt(&[], "hello");
        assert_eq!(turn, PromptTurn::user("hello"));
    }

    #[test]
    fn test_prompt_with_context() {
        let turn = build_prompt(&[passage("one"), passage("two")], "what happened?");
        assert_eq!(turn.role, PromptRole::User);
        assert_eq!(
            turn.text(),
            "Context:\none\n---\ntwo\n\nUser:\nwhat happened?"
        );
    }

    #[test]
    fn test_prompt_turn_wire_shape() {
        let json = serde_json::to_value(PromptTurn::model("ok")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "role": "model", "parts": [{ "text": "ok" }] })
        );
    }
}
