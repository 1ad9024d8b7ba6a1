//! Prompt composition.
//!
//! The completion collaborator receives one text blob built from four
//! sections in fixed order:
//!
//! ```text
//! {persona}
//!
//! Conversation History:
//! User: ...
//! Assistant: ...
//!
//! Context:
//! {context}
//!
//! User Query:
//! {query}
//! ```
//!
//! The history section is left out when there is no history. The output
//! always starts with the persona and ends with the query.
//!
//! [`PromptComposer`] applies the windowing policy on top of [`compose`]:
//! only the last `history_exchanges` exchanges are rendered and the context
//! is cut to `max_context_chars` characters.

use crate::models::Message;

/// Persona used when none is configured.
pub const DEFAULT_PERSONA: &str = "You are a helpful support assistant. \
Answer using the provided context. When the context does not contain enough \
information to answer, say clearly that you do not have enough data to \
provide an answer.";

pub const DEFAULT_HISTORY_EXCHANGES: usize = 10;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 12_000;

/// Build the prompt text from already-windowed inputs.
pub fn compose(persona: &str, history: &[Message], context: &str, query: &str) -> String {
    let mut out = String::with_capacity(
        persona.len() + context.len() + query.len() + history.len() * 64 + 64,
    );
    out.push_str(persona);
    out.push_str("\n\n");

    if !history.is_empty() {
        out.push_str("Conversation History:\n");
        for msg in history {
            out.push_str(msg.role.label());
            out.push_str(": ");
            out.push_str(&msg.content);
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str("Context:\n");
    out.push_str(context);
    out.push_str("\n\nUser Query:\n");
    out.push_str(query);
    out
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Persona plus windowing policy.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    persona: String,
    history_exchanges: usize,
    max_context_chars: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(
            DEFAULT_PERSONA,
            DEFAULT_HISTORY_EXCHANGES,
            DEFAULT_MAX_CONTEXT_CHARS,
        )
    }
}

impl PromptComposer {
    pub fn new(
        persona: impl Into<String>,
        history_exchanges: usize,
        max_context_chars: usize,
    ) -> Self {
        Self {
            persona: persona.into(),
            history_exchanges,
            max_context_chars,
        }
    }

    /// Compose a prompt, keeping the last `history_exchanges` exchanges of
    /// `history` and at most `max_context_chars` of `context`.
    pub fn build(&self, history: &[Message], context: &str, query: &str) -> String {
        let keep = self.history_exchanges.saturating_mul(2).min(history.len());
        let window = &history[history.len() - keep..];
        let context = truncate_chars(context, self.max_context_chars);
        compose(&self.persona, window, context, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(pairs: usize) -> Vec<Message> {
        (0..pairs)
            .flat_map(|i| {
                [
                    Message::user(format!("question {}", i)),
                    Message::assistant(format!("answer {}", i)),
                ]
            })
            .collect()
    }

    #[test]
    fn test_exact_layout() {
        let prompt = compose(
            "PERSONA",
            &[Message::user("hi"), Message::assistant("hello")],
            "ctx line",
            "what now?",
        );
        assert_eq!(
            prompt,
            "PERSONA\n\nConversation History:\nUser: hi\nAssistant: hello\n\nContext:\nctx line\n\nUser Query:\nwhat now?"
        );
    }

    #[test]
    fn test_empty_history_omits_section() {
        let prompt = compose("P", &[], "C", "Q");
        assert_eq!(prompt, "P\n\nContext:\nC\n\nUser Query:\nQ");
        assert!(!prompt.contains("Conversation History"));
    }

    #[test]
    fn test_prefix_and_suffix_hold() {
        for pairs in [0, 1, 3] {
            for context in ["", "some context", "multi\nline\ncontext"] {
                let prompt = compose("You are a coach.", &history(pairs), context, "my query");
                assert!(prompt.starts_with("You are a coach."));
                assert!(prompt.ends_with("my query"));
            }
        }
    }

    #[test]
    fn test_sections_in_order() {
        let prompt = compose("P", &history(1), "CTX", "Q");
        let h = prompt.find("Conversation History:").unwrap();
        let c = prompt.find("Context:").unwrap();
        let q = prompt.find("User Query:").unwrap();
        assert!(h < c && c < q);
    }

    #[test]
    fn test_composer_windows_history() {
        let composer = PromptComposer::new("P", 2, 1000);
        let prompt = composer.build(&history(5), "", "Q");
        assert!(!prompt.contains("question 2"));
        assert!(prompt.contains("question 3"));
        assert!(prompt.contains("answer 4"));
    }

    #[test]
    fn test_composer_zero_window_drops_history() {
        let composer = PromptComposer::new("P", 0, 1000);
        let prompt = composer.build(&history(3), "C", "Q");
        assert!(!prompt.contains("Conversation History"));
    }

    #[test]
    fn test_composer_truncates_context() {
        let composer = PromptComposer::new("P", 10, 5);
        let prompt = composer.build(&[], "ééééééééé", "Q");
        assert!(prompt.contains("Context:\nééééé\n\nUser Query:"));
    }

    #[test]
    fn test_truncate_chars_boundaries() {
        assert_eq!(truncate_chars("abc", 0), "");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("日本語", 2), "日本");
    }
}
