//! The retrieval-augmented chat exchange.
//!
//! One call to [`ChatPipeline::send`] runs a full exchange for a signed-in
//! [`Session`]:
//!
//! 1. Validate and trim the query.
//! 2. Append the user message to the in-memory conversation.
//! 3. Retrieve context from the [`Index`].
//! 4. Compose the prompt from persona, prior history, context and query.
//! 5. Ask the [`CompletionProvider`] for a reply.
//! 6. Append the assistant message and persist the whole conversation.
//!
//! If step 3 or 5 fails, the user message from step 2 is removed again so
//! the conversation never holds (or persists) an unanswered message. A
//! failed save in step 6 keeps the completed exchange in memory; the next
//! successful save writes it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::completion::{CompletionProvider, CompletionRequest};
use crate::error::{Error, PersistenceError, Result};
use crate::models::{Conversation, Message};
use crate::prompt::PromptComposer;
use crate::retrieve::{clean_query, retrieve, DEFAULT_TOP_K};
use crate::session::Session;
use crate::store::{ConversationStore, Index};

/// How conversation writes handle concurrent sessions for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Overwrite whatever is stored.
    #[default]
    LastWriterWins,
    /// Compare-and-swap on the revision; on conflict, replay the new
    /// exchange on top of the stored history once.
    Optimistic,
}

/// Wiring for the chat exchange.
pub struct ChatPipeline {
    index: Arc<dyn Index>,
    completion: Arc<dyn CompletionProvider>,
    conversations: Arc<dyn ConversationStore>,
    composer: PromptComposer,
    model: String,
    top_k: usize,
    write_mode: WriteMode,
}

impl ChatPipeline {
    pub fn new(
        index: Arc<dyn Index>,
        completion: Arc<dyn CompletionProvider>,
        conversations: Arc<dyn ConversationStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            index,
            completion,
            conversations,
            composer: PromptComposer::default(),
            model: model.into(),
            top_k: DEFAULT_TOP_K,
            write_mode: WriteMode::default(),
        }
    }

    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Run one exchange and return the assistant's reply.
    pub async fn send(&self, session: &mut Session, input: &str) -> Result<Message> {
        let active = session.active_mut()?;
        let query = clean_query(input)?.to_string();
        let uid = active.identity.uid.clone();

        active.conversation.append(Message::user(query.clone()));
        let prior = active.conversation.len() - 1;

        let outcome = self
            .answer(&active.conversation.messages[..prior], &query)
            .await;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                active.conversation.messages.truncate(prior);
                warn!(uid = %uid, error = %e, "exchange failed; user message dropped");
                return Err(e);
            }
        };

        let reply = Message::assistant(reply);
        active.conversation.append(reply.clone());

        let exchange = [Message::user(query), reply.clone()];
        self.persist(&uid, &mut active.conversation, &exchange)
            .await?;

        info!(uid = %uid, messages = active.conversation.len(), "exchange saved");
        Ok(reply)
    }

    /// Retrieve, compose and complete for `query` given `history`.
    async fn answer(&self, history: &[Message], query: &str) -> Result<String> {
        let context = retrieve(query, self.index.as_ref(), self.top_k).await?;
        let prompt = self.composer.build(history, &context, query);
        debug!(
            provider = self.completion.name(),
            model = %self.model,
            prompt_chars = prompt.chars().count(),
            "requesting completion"
        );

        let reply = self
            .completion
            .complete(CompletionRequest {
                model: self.model.clone(),
                prompt,
            })
            .await?;
        Ok(reply)
    }

    async fn persist(
        &self,
        uid: &str,
        conversation: &mut Conversation,
        exchange: &[Message],
    ) -> Result<()> {
        match self.write_mode {
            WriteMode::LastWriterWins => {
                conversation.revision = self.conversations.save(uid, conversation).await?;
                Ok(())
            }
            WriteMode::Optimistic => match self.conversations.save_checked(uid, conversation).await
            {
                Ok(revision) => {
                    conversation.revision = revision;
                    Ok(())
                }
                Err(Error::Persistence(PersistenceError::Conflict { found, .. })) => {
                    warn!(uid, found, "conversation changed elsewhere; replaying exchange");
                    let mut latest = self.conversations.load(uid).await?;
                    for msg in exchange {
                        latest.append(msg.clone());
                    }
                    latest.revision = self.conversations.save_checked(uid, &latest).await?;
                    *conversation = latest;
                    Ok(())
                }
                Err(e) => Err(e),
            },
        }
    }
}
