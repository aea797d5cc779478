// History Source collaborator: the REST side of the chat backend.
// The sync core never talks HTTP itself; an implementation of this trait
// (axum/reqwest, a test double, ...) is injected at construction time.

use async_trait::async_trait;

use super::error::SyncError;
use crate::models::{Conversation, Message};

/// One page of archived messages for a conversation.
#[derive(Debug, Clone)]
pub struct MessagePage {
    /// Conversation the page belongs to
    pub id: String,
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch a page of message history. `page` is 1-based; the server
    /// returns at most `limit` messages, newest pages first.
    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        page: usize,
    ) -> Result<MessagePage, SyncError>;

    /// Persist a message and return the canonical copy (permanent id,
    /// server timestamp). `nonce` is the client correlation nonce; the
    /// server stores it opaquely and echoes it on the broadcast copy.
    async fn create_message(
        &self,
        content: &str,
        conversation_id: &str,
        nonce: &str,
    ) -> Result<Message, SyncError>;

    /// Create a direct ("d") or group ("g") conversation with `peer_name`.
    async fn create_conversation(
        &self,
        peer_name: &str,
        mode: &str,
    ) -> Result<Conversation, SyncError>;
}
