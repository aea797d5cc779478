// Conversation creation arrives twice: once as the REST response to the
// initiator, once as a channel broadcast to everyone in the lobby
// (including the initiator, as a loop-back echo). Dedup is by conversation
// id against the store, never by payload equality.

use anyhow::Result;
use log::{debug, info, warn};

use super::channel::{Notification, OutboundEvent};
use super::ChatClient;
use crate::models::{Conversation, User};

impl ChatClient {
    /// Start a conversation with `peer_name`. The index entry is inserted
    /// synchronously on REST success, before the broadcast echo can come
    /// back; a transient failure surfaces to the caller with the index
    /// untouched.
    pub async fn create_conversation(&self, peer_name: &str, mode: &str) -> Result<Conversation> {
        let conversation = self.history.create_conversation(peer_name, mode).await?;
        info!(
            "Created conversation {} with {} (mode {})",
            conversation.id, peer_name, mode
        );

        {
            let mut store = self.store.lock().await;
            store.upsert_conversation(conversation.clone());
        }
        self.dispatcher
            .broadcast(Notification::ConversationUpdated(conversation.clone()));

        if let Some(channel) = self.channel() {
            let event = OutboundEvent::ConversationCreate {
                conversation: conversation.clone(),
                initiator: self.user.clone(),
            };
            if let Err(e) = channel.send(event).await {
                warn!(
                    "Failed to announce conversation {} over channel: {}",
                    conversation.id, e
                );
            }
        }

        Ok(conversation)
    }

    /// Idempotent index insert for conversations learned out of band.
    pub async fn upsert_conversation(&self, conversation: Conversation) -> bool {
        let inserted = {
            let mut store = self.store.lock().await;
            store.upsert_conversation(conversation.clone())
        };
        if inserted {
            self.dispatcher
                .broadcast(Notification::ConversationUpdated(conversation));
        }
        inserted
    }

    /// Pump path for conversation:created.
    pub(crate) async fn handle_conversation_created(
        &self,
        conversation: Conversation,
        initiator: User,
    ) {
        if initiator.id == self.user.id {
            // Our own REST path already inserted it
            debug!(
                "Loop-back echo for conversation {} ignored",
                conversation.id
            );
            return;
        }
        if self.upsert_conversation(conversation.clone()).await {
            info!(
                "Conversation {} created by {} added via broadcast",
                conversation.id, initiator.user_name
            );
        }
    }
}
