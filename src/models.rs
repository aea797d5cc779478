// Data model for the conversation sync core
// These types mirror the server's wire representation (camelCase JSON)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub user_name: String,
    #[serde(default)]
    pub profile_pic: Option<String>,
    #[serde(default)]
    pub online: bool,
}

/// A direct conversation between two users. The index in
/// [`crate::sync::store::ConversationStore`] holds at most one entry per id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub creator: User,
    pub recipient: User,
    pub created_at: DateTime<Utc>,
    /// Derived preview of the newest message, kept fresh even when the
    /// conversation's message list is not materialized.
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

impl Conversation {
    /// The participant that is not `self_id`.
    pub fn peer(&self, self_id: &str) -> &User {
        if self.creator.id == self_id {
            &self.recipient
        } else {
            &self.creator
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub content: String,
    #[serde(default)]
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
    /// Client-generated correlation nonce. Set on locally submitted
    /// messages and echoed back by the server so that the optimistic copy
    /// can be matched deterministically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistic local copy, awaiting server acknowledgement
    Pending,
    /// Acknowledged by the server (terminal)
    #[default]
    Confirmed,
    /// No acknowledgement arrived in time. A late confirmation may still
    /// move this back to Confirmed; nothing else can.
    Failed,
}
