// Conversation index and per-conversation timeline ownership. The store
// is the explicit session cache: one instance per ChatClient, passed by
// reference to every consumer, no ambient state.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;

use super::channel::OutboundEvent;
use super::error::SyncError;
use super::reconciler::MessageTimeline;
use super::ChatClient;
use crate::models::{Conversation, Message};

pub struct ConversationStore {
    /// Index kept sorted by most-recent activity, newest first.
    conversations: Vec<Conversation>,
    activity: HashMap<String, DateTime<Utc>>,
    timelines: HashMap<String, MessageTimeline>,
    active: Option<String>,
    /// Guard epoch for in-flight history fetches; bumped on every
    /// activation so a late response for a previous conversation is
    /// recognizable as stale.
    epoch: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Vec::new(),
            activity: HashMap::new(),
            timelines: HashMap::new(),
            active: None,
            epoch: 0,
        }
    }

    /// Insert if the id is absent; otherwise a no-op (first-seen wins).
    /// Returns whether the index grew.
    pub fn upsert_conversation(&mut self, conversation: Conversation) -> bool {
        if self.contains(&conversation.id) {
            debug!("Conversation {} already in index, upsert is a no-op", conversation.id);
            return false;
        }
        self.activity
            .insert(conversation.id.clone(), conversation.created_at);
        self.conversations.push(conversation);
        self.resort();
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.iter().any(|c| c.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Index in most-recent-activity order.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn guard_epoch(&self) -> u64 {
        self.epoch
    }

    /// Mark `id` active and invalidate in-flight history fetches for
    /// whatever was active before. Timelines and pending sends of the
    /// previous conversation are untouched; their lifecycle continues in
    /// the background.
    pub fn set_active(&mut self, id: &str) -> u64 {
        self.active = Some(id.to_string());
        self.epoch += 1;
        self.epoch
    }

    pub fn timeline(&self, id: &str) -> Option<&MessageTimeline> {
        self.timelines.get(id)
    }

    /// Timeline accessor that materializes on first use.
    pub fn timeline_mut(&mut self, id: &str) -> &mut MessageTimeline {
        self.timelines
            .entry(id.to_string())
            .or_insert_with(|| MessageTimeline::new(id))
    }

    /// Timeline accessor that will not materialize an absent list.
    pub fn existing_timeline_mut(&mut self, id: &str) -> Option<&mut MessageTimeline> {
        self.timelines.get_mut(id)
    }

    /// A message landed in `id` (any conversation, materialized or not):
    /// refresh the preview and re-sort the index by activity. Older
    /// timestamps (history backfill) never clobber newer state.
    pub fn record_activity(&mut self, id: &str, preview: Option<&str>, at: DateTime<Utc>) {
        let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) else {
            warn!("Activity for unknown conversation {} ignored", id);
            return;
        };
        let current = self.activity.get(id).copied();
        if current.map_or(true, |c| at >= c) {
            self.activity.insert(id.to_string(), at);
            if let Some(preview) = preview {
                conversation.last_message_preview = Some(preview.to_string());
            }
            self.resort();
        }
    }

    fn resort(&mut self) {
        let activity = &self.activity;
        self.conversations.sort_by(|a, b| {
            let a_at = activity.get(&a.id).copied().unwrap_or(a.created_at);
            let b_at = activity.get(&b.id).copied().unwrap_or(b.created_at);
            b_at.cmp(&a_at)
        });
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClient {
    /// Make `conversation_id` the active conversation: invalidate stale
    /// history fetches, join its channel room, clear typing state left
    /// over from the previous conversation, and pull a fresh first page.
    pub async fn set_active_conversation(&self, conversation_id: &str) -> Result<()> {
        let previous = {
            let mut store = self.store.lock().await;
            if !store.contains(conversation_id) {
                return Err(SyncError::UnknownConversation(conversation_id.to_string()).into());
            }
            let previous = store.active_conversation().map(String::from);
            store.set_active(conversation_id);
            previous
        };

        if let Some(previous) = previous {
            if previous != conversation_id {
                self.clear_typing(&previous).await;
            }
        }

        if let Some(channel) = self.channel() {
            let join = OutboundEvent::ConversationJoin {
                conv_id: conversation_id.to_string(),
                user_id: self.user.id.clone(),
            };
            if let Err(e) = channel.send(join).await {
                warn!("Failed to join conversation {}: {}", conversation_id, e);
            }
        }

        self.load_page(conversation_id, 1).await?;
        Ok(())
    }

    /// Index snapshot in most-recent-activity order.
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.store.lock().await.conversations().to_vec()
    }

    /// Snapshot of one conversation's materialized timeline.
    pub async fn messages(&self, conversation_id: &str) -> Option<Vec<Message>> {
        self.store
            .lock()
            .await
            .timeline(conversation_id)
            .map(|t| t.messages().to_vec())
    }
}
