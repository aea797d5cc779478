// Message reconciliation: three producers (history pagination, live push,
// optimistic local sends) converge through one insert/dedup path per
// conversation. The timeline is the only writer over its list.

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tokio::time::Duration;
use uuid::Uuid;

use super::channel::{Notification, OutboundEvent};
use super::error::SyncError;
use super::ChatClient;
use crate::models::{Message, MessageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Id already present with identical content; dropped silently.
    Duplicate,
    /// Id already present with divergent content; dropped, anomaly logged.
    ConsistencyFault,
}

/// Tracking record for an optimistic send awaiting confirmation, keyed by
/// its correlation nonce (which doubles as the temporary message id).
#[derive(Debug, Clone)]
struct PendingSend {
    queued_at: chrono::DateTime<chrono::Utc>,
}

/// One conversation's ordered, deduplicated message list.
///
/// Invariants: ids unique; sorted ascending by `(created_at, id)`; entries
/// are replaced only through the confirmation path, never mutated by pushes.
pub struct MessageTimeline {
    conversation_id: String,
    messages: Vec<Message>,
    ids: HashSet<String>,
    pending: HashMap<String, PendingSend>,
}

impl MessageTimeline {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            messages: Vec::new(),
            ids: HashSet::new(),
            pending: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Insert by `(created_at, id)` order, deduplicating by id.
    pub fn insert(&mut self, message: Message) -> InsertOutcome {
        if self.ids.contains(&message.id) {
            let known = self
                .messages
                .iter()
                .find(|m| m.id == message.id)
                .map(|m| m.content == message.content)
                .unwrap_or(true);
            if known {
                debug!(
                    "Duplicate message {} in conversation {} dropped",
                    message.id, self.conversation_id
                );
                return InsertOutcome::Duplicate;
            }
            warn!(
                "Consistency fault: message {} in conversation {} arrived with divergent content, keeping canonical entry",
                message.id, self.conversation_id
            );
            return InsertOutcome::ConsistencyFault;
        }

        let pos = self
            .messages
            .binary_search_by(|probe| {
                probe
                    .created_at
                    .cmp(&message.created_at)
                    .then_with(|| probe.id.as_str().cmp(message.id.as_str()))
            })
            .unwrap_or_else(|p| p);
        self.ids.insert(message.id.clone());
        self.messages.insert(pos, message);
        InsertOutcome::Inserted
    }

    /// Merge a history page; returns how many entries were new.
    pub fn merge_page(&mut self, page: Vec<Message>) -> usize {
        let mut inserted = 0;
        for message in page {
            if self.insert(message) == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        inserted
    }

    /// Append an optimistic local message. The server clock is later than
    /// every cached entry, so a tail append upholds the sort invariant.
    pub fn apply_optimistic(&mut self, message: Message) {
        debug_assert_eq!(message.status, MessageStatus::Pending);
        self.pending.insert(
            message.id.clone(),
            PendingSend {
                queued_at: message.created_at,
            },
        );
        self.ids.insert(message.id.clone());
        self.messages.push(message);
    }

    /// Match an incoming own-message echo to a pending send. The nonce is
    /// the primary correlation; an echo stripped of its nonce falls back to
    /// content equality within `window` of the queue time.
    pub fn correlate(&self, incoming: &Message, window: chrono::Duration) -> Option<String> {
        if let Some(nonce) = &incoming.nonce {
            if self.pending.contains_key(nonce) {
                return Some(nonce.clone());
            }
        }
        self.pending
            .iter()
            .find(|(nonce, pending)| {
                let age = incoming.created_at - pending.queued_at;
                age >= chrono::Duration::zero()
                    && age <= window
                    && self
                        .messages
                        .iter()
                        .any(|m| &m.id == *nonce && m.content == incoming.content)
            })
            .map(|(nonce, _)| nonce.clone())
    }

    /// Replace the pending (or prematurely failed) entry for `nonce` in
    /// place with the confirmed server copy. Same position, same list
    /// length; only id, timestamp and status change. Returns false when no
    /// entry carries the nonce id anymore.
    pub fn confirm(&mut self, nonce: &str, confirmed: &Message) -> bool {
        let Some(pos) = self.messages.iter().position(|m| m.id == nonce) else {
            return false;
        };
        let was_failed = self.messages[pos].status == MessageStatus::Failed;
        self.ids.remove(nonce);
        self.ids.insert(confirmed.id.clone());
        let mut entry = confirmed.clone();
        entry.status = MessageStatus::Confirmed;
        self.messages[pos] = entry;
        self.pending.remove(nonce);
        if was_failed {
            info!(
                "Late confirmation resurrected message {} in conversation {}",
                confirmed.id, self.conversation_id
            );
        }
        true
    }

    /// Timeout path: Pending -> Failed. Returns the updated entry, or None
    /// when a confirmation already won the race.
    pub fn mark_failed(&mut self, nonce: &str) -> Option<Message> {
        self.pending.remove(nonce)?;
        let entry = self.messages.iter_mut().find(|m| m.id == nonce)?;
        if entry.status != MessageStatus::Pending {
            return None;
        }
        entry.status = MessageStatus::Failed;
        Some(entry.clone())
    }
}

impl ChatClient {
    /// Fetch and merge one page of history for `conversation_id`. Returns
    /// whether more pages remain. A response that arrives after the active
    /// conversation changed is discarded via the store's guard epoch; a
    /// transport failure leaves the cache untouched and is retryable.
    pub async fn load_page(&self, conversation_id: &str, page: usize) -> Result<bool> {
        let limit = self.config.page_size;
        let epoch = self.store.lock().await.guard_epoch();

        let history_page = match self
            .history
            .get_messages(conversation_id, limit, page)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                error!(
                    "History fetch for conversation {} page {} failed: {}",
                    conversation_id, page, e
                );
                return Err(e.into());
            }
        };

        let mut store = self.store.lock().await;
        if store.guard_epoch() != epoch {
            debug!(
                "Stale history response for conversation {} (page {}) ignored",
                conversation_id, page
            );
            return Ok(false);
        }

        let count = history_page.messages.len();
        let timeline = store.timeline_mut(conversation_id);
        let inserted = timeline.merge_page(history_page.messages);
        let newest = timeline.messages().last().cloned();
        info!(
            "Merged history page {} for conversation {}: {} new of {} fetched",
            page, conversation_id, inserted, count
        );

        if let Some(newest) = newest {
            store.record_activity(conversation_id, Some(&newest.content), newest.created_at);
        }
        let conversation = store.get(conversation_id).cloned();
        drop(store);

        if let Some(conversation) = conversation {
            self.dispatcher
                .broadcast(Notification::ConversationUpdated(conversation));
        }
        Ok(count == limit)
    }

    /// Optimistic send: the message appears locally as Pending right away,
    /// is persisted over REST, then confirmed in place. If neither the REST
    /// ack nor the socket echo lands within the configured timeout the
    /// entry fails; it is never re-sent automatically.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        let nonce = Uuid::new_v4().to_string();
        let queued_at = Utc::now();
        let temp = Message {
            id: nonce.clone(),
            conversation_id: conversation_id.to_string(),
            author_id: self.user.id.clone(),
            content: content.to_string(),
            attachment: None,
            created_at: queued_at,
            status: MessageStatus::Pending,
            nonce: Some(nonce.clone()),
        };

        {
            let mut store = self.store.lock().await;
            if !store.contains(conversation_id) {
                return Err(SyncError::UnknownConversation(conversation_id.to_string()).into());
            }
            store.timeline_mut(conversation_id).apply_optimistic(temp.clone());
            store.record_activity(conversation_id, Some(content), queued_at);
        }
        self.dispatcher.broadcast(Notification::Message {
            conversation_id: conversation_id.to_string(),
            message: temp.clone(),
        });

        // Submitting a message ends the local typing state
        if let Err(e) = self.finish_typing(conversation_id).await {
            debug!("Could not emit typing:stop on submit: {}", e);
        }

        self.arm_confirmation_timeout(conversation_id, &nonce);

        let confirmed = match self.create_with_retry(content, conversation_id, &nonce).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                // Definitive failure: don't wait out the timeout clock
                self.expire_pending(conversation_id, &nonce).await;
                return Err(e.into());
            }
        };

        let replaced = {
            let mut store = self.store.lock().await;
            store
                .timeline_mut(conversation_id)
                .confirm(&nonce, &confirmed)
        };
        if replaced {
            self.dispatcher.broadcast(Notification::Message {
                conversation_id: conversation_id.to_string(),
                message: confirmed.clone(),
            });
        }

        // Echo to peers; the server rebroadcasts this as message:received
        if let Some(channel) = self.channel() {
            let event = OutboundEvent::MessageCreate {
                message: confirmed.clone(),
                author_id: self.user.id.clone(),
                conv_id: conversation_id.to_string(),
            };
            if let Err(e) = channel.send(event).await {
                warn!("Failed to announce message over channel: {}", e);
            }
        }

        Ok(confirmed)
    }

    /// Spawn the watchdog that fails the pending entry if no confirmation
    /// arrives. The clock runs independently of channel state.
    fn arm_confirmation_timeout(&self, conversation_id: &str, nonce: &str) {
        let client = self.clone();
        let conversation_id = conversation_id.to_string();
        let nonce = nonce.to_string();
        let timeout = self.config.optimistic_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            client.expire_pending(&conversation_id, &nonce).await;
        });
    }

    pub(crate) async fn expire_pending(&self, conversation_id: &str, nonce: &str) {
        let failed = {
            let mut store = self.store.lock().await;
            store
                .existing_timeline_mut(conversation_id)
                .and_then(|t| t.mark_failed(nonce))
        };
        if let Some(message) = failed {
            warn!(
                "No confirmation for message {} in conversation {} within {:?}; marked failed",
                nonce, conversation_id, self.config.optimistic_timeout
            );
            self.dispatcher.broadcast(Notification::Message {
                conversation_id: conversation_id.to_string(),
                message,
            });
        }
    }

    async fn create_with_retry(
        &self,
        content: &str,
        conversation_id: &str,
        nonce: &str,
    ) -> Result<Message, SyncError> {
        let mut last_error = None;
        for attempt in 1..=self.config.send_retries {
            match self
                .history
                .create_message(content, conversation_id, nonce)
                .await
            {
                Ok(mut message) => {
                    message.status = MessageStatus::Confirmed;
                    if message.nonce.is_none() {
                        message.nonce = Some(nonce.to_string());
                    }
                    return Ok(message);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "create_message attempt {}/{} failed: {}",
                        attempt, self.config.send_retries, e
                    );
                    last_error = Some(e);
                    if attempt < self.config.send_retries {
                        let backoff_base = 500 * 2u64.pow(attempt as u32);
                        let jitter = rand::thread_rng().gen_range(0..500);
                        tokio::time::sleep(Duration::from_millis(backoff_base + jitter)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| SyncError::Transient("create_message failed".to_string())))
    }

    /// Apply a live-pushed message (`message:received`). Own-message echoes
    /// are correlated against pending sends (in any conversation, active or
    /// not); peer messages materialize only in the active conversation,
    /// every other conversation just refreshes its preview and activity
    /// ordering.
    pub async fn apply_incoming(&self, conv_id: String, message: Message) {
        let mut store = self.store.lock().await;
        if !store.contains(&conv_id) {
            debug!("Push for unknown conversation {} dropped", conv_id);
            return;
        }
        let is_active = store.active_conversation() == Some(conv_id.as_str());
        let own = message.author_id == self.user.id;
        let window = chrono::Duration::from_std(self.config.optimistic_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));

        let mut notify = None;
        let mut correlated = false;
        if own {
            if let Some(timeline) = store.existing_timeline_mut(&conv_id) {
                if let Some(nonce) = timeline.correlate(&message, window) {
                    if timeline.confirm(&nonce, &message) {
                        correlated = true;
                        let mut confirmed = message.clone();
                        confirmed.status = MessageStatus::Confirmed;
                        notify = Some(confirmed);
                    }
                }
            }
        }

        if !correlated && is_active {
            let mut entry = message.clone();
            entry.status = MessageStatus::Confirmed;
            let timeline = store.timeline_mut(&conv_id);
            if timeline.insert(entry.clone()) == InsertOutcome::Inserted {
                notify = Some(entry);
            }
        }

        store.record_activity(&conv_id, Some(&message.content), message.created_at);
        let conversation = store.get(&conv_id).cloned();
        drop(store);

        if let Some(message) = notify {
            self.dispatcher.broadcast(Notification::Message {
                conversation_id: conv_id.clone(),
                message,
            });
        }
        if let Some(conversation) = conversation {
            self.dispatcher
                .broadcast(Notification::ConversationUpdated(conversation));
        }
    }
}
