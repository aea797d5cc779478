// Realtime Channel abstraction: the socket side of the chat backend.
// Wire events carry the exact names and payloads of the server gateway;
// the transport itself (socket.io, websocket, a test double) stays behind
// the RealtimeChannel trait.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::error::SyncError;
use crate::models::{Conversation, Message, User};

/// Client -> server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "conversation:join", rename_all = "camelCase")]
    ConversationJoin { conv_id: String, user_id: String },
    #[serde(rename = "message:create", rename_all = "camelCase")]
    MessageCreate {
        message: Message,
        author_id: String,
        conv_id: String,
    },
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { conv_id: String, user_name: String },
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { conv_id: String, user_name: String },
    #[serde(rename = "conversation:create", rename_all = "camelCase")]
    ConversationCreate {
        conversation: Conversation,
        #[serde(rename = "self")]
        initiator: User,
    },
}

/// Server -> client events, plus the synthetic `Disconnected` signal a
/// transport injects when the underlying connection drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "message:received", rename_all = "camelCase")]
    MessageReceived { conv_id: String, message: Message },
    #[serde(rename = "typing:started", rename_all = "camelCase")]
    TypingStarted { user_name: String },
    #[serde(rename = "typing:stopped", rename_all = "camelCase")]
    TypingStopped { user_name: String },
    #[serde(rename = "conversation:created", rename_all = "camelCase")]
    ConversationCreated {
        conversation: Conversation,
        #[serde(rename = "self")]
        initiator: User,
    },
    /// Not a wire event; emitted by the transport on connection loss.
    #[serde(skip)]
    Disconnected,
}

impl OutboundEvent {
    /// Wire encoding used by JSON transports.
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::Transient(e.to_string()))
    }
}

impl InboundEvent {
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        serde_json::from_str(raw).map_err(|e| SyncError::Transient(e.to_string()))
    }
}

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Push one event to the server. Transports deliver server events by
    /// sending [`InboundEvent`]s into the receiver handed to
    /// [`crate::sync::ChatClient::attach_channel`].
    async fn send(&self, event: OutboundEvent) -> Result<(), SyncError>;
}

/// State changes the core reports to its UI consumers.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A message landed in (or changed within) a conversation timeline.
    Message {
        conversation_id: String,
        message: Message,
    },
    /// The conversation index changed (new entry, preview, or ordering).
    ConversationUpdated(Conversation),
    /// Peer typing indicator: `Some(name)` while active, `None` on clear.
    Typing {
        conversation_id: String,
        peer_name: Option<String>,
    },
    /// The realtime channel dropped.
    Disconnected,
}

type SubscriberList = Arc<Mutex<Vec<(u64, mpsc::Sender<Notification>)>>>;

/// Fan-out point for [`Notification`]s. Subscribers hold an RAII
/// [`EventSubscription`]; dropping it unregisters the receiver, so a
/// reconnecting consumer can never leak or double-register a listener.
#[derive(Clone, Default)]
pub(crate) struct Dispatcher {
    subscribers: SubscriberList,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (EventSubscription, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(100);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().push((id, tx));
        (
            EventSubscription {
                id,
                subscribers: self.subscribers.clone(),
            },
            rx,
        )
    }

    /// Deliver to every live subscriber. Slow consumers miss events rather
    /// than stalling the sync path; closed receivers are pruned.
    pub fn broadcast(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(id, tx)| match tx.try_send(notification.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Subscriber {} lagging, notification dropped", id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// Handle tying a notification receiver to its registry slot. Dropping the
/// handle releases the slot.
pub struct EventSubscription {
    id: u64,
    subscribers: SubscriberList,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != self.id);
    }
}
