// Conversation sync engine
// This module is the entry point for everything the UI layer consumes:
// one ChatClient facade, with each concern implemented in its own file.

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::Duration;

pub mod broadcast;
pub mod channel;
pub mod error;
pub mod grouping;
pub mod history;
pub mod reconciler;
pub mod store;
pub mod typing;

pub use channel::{
    EventSubscription, InboundEvent, Notification, OutboundEvent, RealtimeChannel,
};
pub use error::SyncError;
pub use grouping::{grouping_flags, relative_label, GroupFlags};
pub use history::{HistorySource, MessagePage};
pub use reconciler::{InsertOutcome, MessageTimeline};
pub use store::ConversationStore;
pub use typing::{TypingCoordinator, TypingState};

use crate::models::User;
use channel::Dispatcher;

/// Tunables for the sync engine. Defaults match the production service:
/// 100-message pages, a 10 s optimistic confirmation window, 2 send
/// attempts, a 2 s typing debounce and a 5 s remote typing expiry.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: usize,
    pub optimistic_timeout: Duration,
    pub send_retries: usize,
    pub typing_debounce: Duration,
    pub remote_typing_expiry: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            optimistic_timeout: Duration::from_secs(10),
            send_retries: 2,
            typing_debounce: Duration::from_millis(2000),
            remote_typing_expiry: Duration::from_millis(5000),
        }
    }
}

/// The client session. Owns the conversation index, per-conversation
/// timelines, and typing state; talks to the backend through the injected
/// [`HistorySource`] (REST) and [`RealtimeChannel`] (socket) seams.
///
/// Cloning is cheap and shares all state; the event pump and the timer
/// watchdogs run on clones of the same session.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) user: User,
    pub(crate) config: SyncConfig,
    pub(crate) history: Arc<dyn HistorySource>,
    pub(crate) channel: Arc<RwLock<Option<Arc<dyn RealtimeChannel>>>>,
    pub(crate) store: Arc<TokioMutex<ConversationStore>>,
    pub(crate) typing: Arc<TokioMutex<TypingCoordinator>>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) connected: Arc<AtomicBool>,
}

impl ChatClient {
    pub fn new(user: User, history: Arc<dyn HistorySource>, config: SyncConfig) -> Self {
        let typing = TypingCoordinator::new(config.typing_debounce, config.remote_typing_expiry);
        Self {
            user,
            config,
            history,
            channel: Arc::new(RwLock::new(None)),
            store: Arc::new(TokioMutex::new(ConversationStore::new())),
            typing: Arc::new(TokioMutex::new(typing)),
            dispatcher: Dispatcher::new(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register a notification listener. The subscription is an RAII
    /// handle; dropping it releases the slot, so re-subscribing across
    /// reconnects cannot leak or duplicate listeners.
    pub fn subscribe(&self) -> (EventSubscription, mpsc::Receiver<Notification>) {
        self.dispatcher.subscribe()
    }

    /// Attach a connected transport and start pumping its events. The pump
    /// runs until the transport closes its sender side.
    pub fn attach_channel(
        &self,
        channel: Arc<dyn RealtimeChannel>,
        events: mpsc::Receiver<InboundEvent>,
    ) {
        *self.channel.write().unwrap() = Some(channel);
        self.connected.store(true, Ordering::SeqCst);
        info!("Realtime channel attached for {}", self.user.user_name);

        let client = self.clone();
        tokio::spawn(async move {
            client.run_event_pump(events).await;
        });
    }

    /// Drop the transport. Typing state fail-safes to Idle everywhere;
    /// pending optimistic messages keep their own timeout clocks.
    pub async fn disconnect(&self) {
        self.handle_disconnected().await;
    }

    pub(crate) fn channel(&self) -> Option<Arc<dyn RealtimeChannel>> {
        self.channel.read().unwrap().clone()
    }

    pub(crate) async fn active_conversation_id(&self) -> Option<String> {
        self.store
            .lock()
            .await
            .active_conversation()
            .map(String::from)
    }

    /// Peer currently typing in `conversation_id`, if any.
    pub async fn peer_typing(&self, conversation_id: &str) -> Option<String> {
        self.typing
            .lock()
            .await
            .peer_typing(conversation_id, tokio::time::Instant::now())
            .map(String::from)
    }

    async fn run_event_pump(&self, mut events: mpsc::Receiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                InboundEvent::MessageReceived { conv_id, message } => {
                    self.apply_incoming(conv_id, message).await;
                }
                InboundEvent::TypingStarted { user_name } => {
                    self.handle_typing_started(user_name).await;
                }
                InboundEvent::TypingStopped { user_name } => {
                    self.handle_typing_stopped(user_name).await;
                }
                InboundEvent::ConversationCreated {
                    conversation,
                    initiator,
                } => {
                    self.handle_conversation_created(conversation, initiator).await;
                }
                InboundEvent::Disconnected => {
                    self.handle_disconnected().await;
                }
            }
        }
        debug!("Event pump for {} ended", self.user.user_name);
    }

    async fn handle_disconnected(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.channel.write().unwrap() = None;
        info!("Realtime channel for {} disconnected", self.user.user_name);

        let cleared = {
            let mut typing = self.typing.lock().await;
            typing.clear_all()
        };
        for conversation_id in cleared {
            self.dispatcher.broadcast(Notification::Typing {
                conversation_id,
                peer_name: None,
            });
        }
        self.dispatcher.broadcast(Notification::Disconnected);
    }
}
