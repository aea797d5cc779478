// Common test utilities for integration tests
// Mock collaborators standing in for the REST backend and the socket
// transport, plus shared fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::LevelFilter;
use tokio::sync::mpsc;
use tokio::time::Duration;

use parley::models::{Conversation, Message, MessageStatus, User};
use parley::sync::{
    ChatClient, HistorySource, InboundEvent, MessagePage, OutboundEvent, RealtimeChannel,
    SyncConfig, SyncError,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        user_name: id.to_string(),
        profile_pic: None,
        online: true,
    }
}

pub fn conv(id: &str, peer: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        creator: user("me"),
        recipient: user(peer),
        created_at: base_time(),
        last_message_preview: None,
    }
}

pub fn wire_msg(id: &str, conv_id: &str, author: &str, content: &str, at_secs: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conv_id.to_string(),
        author_id: author.to_string(),
        content: content.to_string(),
        attachment: None,
        created_at: base_time() + chrono::Duration::seconds(at_secs),
        status: MessageStatus::Confirmed,
        nonce: None,
    }
}

/// Scriptable stand-in for the REST backend.
pub struct MockHistory {
    pages: Mutex<HashMap<(String, usize), Vec<Message>>>,
    get_delays: Mutex<HashMap<String, Duration>>,
    create_delay: Mutex<Duration>,
    fail_gets: AtomicBool,
    fail_creates: AtomicBool,
    next_id: AtomicU64,
    pub created: Mutex<Vec<Message>>,
}

impl MockHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(HashMap::new()),
            get_delays: Mutex::new(HashMap::new()),
            create_delay: Mutex::new(Duration::from_millis(0)),
            fail_gets: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn set_page(&self, conv_id: &str, page: usize, messages: Vec<Message>) {
        self.pages
            .lock()
            .unwrap()
            .insert((conv_id.to_string(), page), messages);
    }

    /// Delay history responses for one conversation (to simulate a slow
    /// fetch racing a conversation switch).
    pub fn set_get_delay(&self, conv_id: &str, delay: Duration) {
        self.get_delays
            .lock()
            .unwrap()
            .insert(conv_id.to_string(), delay);
    }

    /// Delay message-create acks (to simulate a slow or dead server).
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistorySource for MockHistory {
    async fn get_messages(
        &self,
        conversation_id: &str,
        _limit: usize,
        page: usize,
    ) -> Result<MessagePage, SyncError> {
        let delay = self
            .get_delays
            .lock()
            .unwrap()
            .get(conversation_id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(SyncError::Transient("mock history unavailable".to_string()));
        }
        let messages = self
            .pages
            .lock()
            .unwrap()
            .get(&(conversation_id.to_string(), page))
            .cloned()
            .unwrap_or_default();
        Ok(MessagePage {
            id: conversation_id.to_string(),
            messages,
        })
    }

    async fn create_message(
        &self,
        content: &str,
        conversation_id: &str,
        nonce: &str,
    ) -> Result<Message, SyncError> {
        let delay = *self.create_delay.lock().unwrap();
        if delay > Duration::from_millis(0) {
            tokio::time::sleep(delay).await;
        }
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(SyncError::Transient("mock create failed".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id: format!("srv-{}", n),
            conversation_id: conversation_id.to_string(),
            author_id: "me".to_string(),
            content: content.to_string(),
            attachment: None,
            created_at: Utc::now(),
            status: MessageStatus::Confirmed,
            nonce: Some(nonce.to_string()),
        };
        self.created.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn create_conversation(
        &self,
        peer_name: &str,
        _mode: &str,
    ) -> Result<Conversation, SyncError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(SyncError::Transient("mock create failed".to_string()));
        }
        Ok(conv(&format!("conv-{}", peer_name), peer_name))
    }
}

/// Records every outbound event instead of sending it anywhere.
#[derive(Default)]
pub struct MockChannel {
    pub sent: Mutex<Vec<OutboundEvent>>,
}

impl MockChannel {
    pub fn sent_events(&self) -> Vec<OutboundEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_typing_events(&self) -> (usize, usize) {
        let sent = self.sent.lock().unwrap();
        let starts = sent
            .iter()
            .filter(|e| matches!(e, OutboundEvent::TypingStart { .. }))
            .count();
        let stops = sent
            .iter()
            .filter(|e| matches!(e, OutboundEvent::TypingStop { .. }))
            .count();
        (starts, stops)
    }
}

#[async_trait]
impl RealtimeChannel for MockChannel {
    async fn send(&self, event: OutboundEvent) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(event);
        Ok(())
    }
}

pub fn test_client(history: Arc<MockHistory>) -> ChatClient {
    setup_logging();
    ChatClient::new(user("me"), history, SyncConfig::default())
}

/// Attach a recording channel and hand back the inbound event injector.
pub fn attach_mock_channel(client: &ChatClient) -> (Arc<MockChannel>, mpsc::Sender<InboundEvent>) {
    let channel = Arc::new(MockChannel::default());
    let (tx, rx) = mpsc::channel(100);
    client.attach_channel(channel.clone(), rx);
    (channel, tx)
}

/// Let the pump and timer tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
