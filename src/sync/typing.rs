// Typing indicators: a per-conversation debounce state machine for the
// local side, and auto-expiring peer state for the remote side. The
// machine owns plain deadline data; the async drivers below turn deadline
// crossings into channel emissions, so timers are created and cancelled
// deterministically on state transitions.

use anyhow::Result;
use log::{debug, warn};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use super::channel::{Notification, OutboundEvent};
use super::ChatClient;

/// Ephemeral "peer is typing" record; past `expires_at` it counts as absent.
#[derive(Debug, Clone)]
pub struct TypingState {
    pub conversation_id: String,
    pub peer_name: String,
    pub expires_at: Instant,
}

#[derive(Debug)]
struct LocalTyping {
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystrokeAction {
    /// Idle -> Typing: emit exactly one typing:start.
    EmitStart,
    /// Typing -> Typing: deadline refreshed, nothing emitted.
    Refreshed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlinePoll {
    /// The inactivity deadline passed; state is cleared, emit the stop.
    Fire,
    /// Still armed; sleep until this instant and poll again.
    WaitUntil(Instant),
    /// State was cleared elsewhere; nothing to do.
    Idle,
}

pub struct TypingCoordinator {
    debounce: Duration,
    remote_expiry: Duration,
    local: HashMap<String, LocalTyping>,
    remote: HashMap<String, TypingState>,
}

impl TypingCoordinator {
    pub fn new(debounce: Duration, remote_expiry: Duration) -> Self {
        Self {
            debounce,
            remote_expiry,
            local: HashMap::new(),
            remote: HashMap::new(),
        }
    }

    /// Local keystroke. First keystroke arms the inactivity deadline and
    /// asks the caller to emit typing:start; further keystrokes only push
    /// the deadline out (no event flood).
    pub fn keystroke(&mut self, conversation_id: &str, now: Instant) -> KeystrokeAction {
        let deadline = now + self.debounce;
        match self.local.get_mut(conversation_id) {
            Some(local) => {
                local.deadline = deadline;
                KeystrokeAction::Refreshed
            }
            None => {
                self.local
                    .insert(conversation_id.to_string(), LocalTyping { deadline });
                KeystrokeAction::EmitStart
            }
        }
    }

    /// Check the local inactivity deadline.
    pub fn poll_local(&mut self, conversation_id: &str, now: Instant) -> DeadlinePoll {
        match self.local.get(conversation_id) {
            None => DeadlinePoll::Idle,
            Some(local) if now >= local.deadline => {
                self.local.remove(conversation_id);
                DeadlinePoll::Fire
            }
            Some(local) => DeadlinePoll::WaitUntil(local.deadline),
        }
    }

    /// Typing -> Idle outside the deadline path (message submitted).
    /// Returns whether a typing:stop should be emitted.
    pub fn finish_local(&mut self, conversation_id: &str) -> bool {
        self.local.remove(conversation_id).is_some()
    }

    /// Peer started (or kept) typing. Returns true when this set fresh
    /// state, false on a refresh of existing state.
    pub fn remote_started(&mut self, conversation_id: &str, peer_name: &str, now: Instant) -> bool {
        let state = TypingState {
            conversation_id: conversation_id.to_string(),
            peer_name: peer_name.to_string(),
            expires_at: now + self.remote_expiry,
        };
        self.remote.insert(conversation_id.to_string(), state).is_none()
    }

    pub fn remote_stopped(&mut self, conversation_id: &str) -> bool {
        self.remote.remove(conversation_id).is_some()
    }

    /// Check the remote expiry deadline.
    pub fn poll_remote(&mut self, conversation_id: &str, now: Instant) -> DeadlinePoll {
        match self.remote.get(conversation_id) {
            None => DeadlinePoll::Idle,
            Some(state) if now >= state.expires_at => {
                self.remote.remove(conversation_id);
                DeadlinePoll::Fire
            }
            Some(state) => DeadlinePoll::WaitUntil(state.expires_at),
        }
    }

    /// Who is typing in `conversation_id` right now. Expired state is
    /// absent even before its watchdog has swept it.
    pub fn peer_typing(&self, conversation_id: &str, now: Instant) -> Option<&str> {
        self.remote
            .get(conversation_id)
            .filter(|state| now < state.expires_at)
            .map(|state| state.peer_name.as_str())
    }

    /// Fail-safe clear for one conversation (leaving it). Returns whether
    /// remote state was dropped, so the caller can clear the indicator.
    pub fn clear_conversation(&mut self, conversation_id: &str) -> bool {
        self.local.remove(conversation_id);
        self.remote.remove(conversation_id).is_some()
    }

    /// Fail-safe clear on channel disconnect: every conversation back to
    /// Idle. Returns the conversations whose remote indicator was showing.
    pub fn clear_all(&mut self) -> Vec<String> {
        self.local.clear();
        self.remote.drain().map(|(conv, _)| conv).collect()
    }
}

impl ChatClient {
    /// Local keystroke handler for the UI layer.
    pub async fn keystroke(&self, conversation_id: &str) -> Result<()> {
        let action = {
            let mut typing = self.typing.lock().await;
            typing.keystroke(conversation_id, Instant::now())
        };
        if action == KeystrokeAction::EmitStart {
            self.emit_typing(conversation_id, true).await?;
            let client = self.clone();
            let conversation_id = conversation_id.to_string();
            tokio::spawn(async move {
                client.run_local_typing_watchdog(conversation_id).await;
            });
        }
        Ok(())
    }

    /// Typing -> Idle because a message was submitted; emits the stop.
    pub(crate) async fn finish_typing(&self, conversation_id: &str) -> Result<()> {
        let was_typing = {
            let mut typing = self.typing.lock().await;
            typing.finish_local(conversation_id)
        };
        if was_typing {
            self.emit_typing(conversation_id, false).await?;
        }
        Ok(())
    }

    /// Silent cancel of all typing state for a conversation (used when the
    /// active conversation changes). Never leaves a stuck indicator.
    pub async fn clear_typing(&self, conversation_id: &str) {
        let had_remote = {
            let mut typing = self.typing.lock().await;
            typing.clear_conversation(conversation_id)
        };
        if had_remote {
            self.dispatcher.broadcast(Notification::Typing {
                conversation_id: conversation_id.to_string(),
                peer_name: None,
            });
        }
    }

    async fn emit_typing(&self, conversation_id: &str, start: bool) -> Result<()> {
        let Some(channel) = self.channel() else {
            debug!("Typing event for {} skipped: channel not connected", conversation_id);
            return Ok(());
        };
        let event = if start {
            OutboundEvent::TypingStart {
                conv_id: conversation_id.to_string(),
                user_name: self.user.user_name.clone(),
            }
        } else {
            OutboundEvent::TypingStop {
                conv_id: conversation_id.to_string(),
                user_name: self.user.user_name.clone(),
            }
        };
        channel.send(event).await?;
        Ok(())
    }

    /// Owns the inactivity deadline of one Typing episode. Exits when the
    /// deadline fires (emitting exactly one typing:stop) or when the state
    /// was cleared through another path.
    async fn run_local_typing_watchdog(&self, conversation_id: String) {
        loop {
            let poll = {
                let mut typing = self.typing.lock().await;
                typing.poll_local(&conversation_id, Instant::now())
            };
            match poll {
                DeadlinePoll::Idle => return,
                DeadlinePoll::WaitUntil(deadline) => tokio::time::sleep_until(deadline).await,
                DeadlinePoll::Fire => {
                    if let Err(e) = self.emit_typing(&conversation_id, false).await {
                        warn!("Failed to emit typing:stop for {}: {}", conversation_id, e);
                    }
                    return;
                }
            }
        }
    }

    /// Pump path for typing:started. The wire payload only names the peer;
    /// it applies to the active conversation.
    pub(crate) async fn handle_typing_started(&self, user_name: String) {
        let Some(conversation_id) = self.active_conversation_id().await else {
            debug!("typing:started from {} with no active conversation", user_name);
            return;
        };
        let fresh = {
            let mut typing = self.typing.lock().await;
            typing.remote_started(&conversation_id, &user_name, Instant::now())
        };
        self.dispatcher.broadcast(Notification::Typing {
            conversation_id: conversation_id.clone(),
            peer_name: Some(user_name),
        });
        if fresh {
            let client = self.clone();
            tokio::spawn(async move {
                client.run_remote_typing_watchdog(conversation_id).await;
            });
        }
    }

    pub(crate) async fn handle_typing_stopped(&self, user_name: String) {
        let Some(conversation_id) = self.active_conversation_id().await else {
            return;
        };
        let cleared = {
            let mut typing = self.typing.lock().await;
            typing.remote_stopped(&conversation_id)
        };
        if cleared {
            debug!("{} stopped typing in {}", user_name, conversation_id);
            self.dispatcher.broadcast(Notification::Typing {
                conversation_id,
                peer_name: None,
            });
        }
    }

    /// Sweeps the remote indicator when its expiry passes without an
    /// explicit typing:stopped (lost packet, crashed peer).
    async fn run_remote_typing_watchdog(&self, conversation_id: String) {
        loop {
            let poll = {
                let mut typing = self.typing.lock().await;
                typing.poll_remote(&conversation_id, Instant::now())
            };
            match poll {
                DeadlinePoll::Idle => return,
                DeadlinePoll::WaitUntil(deadline) => tokio::time::sleep_until(deadline).await,
                DeadlinePoll::Fire => {
                    debug!("Remote typing state for {} expired", conversation_id);
                    self.dispatcher.broadcast(Notification::Typing {
                        conversation_id,
                        peer_name: None,
                    });
                    return;
                }
            }
        }
    }
}
