//! Session controller tying the presence channel, the message pipeline and
//! the conversation cache together.
//!
//! All mutable chat state lives in one [`ChatState`] behind a mutex owned by
//! the session. Every mutation goes through [`ChatSession::with_state`], which
//! publishes the resulting [`StateChange`]s on the state bus while the lock is
//! still held, so subscribers observe changes in the order they were applied.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chat_api::{ClientEvent, NewMessage, PeerId, ServerEvent, StoredMessage, UserProfile};
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheEvent, Conversation};
use crate::codec::{decode_event, encode_event};
use crate::error::ChatError;
use crate::events::{StateBus, StateChange, Subscription};
use crate::message::{ChatMessage, TempId};
use crate::presence::PresenceState;
use crate::store::MessageStore;
use crate::transport::{Inbound, Transport};

/// Text shown to the user when a durable write fails.
pub const SEND_FAILED: &str = "Message could not be sent. Please try again later.";

/// What to do when the relay connection drops unexpectedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Zero disables reconnecting.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Exponential backoff capped at `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::never()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound for every persistence request.
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::never(),
        }
    }
}

/// Read-only copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub self_id: PeerId,
    pub connected: bool,
    pub presence: PresenceState,
    pub conversation: Conversation,
    pub users: Vec<UserProfile>,
    pub users_loading: bool,
    pub users_error: Option<String>,
}

struct ChannelHandle {
    outgoing: UnboundedSender<String>,
    writer: JoinHandle<()>,
    epoch: u64,
}

struct ChatState {
    presence: PresenceState,
    conversation: Conversation,
    users: Vec<UserProfile>,
    users_loading: bool,
    users_error: Option<String>,
    channel: Option<ChannelHandle>,
    /// Live between `open` and `close`; cancels the channel task and any
    /// pending reconnect.
    token: Option<CancellationToken>,
    next_epoch: u64,
    bus: StateBus,
}

struct Shared {
    state: Mutex<ChatState>,
    /// Serialises open, close and reconnect.
    lifecycle: tokio::sync::Mutex<()>,
}

/// One authenticated user's chat session.
#[derive(Clone)]
pub struct ChatSession {
    self_id: PeerId,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    shared: Arc<Shared>,
}

impl ChatSession {
    pub fn new(
        self_id: PeerId,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let state = ChatState {
            presence: PresenceState::default(),
            conversation: Conversation::new(self_id.clone()),
            users: Vec::new(),
            users_loading: false,
            users_error: None,
            channel: None,
            token: None,
            next_epoch: 0,
            bus: StateBus::new(),
        };
        Self {
            self_id,
            store,
            transport,
            options,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().channel.is_some()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let st = self.shared.state.lock();
        ChatSnapshot {
            self_id: self.self_id.clone(),
            connected: st.channel.is_some(),
            presence: st.presence.clone(),
            conversation: st.conversation.clone(),
            users: st.users.clone(),
            users_loading: st.users_loading,
            users_error: st.users_error.clone(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.state.lock().bus.subscribe()
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared.state.lock().bus.unsubscribe(id)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ChatState, &mut Vec<StateChange>) -> R) -> R {
        let mut st = self.shared.state.lock();
        let mut changes = Vec::new();
        let out = f(&mut st, &mut changes);
        for change in changes {
            st.bus.publish(change);
        }
        out
    }

    fn apply_cache(&self, event: CacheEvent) {
        self.with_state(|st, changes| {
            if st.conversation.apply(event) {
                changes.push(StateChange::ConversationChanged);
            }
        });
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, ChatError>>,
    ) -> Result<T, ChatError> {
        let limit = self.options.request_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(ChatError::Timeout(limit)),
        }
    }

    /// Open the presence channel and announce ourselves. A no-op while a
    /// channel is already open.
    pub async fn open(&self) -> Result<(), ChatError> {
        let _guard = self.shared.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        let token = CancellationToken::new();
        let (incoming, epoch) = self.establish(&token).await?;
        tokio::spawn(self.clone().supervise(incoming, token, epoch));
        Ok(())
    }

    /// Tear the channel down and forget all presence state. Frames already
    /// queued (a relayed message, an activity) are written before this returns.
    pub async fn close(&self) {
        let _guard = self.shared.lifecycle.lock().await;
        let channel = self.with_state(|st, changes| {
            if let Some(token) = st.token.take() {
                token.cancel();
            }
            let channel = st.channel.take();
            if channel.is_some() {
                changes.push(StateChange::Disconnected { reason: None });
            }
            if st.presence != PresenceState::default() {
                st.presence.clear();
                changes.push(StateChange::PresenceChanged);
            }
            channel
        });
        let Some(ChannelHandle { outgoing, writer, .. }) = channel else {
            return;
        };
        drop(outgoing);
        match tokio::time::timeout(self.options.request_timeout, writer).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "relay writer task failed"),
            Err(_) => warn!("relay writer did not flush before close"),
        }
        info!(peer = %self.self_id, "presence channel closed");
    }

    async fn establish(
        &self,
        token: &CancellationToken,
    ) -> Result<(UnboundedReceiver<Inbound>, u64), ChatError> {
        let link = match self.transport.connect().await {
            Ok(link) => link,
            Err(err) => {
                warn!(error = %err, "presence channel connect failed");
                self.with_state(|_, changes| {
                    changes.push(StateChange::Disconnected {
                        reason: Some(err.to_string()),
                    })
                });
                return Err(err);
            }
        };
        let announce = encode_event(&ClientEvent::UserConnected {
            user_id: self.self_id.clone(),
        })?;
        link.outgoing
            .send(announce)
            .map_err(|_| ChatError::NotConnected)?;
        let epoch = self.with_state(|st, changes| {
            st.next_epoch += 1;
            st.channel = Some(ChannelHandle {
                outgoing: link.outgoing,
                writer: link.writer,
                epoch: st.next_epoch,
            });
            st.token = Some(token.clone());
            changes.push(StateChange::Connected);
            st.next_epoch
        });
        info!(peer = %self.self_id, "presence channel open");
        Ok((link.incoming, epoch))
    }

    /// Channel task: handles inbound frames one at a time and applies the
    /// reconnect policy when the link drops.
    async fn supervise(
        self,
        mut incoming: UnboundedReceiver<Inbound>,
        token: CancellationToken,
        mut epoch: u64,
    ) {
        loop {
            let reason = loop {
                let inbound = tokio::select! {
                    _ = token.cancelled() => return,
                    inbound = incoming.recv() => inbound,
                };
                match inbound {
                    Some(Inbound::Frame(text)) => match decode_event(&text) {
                        Ok(event) => self.handle_event(event),
                        Err(err) => warn!(error = %err, "skipping relay frame"),
                    },
                    Some(Inbound::Closed { reason }) => break reason,
                    None => break None,
                }
            };
            if token.is_cancelled() {
                return;
            }
            self.channel_lost(epoch, reason);
            match self.reconnect(&token).await {
                Some((next_incoming, next_epoch)) => {
                    incoming = next_incoming;
                    epoch = next_epoch;
                }
                None => return,
            }
        }
    }

    fn channel_lost(&self, epoch: u64, reason: Option<String>) {
        warn!(reason = ?reason, "presence channel disconnected");
        self.with_state(|st, changes| {
            if st.channel.as_ref().map(|c| c.epoch) != Some(epoch) {
                return;
            }
            st.channel = None;
            st.presence.clear();
            changes.push(StateChange::Disconnected { reason });
            changes.push(StateChange::PresenceChanged);
        });
    }

    async fn reconnect(
        &self,
        token: &CancellationToken,
    ) -> Option<(UnboundedReceiver<Inbound>, u64)> {
        let policy = self.options.reconnect;
        for attempt in 0..policy.max_attempts {
            tokio::select! {
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(policy.delay(attempt)) => {}
            }
            let _guard = self.shared.lifecycle.lock().await;
            if token.is_cancelled() || self.is_connected() {
                return None;
            }
            debug!(attempt, "reconnecting presence channel");
            match self.establish(token).await {
                Ok(link) => return Some(link),
                Err(err) => warn!(attempt, error = %err, "reconnect failed"),
            }
        }
        self.with_state(|st, _| {
            if st.channel.is_none() {
                st.token = None;
            }
        });
        None
    }

    fn handle_event(&self, event: ServerEvent) {
        self.with_state(|st, changes| match event {
            ServerEvent::ReceiveMessage { message } | ServerEvent::MessageSent { message } => {
                if st.conversation.apply(CacheEvent::Relay(message.clone())) {
                    changes.push(StateChange::ConversationChanged);
                }
                changes.push(StateChange::MessageRelayed(message));
            }
            presence @ (ServerEvent::UsersOnline { .. }
            | ServerEvent::Activities { .. }
            | ServerEvent::UserConnected { .. }
            | ServerEvent::UserDisconnected { .. }
            | ServerEvent::ActivityUpdated { .. }) => {
                if st.presence.apply(&presence) {
                    changes.push(StateChange::PresenceChanged);
                }
            }
        });
    }

    /// Best-effort write to the relay.
    fn relay(&self, event: &ClientEvent) -> Result<(), ChatError> {
        let outgoing = self
            .shared
            .state
            .lock()
            .channel
            .as_ref()
            .map(|c| c.outgoing.clone())
            .ok_or(ChatError::NotConnected)?;
        outgoing
            .send(encode_event(event)?)
            .map_err(|_| ChatError::Channel("relay link closed".into()))
    }

    /// Send a message: optimistic insert, durable write, then reconcile and
    /// relay. The pending entry is visible before this future first yields.
    pub async fn send(
        &self,
        receiver: &PeerId,
        sender: &PeerId,
        content: &str,
    ) -> Result<StoredMessage, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }
        let temp_id = TempId::generate();
        let pending = ChatMessage::pending(
            temp_id.clone(),
            sender.clone(),
            receiver.clone(),
            content.to_string(),
        );
        self.with_state(|st, changes| {
            st.conversation.apply(CacheEvent::ClearMessageError);
            st.conversation.apply(CacheEvent::Insert(pending));
            changes.push(StateChange::ConversationChanged);
        });

        let request = NewMessage {
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            content: content.to_string(),
        };
        match self.bounded(self.store.create(&request)).await {
            Ok(stored) => {
                self.apply_cache(CacheEvent::Confirm {
                    temp_id,
                    message: stored.clone(),
                });
                let relayed = ClientEvent::SendMessage {
                    sender_id: stored.sender_id.clone(),
                    receiver_id: stored.receiver_id.clone(),
                    content: stored.content.clone(),
                    message: stored.clone(),
                };
                if let Err(err) = self.relay(&relayed) {
                    debug!(error = %err, id = %stored.id, "message persisted but not relayed");
                }
                info!(id = %stored.id, to = %receiver, "message confirmed");
                Ok(stored)
            }
            Err(err) => {
                warn!(temp_id = %temp_id, error = %err, "durable write failed");
                self.apply_cache(CacheEvent::Fail {
                    temp_id,
                    reason: err.to_string(),
                    error: SEND_FAILED.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Make `peer` the active conversation and load its history. Failures
    /// are recorded in the conversation's `fetch_error`.
    pub async fn select(&self, peer: Option<PeerId>) {
        let generation = self.with_state(|st, changes| {
            st.conversation.apply(CacheEvent::Select { peer: peer.clone() });
            changes.push(StateChange::ConversationChanged);
            st.conversation.generation()
        });
        let Some(peer) = peer else {
            return;
        };
        match self.bounded(self.store.history(&self.self_id, &peer)).await {
            Ok(messages) => {
                debug!(peer = %peer, count = messages.len(), "history loaded");
                self.apply_cache(CacheEvent::History {
                    generation,
                    messages,
                });
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "history fetch failed");
                self.apply_cache(CacheEvent::FetchFailed {
                    generation,
                    error: err.to_string(),
                });
            }
        }
    }

    pub async fn clear_selection(&self) {
        self.select(None).await
    }

    /// Reset the history fetch error without touching messages.
    pub fn clear_error(&self) {
        self.apply_cache(CacheEvent::ClearError);
    }

    pub fn clear_message_error(&self) {
        self.apply_cache(CacheEvent::ClearMessageError);
    }

    /// Load the user directory. Failures are recorded in `users_error`.
    pub async fn fetch_users(&self) {
        self.with_state(|st, changes| {
            st.users_loading = true;
            st.users_error = None;
            changes.push(StateChange::UsersChanged);
        });
        let result = self.bounded(self.store.users(&self.self_id)).await;
        self.with_state(|st, changes| {
            st.users_loading = false;
            match result {
                Ok(users) => st.users = users,
                Err(err) => {
                    warn!(error = %err, "user directory fetch failed");
                    st.users_error = Some(err.to_string());
                }
            }
            changes.push(StateChange::UsersChanged);
        });
    }

    /// Publish our own activity label to peers.
    pub fn set_activity(&self, activity: &str) -> Result<(), ChatError> {
        self.relay(&ClientEvent::UpdateActivity {
            user_id: self.self_id.clone(),
            activity: activity.to_string(),
        })
    }
}
