//! Client state machine.
//!
//! [`ChatClient`] wires the connection, subscriptions, reconciler and typing
//! tracker around one [`ConversationStore`]. Every input is a
//! [`ClientEvent`]; every side effect comes back as a [`ClientAction`].

use std::{collections::BTreeMap, time::Duration};

use rxchat_core::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, Environment,
};
use rxchat_proto::{
    ClientFrame, Destination, OutboundMessage, PresenceStatus, Role, ServerFrame, ThreadId, Topic,
    TypingSignal, UserId, normalize_message,
};
use serde_json::{Map, Value};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent},
    reconcile::{DEFAULT_MATCH_WINDOW, InboundOutcome, MessageReconciler},
    store::{ConversationStore, Message, StoreSnapshot},
    subscriptions::{ChannelSet, RoomSubscriptionManager, RoutedFrame},
    typing::{DEFAULT_TYPING_EXPIRY, TypingPresenceTracker},
};

/// Minimum spacing between repeated "still typing" publishes.
pub const DEFAULT_TYPING_KEEPALIVE: Duration = Duration::from_millis(1_500);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection lifecycle settings
    pub connection: ConnectionConfig,
    /// Reconciliation match window
    pub match_window: Duration,
    /// Typing flag lifetime, for peers and for our own outbound signal
    pub typing_expiry: Duration,
    /// Minimum spacing between outbound "still typing" signals
    pub typing_keepalive: Duration,
    /// Mark pending messages failed after this long. `None` leaves them
    /// pending until the caller sends [`ClientEvent::MarkFailed`].
    pub delivery_timeout: Option<Duration>,
    /// Optional channels subscribed for the active thread
    pub channels: ChannelSet,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            match_window: DEFAULT_MATCH_WINDOW,
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            typing_keepalive: DEFAULT_TYPING_KEEPALIVE,
            delivery_timeout: None,
            channels: ChannelSet::ALL,
        }
    }
}

impl ClientConfig {
    /// Replace the connection settings.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Replace the reconciliation match window.
    #[must_use]
    pub fn with_match_window(mut self, window: Duration) -> Self {
        self.match_window = window;
        self
    }

    /// Replace the typing expiry.
    #[must_use]
    pub fn with_typing_expiry(mut self, expiry: Duration) -> Self {
        self.typing_expiry = expiry;
        self
    }

    /// Replace the outbound typing keepalive.
    #[must_use]
    pub fn with_typing_keepalive(mut self, keepalive: Duration) -> Self {
        self.typing_keepalive = keepalive;
        self
    }

    /// Enable automatic failure of unconfirmed messages.
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    /// Replace the subscribed channel set.
    #[must_use]
    pub fn with_channels(mut self, channels: ChannelSet) -> Self {
        self.channels = channels;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Identity {
    user_id: UserId,
    role: Role,
}

/// Our own typing signal for one thread.
#[derive(Debug, Clone, Copy)]
struct OutboundTyping<I> {
    thread_id: ThreadId,
    last_sent: I,
    last_input: I,
}

/// Chat synchronization state machine.
pub struct ChatClient<E: Environment> {
    env: E,
    config: ClientConfig,
    connection: ConnectionManager<E::Instant>,
    subscriptions: RoomSubscriptionManager,
    reconciler: MessageReconciler,
    typing: TypingPresenceTracker<E::Instant>,
    store: ConversationStore,
    identity: Option<Identity>,
    next_local_id: u64,
    /// Monotonic send time of each pending message, for the delivery timeout
    pending_since: BTreeMap<(ThreadId, u64), E::Instant>,
    outbound_typing: Option<OutboundTyping<E::Instant>>,
}

impl<E: Environment> ChatClient<E> {
    /// Create a disconnected client with an empty store.
    pub fn new(env: E, config: ClientConfig) -> Self {
        let seed = env.random_u64();
        Self {
            connection: ConnectionManager::new(config.connection.clone(), seed),
            subscriptions: RoomSubscriptionManager::new(),
            reconciler: MessageReconciler::new(config.match_window),
            typing: TypingPresenceTracker::new(config.typing_expiry),
            store: ConversationStore::new(),
            identity: None,
            next_local_id: 1,
            pending_since: BTreeMap::new(),
            outbound_typing: None,
            env,
            config,
        }
    }

    /// Authoritative state.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Immutable copy of the state for observers.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Live room subscriptions.
    pub fn subscriptions(&self) -> &RoomSubscriptionManager {
        &self.subscriptions
    }

    /// Signed-in user, once [`ClientEvent::Connect`] was accepted.
    pub fn local_user(&self) -> Option<UserId> {
        self.identity.map(|identity| identity.user_id)
    }

    /// Whether anyone but the local user is typing in a thread.
    pub fn is_anyone_typing(&self, thread_id: ThreadId) -> bool {
        self.typing.is_anyone_typing(thread_id, self.local_user(), self.env.now())
    }

    /// Earliest instant at which a [`ClientEvent::Tick`] has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        let outbound = self
            .outbound_typing
            .map(|typing| typing.last_input + self.config.typing_expiry);
        let delivery = self.config.delivery_timeout.and_then(|timeout| {
            self.pending_since.values().min().map(|since| *since + timeout)
        });

        [self.connection.next_deadline(), self.typing.next_deadline(), outbound, delivery]
            .into_iter()
            .flatten()
            .min()
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` for lifecycle events that do not fit the
    ///   connection state, e.g. `Connect` while already connected
    /// - `ClientError::EmptyMessage` / `ClientError::NotSignedIn` for sends
    ///   that cannot be issued
    /// - `ClientError::MessageNotFound` / `ClientError::UnexpectedStatus` for
    ///   `MarkFailed` and `RetryMessage` on the wrong message
    ///
    /// Malformed inbound frames are never errors. They are logged and dropped.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let mut actions = match event {
            ClientEvent::Connect { credentials } => {
                let now = self.env.now();
                let connection = self.connection.connect(credentials.clone(), now)?;
                self.identity = Some(Identity { user_id: credentials.user_id, role: credentials.role });
                self.store.set_local_user(Some(credentials.user_id));
                self.map_connection(connection)?
            },
            ClientEvent::Disconnect => self.handle_disconnect()?,
            ClientEvent::TransportOpened => {
                let connection = self.connection.on_transport_open(self.env.now())?;
                self.map_connection(connection)?
            },
            ClientEvent::TransportOpenFailed { reason } => {
                let connection = self.connection.on_open_failed(&reason, self.env.now());
                self.map_connection(connection)?
            },
            ClientEvent::TransportClosed { reason } => {
                let connection = self.connection.on_transport_closed(&reason, self.env.now());
                self.map_connection(connection)?
            },
            ClientEvent::FrameReceived(frame) => self.handle_frame(frame)?,
            ClientEvent::Tick { now } => self.handle_tick(now)?,
            ClientEvent::SendMessage { thread_id, content, metadata } => {
                self.handle_send(thread_id, content, metadata)?
            },
            ClientEvent::SetTyping { thread_id, is_typing } => {
                self.handle_set_typing(thread_id, is_typing)?
            },
            ClientEvent::SetActiveThread(target) => self.handle_set_active(target)?,
            ClientEvent::UpsertThread(thread) => {
                self.store.upsert_thread(thread);
                Vec::new()
            },
            ClientEvent::LoadThreads(threads) => {
                self.store.load_threads(threads);
                Vec::new()
            },
            ClientEvent::LoadHistory { thread_id, page } => self.handle_history(thread_id, &page),
            ClientEvent::MarkFailed { thread_id, local_id } => {
                self.store.mark_failed(thread_id, local_id)?;
                self.pending_since.remove(&(thread_id, local_id));
                vec![ClientAction::MessageFailed { thread_id, local_id }]
            },
            ClientEvent::RetryMessage { thread_id, local_id } => {
                if self.identity.is_none() {
                    return Err(ClientError::NotSignedIn);
                }
                let failed = self.store.take_failed(thread_id, local_id)?;
                tracing::info!(thread_id, local_id, "retrying failed message");
                self.handle_send(thread_id, failed.content, failed.metadata)?
            },
        };

        if self.store.set_connection_state(self.connection.state(), self.connection.attempt()) {
            actions.push(ClientAction::StateChanged {
                state: self.connection.state(),
                attempt: self.connection.attempt(),
            });
        }
        Ok(actions)
    }

    fn map_connection(
        &mut self,
        connection: Vec<ConnectionAction>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let mut actions = Vec::with_capacity(connection.len());
        for action in connection {
            match action {
                ConnectionAction::OpenTransport { attempt } => {
                    actions.push(ClientAction::OpenTransport { attempt });
                },
                ConnectionAction::Send(frame) => actions.push(ClientAction::Send(frame)),
                ConnectionAction::CloseTransport => actions.push(ClientAction::CloseTransport),
                ConnectionAction::RetryScheduled { attempt, delay } => {
                    actions.push(ClientAction::RetryScheduled { attempt, delay });
                },
                ConnectionAction::Established { resumed } => {
                    actions.push(ClientAction::Connected { resumed });
                    actions.extend(self.restore_subscriptions()?);
                },
                ConnectionAction::Failed(error) => actions.push(ClientAction::ConnectFailed(error)),
            }
        }
        Ok(actions)
    }

    /// Server-side subscriptions do not survive a new transport, so every
    /// session re-announces the live rooms, including the active thread if
    /// it has no subscription yet.
    fn restore_subscriptions(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let mut frames = self.subscriptions.resubscribe_all()?;
        if let Some(active) = self.store.active_thread() {
            if !self.subscriptions.is_subscribed(active) {
                let (_, subscribe) = self.subscriptions.subscribe(active, self.config.channels)?;
                frames.extend(subscribe);
            }
        }
        Ok(self.gate(frames))
    }

    fn handle_disconnect(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let mut frames = Vec::new();
        if let Some(typing) = self.outbound_typing.take() {
            frames.push(self.typing_frame(typing.thread_id, false)?);
        }
        frames.extend(self.subscriptions.unsubscribe_all()?);

        let mut actions = self.gate(frames);
        let connection = self.connection.disconnect();
        actions.extend(self.map_connection(connection)?);
        self.typing.clear(&mut self.store);

        tracing::info!("disconnected");
        Ok(actions)
    }

    fn handle_frame(&mut self, frame: ServerFrame) -> Result<Vec<ClientAction>, ClientError> {
        let now = self.env.now();
        match frame {
            ServerFrame::AuthSuccess { session_id } => {
                match self.connection.on_auth_success(session_id, now) {
                    Ok(connection) => self.map_connection(connection),
                    Err(error) => {
                        tracing::warn!(%error, "ignoring unexpected auth_success");
                        Ok(Vec::new())
                    },
                }
            },
            ServerFrame::AuthError { message } => {
                match self.connection.on_auth_error(message, now) {
                    Ok(connection) => self.map_connection(connection),
                    Err(error) => {
                        tracing::warn!(%error, "ignoring unexpected auth_error");
                        Ok(Vec::new())
                    },
                }
            },
            ServerFrame::Error { message } => {
                tracing::warn!(%message, "server error");
                Ok(Vec::new())
            },
            ServerFrame::Message { topic, body } => Ok(self.handle_broadcast(&topic, body, now)),
        }
    }

    fn handle_broadcast(&mut self, topic: &Topic, body: Value, now: E::Instant) -> Vec<ClientAction> {
        let routed = match self.subscriptions.route(topic, body) {
            Ok(Some(routed)) => routed,
            Ok(None) => return Vec::new(),
            Err(error) => {
                tracing::warn!(%topic, %error, "dropping malformed broadcast");
                return Vec::new();
            },
        };

        match routed {
            RoutedFrame::Message { thread_id, body } => {
                match self.reconciler.apply_inbound(&body, Some(thread_id), &mut self.store) {
                    Ok(InboundOutcome::Duplicate { .. }) => Vec::new(),
                    Ok(InboundOutcome::Reconciled { thread_id, local_id, server_id }) => {
                        self.pending_since.remove(&(thread_id, local_id));
                        vec![ClientAction::MessageConfirmed { thread_id, local_id, server_id }]
                    },
                    Ok(InboundOutcome::Inserted { thread_id, server_id, .. }) => {
                        vec![ClientAction::MessageReceived { thread_id, server_id }]
                    },
                    Err(error) => {
                        tracing::warn!(%topic, %error, "dropping malformed message");
                        Vec::new()
                    },
                }
            },
            RoutedFrame::Typing { thread_id, signal } => {
                if Some(signal.user_id) != self.local_user() {
                    self.typing.set_typing(
                        thread_id,
                        signal.user_id,
                        signal.is_typing,
                        now,
                        &mut self.store,
                    );
                }
                Vec::new()
            },
            RoutedFrame::Presence { signal, .. } => {
                match signal.status {
                    PresenceStatus::Join => self.typing.mark_online(signal.user_id, &mut self.store),
                    PresenceStatus::Leave => {
                        self.typing.mark_offline(signal.user_id, &mut self.store)
                    },
                };
                Vec::new()
            },
        }
    }

    fn handle_send(
        &mut self,
        thread_id: ThreadId,
        content: String,
        metadata: Map<String, Value>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if content.trim().is_empty() && metadata.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let Some(identity) = self.identity else {
            return Err(ClientError::NotSignedIn);
        };

        let frame = self.subscriptions.publish(
            Destination::Send(thread_id),
            &OutboundMessage {
                chat_room_id: thread_id,
                text: content.clone(),
                sender_id: identity.user_id,
                sender_type: identity.role,
                metadata: metadata.clone(),
            },
        )?;

        let local_id = self.next_local_id;
        self.next_local_id += 1;
        let message = Message::optimistic(
            local_id,
            thread_id,
            identity.user_id,
            content,
            self.env.wall_clock(),
            metadata,
        );
        self.reconciler.apply_optimistic(message, &mut self.store);
        self.pending_since.insert((thread_id, local_id), self.env.now());

        let mut actions = vec![ClientAction::MessagePending { thread_id, local_id }];
        actions.extend(self.gate(vec![frame]));
        actions.extend(self.stop_outbound_typing(thread_id)?);
        Ok(actions)
    }

    fn handle_set_typing(
        &mut self,
        thread_id: ThreadId,
        is_typing: bool,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if !is_typing {
            return self.stop_outbound_typing(thread_id);
        }
        if self.identity.is_none() {
            return Err(ClientError::NotSignedIn);
        }

        let now = self.env.now();
        let mut actions = Vec::new();
        match self.outbound_typing {
            Some(mut typing) if typing.thread_id == thread_id => {
                typing.last_input = now;
                if now - typing.last_sent < self.config.typing_keepalive {
                    self.outbound_typing = Some(typing);
                    return Ok(actions);
                }
            },
            Some(typing) => actions.extend(self.stop_outbound_typing(typing.thread_id)?),
            None => {},
        }

        let frame = self.typing_frame(thread_id, true)?;
        actions.extend(self.gate(vec![frame]));
        self.outbound_typing = Some(OutboundTyping { thread_id, last_sent: now, last_input: now });
        Ok(actions)
    }

    fn stop_outbound_typing(&mut self, thread_id: ThreadId) -> Result<Vec<ClientAction>, ClientError> {
        match self.outbound_typing {
            Some(typing) if typing.thread_id == thread_id => {
                self.outbound_typing = None;
                let frame = self.typing_frame(thread_id, false)?;
                Ok(self.gate(vec![frame]))
            },
            _ => Ok(Vec::new()),
        }
    }

    fn typing_frame(&self, thread_id: ThreadId, is_typing: bool) -> Result<ClientFrame, ClientError> {
        let user_id = self.local_user().ok_or(ClientError::NotSignedIn)?;
        Ok(self.subscriptions.publish(
            Destination::Typing(thread_id),
            &TypingSignal { chat_room_id: Some(thread_id), is_typing, user_id, user_name: None },
        )?)
    }

    fn handle_set_active(
        &mut self,
        target: Option<ThreadId>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let previous = self.store.set_active_thread(target);

        let mut actions = Vec::new();
        if let Some(previous) = previous.filter(|previous| Some(*previous) != target) {
            self.typing.clear_thread(previous, &mut self.store);
            actions.extend(self.stop_outbound_typing(previous)?);
        }

        let frames = self.subscriptions.switch_to(target, self.config.channels)?;
        actions.extend(self.gate(frames));
        Ok(actions)
    }

    fn handle_history(&mut self, thread_id: ThreadId, page: &[Value]) -> Vec<ClientAction> {
        let messages: Vec<_> = page
            .iter()
            .filter_map(|raw| match normalize_message(raw) {
                Ok(normalized) => Some(Message::confirmed(normalized, thread_id)),
                Err(error) => {
                    tracing::warn!(thread_id, %error, "skipping malformed history entry");
                    None
                },
            })
            .collect();

        let outcomes = self.reconciler.apply_history(thread_id, messages, &mut self.store);
        let mut inserted = 0;
        let mut actions = Vec::new();
        for outcome in outcomes {
            match outcome {
                InboundOutcome::Reconciled { thread_id, local_id, server_id } => {
                    self.pending_since.remove(&(thread_id, local_id));
                    actions.push(ClientAction::MessageConfirmed { thread_id, local_id, server_id });
                },
                InboundOutcome::Inserted { .. } => inserted += 1,
                InboundOutcome::Duplicate { .. } => {},
            }
        }
        tracing::debug!(thread_id, inserted, confirmed = actions.len(), "merged history page");
        actions
    }

    fn handle_tick(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let connection = self.connection.tick(now);
        let mut actions = self.map_connection(connection)?;

        self.typing.tick(now, &mut self.store);

        if let Some(typing) = self.outbound_typing {
            if now >= typing.last_input && now - typing.last_input >= self.config.typing_expiry {
                actions.extend(self.stop_outbound_typing(typing.thread_id)?);
            }
        }

        if let Some(timeout) = self.config.delivery_timeout {
            let overdue: Vec<_> = self
                .pending_since
                .iter()
                .filter(|(_, since)| now >= **since && now - **since >= timeout)
                .map(|(key, _)| *key)
                .collect();

            for (thread_id, local_id) in overdue {
                self.pending_since.remove(&(thread_id, local_id));
                if self.store.mark_failed(thread_id, local_id).is_ok() {
                    tracing::warn!(thread_id, local_id, "message delivery timed out");
                    actions.push(ClientAction::MessageFailed { thread_id, local_id });
                }
            }
        }

        Ok(actions)
    }

    /// Pass frames through the connection gate. Frames built while not
    /// connected are dropped.
    fn gate(&self, frames: Vec<ClientFrame>) -> Vec<ClientAction> {
        frames
            .into_iter()
            .filter_map(|frame| match self.connection.send(frame) {
                Some(ConnectionAction::Send(frame)) => Some(ClientAction::Send(frame)),
                _ => None,
            })
            .collect()
    }
}
