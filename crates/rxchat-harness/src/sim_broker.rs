//! In-memory push broker.
//!
//! Stands in for the chat backend behind a [`TransportFactory`]. Each
//! `connect()` creates a session with its own frame channels and a task that
//! processes the client's frames against shared broker state:
//!
//! - `auth` is answered with `auth_success` unless the token is rejected
//! - `subscribe`/`unsubscribe` maintain per-session topic sets
//! - publishes to a send destination are stamped with a server id and the
//!   simulated wall clock, then broadcast on the room's message topic
//! - typing publishes are rebroadcast on the typing topic
//! - join and leave publishes become presence broadcasts
//!
//! Tests steer the broker through failure injection ([`fail_next_opens`],
//! [`reject_token`], [`drop_sessions`]) and delivery control ([`hold`],
//! [`release`]).
//!
//! [`fail_next_opens`]: SimBroker::fail_next_opens
//! [`reject_token`]: SimBroker::reject_token
//! [`drop_sessions`]: SimBroker::drop_sessions
//! [`hold`]: SimBroker::hold
//! [`release`]: SimBroker::release

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rxchat_app::{TransportError, TransportFactory, TransportLink};
use rxchat_core::Environment;
use rxchat_proto::{
    ClientFrame, Destination, OutboundMessage, PresenceSignal, PresenceStatus, ServerFrame, Topic,
    TypingSignal, UserId,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::SimEnv;

/// Frames buffered per direction before a slow side is considered stuck.
const SESSION_CAPACITY: usize = 256;

#[derive(Debug)]
struct Session {
    outbound: mpsc::Sender<ServerFrame>,
    user: Option<UserId>,
    topics: BTreeSet<Topic>,
}

#[derive(Debug, Default)]
struct BrokerState {
    sessions: BTreeMap<u64, Session>,
    next_session: u64,
    next_message: u64,
    open_attempts: u32,
    fail_opens: u32,
    rejected_tokens: HashSet<String>,
    holding: bool,
    held: Vec<(Topic, Value)>,
    received: Vec<ClientFrame>,
}

impl BrokerState {
    fn handle(&mut self, session_id: u64, frame: ClientFrame, env: &SimEnv) {
        self.received.push(frame.clone());

        match frame {
            ClientFrame::Auth { token, user_id, .. } => {
                let reply = if self.rejected_tokens.contains(&token) {
                    ServerFrame::AuthError { message: "invalid token".to_string() }
                } else {
                    if let Some(session) = self.sessions.get_mut(&session_id) {
                        session.user = Some(user_id);
                    }
                    ServerFrame::AuthSuccess { session_id: Some(format!("sess-{session_id}")) }
                };
                self.send_to(session_id, reply);
            },
            ClientFrame::Subscribe { topic } => {
                if let Some(session) = self.authenticated(session_id) {
                    session.topics.insert(topic);
                }
            },
            ClientFrame::Unsubscribe { topic } => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.topics.remove(&topic);
                }
            },
            ClientFrame::Publish { destination, body } => {
                if self.authenticated(session_id).is_none() {
                    self.send_to(session_id, ServerFrame::Error {
                        message: "not authenticated".to_string(),
                    });
                    return;
                }
                self.publish(session_id, destination, body, env);
            },
        }
    }

    fn publish(&mut self, session_id: u64, destination: Destination, body: Value, env: &SimEnv) {
        let user = self.sessions.get(&session_id).and_then(|session| session.user);

        match destination {
            Destination::Send(thread_id) => {
                let Ok(message) = serde_json::from_value::<OutboundMessage>(body) else {
                    self.send_to(session_id, ServerFrame::Error {
                        message: "malformed message".to_string(),
                    });
                    return;
                };
                self.next_message += 1;
                let echo = json!({
                    "id": format!("srv-{}", self.next_message),
                    "chatRoomId": thread_id,
                    "senderId": message.sender_id,
                    "senderType": message.sender_type,
                    "content": message.text,
                    "timestamp": env.wall_clock().to_rfc3339(),
                    "metadata": message.metadata,
                });
                let topic = Topic::messages(thread_id);
                if self.holding {
                    self.held.push((topic, echo));
                } else {
                    self.broadcast(topic, &echo);
                }
            },
            Destination::Typing(thread_id) => {
                if let Ok(signal) = serde_json::from_value::<TypingSignal>(body) {
                    let body = json!(signal);
                    self.broadcast(Topic::typing(thread_id), &body);
                }
            },
            Destination::Join(thread_id) | Destination::Leave(thread_id) => {
                let Some(user_id) = user else { return };
                let status = if matches!(destination, Destination::Join(_)) {
                    PresenceStatus::Join
                } else {
                    PresenceStatus::Leave
                };
                let body = json!(PresenceSignal { user_id, status });
                self.broadcast(Topic::presence(thread_id), &body);
            },
        }
    }

    fn authenticated(&mut self, session_id: u64) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id).filter(|session| session.user.is_some())
    }

    fn broadcast(&mut self, topic: Topic, body: &Value) {
        let frame = ServerFrame::Message { topic, body: body.clone() };
        let receivers: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.topics.contains(&topic))
            .map(|(id, _)| *id)
            .collect();

        tracing::trace!(%topic, receivers = receivers.len(), "broadcast");
        for session_id in receivers {
            self.send_to(session_id, frame.clone());
        }
    }

    fn send_to(&mut self, session_id: u64, frame: ServerFrame) {
        let Some(session) = self.sessions.get(&session_id) else { return };
        if session.outbound.try_send(frame).is_err() {
            tracing::warn!(session_id, "session not draining, dropping it");
            self.sessions.remove(&session_id);
        }
    }
}

/// Simulated backend.
///
/// Cheap to clone; clones share state. Pass one clone to
/// [`ChatService::create`](rxchat_app::ChatService::create) per client and
/// keep another to steer the simulation.
#[derive(Clone)]
pub struct SimBroker {
    env: SimEnv,
    state: Arc<Mutex<BrokerState>>,
}

impl SimBroker {
    /// Broker stamping messages with `env`'s wall clock.
    pub fn new(env: SimEnv) -> Self {
        Self { env, state: Arc::new(Mutex::new(BrokerState::default())) }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `count` transport opens.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().fail_opens = count;
    }

    /// Answer `auth` with this token with `auth_error`.
    pub fn reject_token(&self, token: impl Into<String>) {
        self.lock().rejected_tokens.insert(token.into());
    }

    /// Accept a previously rejected token again.
    pub fn accept_token(&self, token: &str) {
        self.lock().rejected_tokens.remove(token);
    }

    /// Close every session from the server side.
    pub fn drop_sessions(&self) {
        let dropped = std::mem::take(&mut self.lock().sessions);
        tracing::debug!(sessions = dropped.len(), "dropping all sessions");
    }

    /// Queue message echoes instead of broadcasting them.
    pub fn hold(&self) {
        self.lock().holding = true;
    }

    /// Broadcast queued echoes and stop holding.
    pub fn release(&self) {
        let mut state = self.lock();
        state.holding = false;
        for (topic, body) in std::mem::take(&mut state.held) {
            state.broadcast(topic, &body);
        }
    }

    /// Broadcast a raw body on a topic, as another participant would.
    pub fn inject(&self, topic: Topic, body: &Value) {
        self.lock().broadcast(topic, body);
    }

    /// Every frame received from clients, in arrival order.
    pub fn received(&self) -> Vec<ClientFrame> {
        self.lock().received.clone()
    }

    /// Number of `connect()` calls so far, including refused ones.
    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    /// Live sessions.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Sessions subscribed to a topic.
    pub fn subscribers(&self, topic: Topic) -> usize {
        self.lock().sessions.values().filter(|session| session.topics.contains(&topic)).count()
    }

    fn open_session(&self) -> Result<TransportLink, TransportError> {
        let mut state = self.lock();
        state.open_attempts += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (client_tx, mut client_rx) = mpsc::channel::<ClientFrame>(SESSION_CAPACITY);
        let (server_tx, server_rx) = mpsc::channel::<ServerFrame>(SESSION_CAPACITY);

        state.next_session += 1;
        let session_id = state.next_session;
        state.sessions.insert(session_id, Session {
            outbound: server_tx,
            user: None,
            topics: BTreeSet::new(),
        });
        drop(state);

        let broker = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = client_rx.recv().await {
                let mut state = broker.lock();
                if !state.sessions.contains_key(&session_id) {
                    break;
                }
                state.handle(session_id, frame, &broker.env);
            }
            broker.lock().sessions.remove(&session_id);
            tracing::debug!(session_id, "session ended");
        });

        tracing::debug!(session_id, "session opened");
        Ok(TransportLink::new(client_tx, server_rx))
    }
}

impl TransportFactory for SimBroker {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        self.open_session()
    }
}
