//! Connection lifecycle state machine.
//!
//! Owns the connect, authenticate, and reconnect cycle for the single
//! transport connection. Uses the action pattern: methods take time as input
//! and return actions for the driver to execute. The state machine performs no
//! I/O and holds no reference to the environment.
//!
//! # State Machine
//!
//! ```text
//!                  connect()
//! ┌──────────────┐ ────────> ┌────────────┐  auth_success  ┌───────────┐
//! │ Disconnected │           │ Connecting │ ─────────────> │ Connected │
//! └──────────────┘ <──────── └────────────┘                └───────────┘
//!        ^       fatal error   │        ^                        │
//!        │                     │ fail   │ retry due              │ transport
//!        │                     v        │                        │ closed
//!        │                  ┌──────────────┐                     │
//!        └───────────────── │ Reconnecting │ <───────────────────┘
//!           disconnect()    └──────────────┘
//! ```
//!
//! # Retry policy
//!
//! Every failed attempt increments the attempt counter and schedules a retry
//! after [`Backoff::jittered`]. Before the first successful session the
//! counter is capped at `max_initial_attempts`, after which the connect fails
//! with [`ConnectionError::RetriesExhausted`]. Once a session has been
//! established, reconnection retries indefinitely. The counter resets to 0
//! whenever authentication succeeds.
//!
//! An authentication rejection during the initial connect is fatal. During a
//! reconnect it counts as one more failed attempt.

use std::{
    fmt,
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rxchat_proto::{ClientFrame, Role, UserId};
use serde::Serialize;

use crate::{backoff::Backoff, env::MonotonicInstant, error::ConnectionError};

/// Attempts allowed before the initial connect gives up.
pub const DEFAULT_MAX_INITIAL_ATTEMPTS: u32 = 5;

/// Time allowed between requesting a transport and receiving `auth_success`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no retry pending
    Disconnected,
    /// Transport requested or open, authentication not yet acknowledged
    Connecting,
    /// Authenticated and ready to publish
    Connected,
    /// Waiting for the backoff delay before the next attempt
    Reconnecting,
}

/// Credentials announced on every (re)connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token
    pub token: String,
    /// Authenticated user
    pub user_id: UserId,
    /// Role of the authenticated user
    pub role: Role,
}

impl Credentials {
    /// Bundle credentials for [`ConnectionManager::connect`].
    pub fn new(token: impl Into<String>, user_id: UserId, role: Role) -> Self {
        Self { token: token.into(), user_id, role }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .finish()
    }
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Open a fresh transport. Report the outcome through
    /// [`ConnectionManager::on_transport_open`] or
    /// [`ConnectionManager::on_open_failed`].
    OpenTransport {
        /// 1-based attempt number within the current retry run
        attempt: u32,
    },

    /// Write this frame to the open transport.
    Send(ClientFrame),

    /// Close the current transport.
    CloseTransport,

    /// A retry was scheduled. Informational; the retry fires from
    /// [`ConnectionManager::tick`].
    RetryScheduled {
        /// Number of consecutive failed attempts so far
        attempt: u32,
        /// Delay before the next attempt
        delay: Duration,
    },

    /// Authentication succeeded.
    Established {
        /// True if this session follows an earlier successful one
        resumed: bool,
    },

    /// The connect sequence ended without a session.
    Failed(ConnectionError),
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Retry delay schedule
    pub backoff: Backoff,
    /// Attempts allowed before the initial connect fails
    pub max_initial_attempts: u32,
    /// Time allowed for open plus authentication
    pub handshake_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            max_initial_attempts: DEFAULT_MAX_INITIAL_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Replace the retry schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replace the initial attempt ceiling. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_initial_attempts(mut self, attempts: u32) -> Self {
        self.max_initial_attempts = attempts.max(1);
        self
    }

    /// Replace the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Connection state machine
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I = Instant>
where
    I: MonotonicInstant,
{
    state: ConnectionState,
    config: ConnectionConfig,
    credentials: Option<Credentials>,
    /// Consecutive failed attempts in the current retry run
    attempt: u32,
    /// Set once any session authenticated since the last `connect()`
    ever_connected: bool,
    /// A transport is open (authenticating or connected)
    transport_open: bool,
    attempt_started: Option<I>,
    retry_at: Option<I>,
    session_id: Option<String>,
    /// Backoff jitter source
    rng: ChaCha8Rng,
}

impl<I> ConnectionManager<I>
where
    I: MonotonicInstant,
{
    /// Create a manager in [`ConnectionState::Disconnected`].
    ///
    /// `seed` drives backoff jitter. Pass a value from
    /// [`Environment::random_u64`](crate::Environment::random_u64) so that
    /// simulations replay identically.
    pub fn new(config: ConnectionConfig, seed: u64) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            credentials: None,
            attempt: 0,
            ever_connected: false,
            transport_open: false,
            attempt_started: None,
            retry_at: None,
            session_id: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts. 0 while connected.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True if frames may be published.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Session id from the last `auth_success`, if the server sent one.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Credentials of the current connect sequence.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Start the initial connect sequence.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` unless currently disconnected
    pub fn connect(
        &mut self,
        credentials: Credentials,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(self.invalid("connect"));
        }

        self.credentials = Some(credentials);
        self.ever_connected = false;
        self.attempt = 0;
        self.session_id = None;

        Ok(self.begin_attempt(now))
    }

    /// The transport requested by [`ConnectionAction::OpenTransport`] is open.
    ///
    /// Returns the authentication frame to send.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` unless an attempt is waiting for its
    ///   transport
    pub fn on_transport_open(&mut self, _now: I) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting || self.transport_open {
            return Err(self.invalid("transport_open"));
        }
        let Some(credentials) = &self.credentials else {
            return Err(self.invalid("transport_open"));
        };

        let auth = ClientFrame::Auth {
            token: credentials.token.clone(),
            user_id: credentials.user_id,
            role: credentials.role,
        };
        self.transport_open = true;

        Ok(vec![ConnectionAction::Send(auth)])
    }

    /// Server accepted authentication.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` unless authenticating on an open
    ///   transport
    pub fn on_auth_success(
        &mut self,
        session_id: Option<String>,
        _now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting || !self.transport_open {
            return Err(self.invalid("auth_success"));
        }

        let resumed = self.ever_connected;
        self.ever_connected = true;
        self.attempt = 0;
        self.attempt_started = None;
        self.session_id = session_id;
        self.state = ConnectionState::Connected;

        tracing::info!(resumed, session_id = ?self.session_id, "connection established");
        Ok(vec![ConnectionAction::Established { resumed }])
    }

    /// Server rejected authentication.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` unless authenticating
    pub fn on_auth_error(
        &mut self,
        message: String,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(self.invalid("auth_error"));
        }

        if !self.ever_connected {
            tracing::error!(%message, "authentication rejected");
            let mut actions = Vec::new();
            if self.transport_open {
                actions.push(ConnectionAction::CloseTransport);
            }
            self.reset();
            actions.push(ConnectionAction::Failed(ConnectionError::AuthRejected { message }));
            return Ok(actions);
        }

        tracing::warn!(%message, "authentication rejected on reconnect, retrying");
        Ok(self.fail_attempt(now, ConnectionError::AuthRejected { message }))
    }

    /// The transport requested by [`ConnectionAction::OpenTransport`] could
    /// not be opened.
    pub fn on_open_failed(&mut self, reason: &str, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting || self.transport_open {
            tracing::debug!(state = ?self.state, reason, "ignoring stale open failure");
            return Vec::new();
        }

        self.fail_attempt(now, ConnectionError::Transport(reason.to_string()))
    }

    /// The open transport closed without being asked to.
    pub fn on_transport_closed(&mut self, reason: &str, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                self.transport_open = false;
                Vec::new()
            },
            ConnectionState::Connecting => {
                self.fail_attempt(now, ConnectionError::Transport(reason.to_string()))
            },
            ConnectionState::Connected => {
                tracing::warn!(reason, "connection lost");
                self.transport_open = false;
                self.fail_attempt(now, ConnectionError::Transport(reason.to_string()))
            },
        }
    }

    /// Process timers: fire a due retry or expire a stalled handshake.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Reconnecting => match self.retry_at {
                Some(at) if now >= at => self.begin_attempt(now),
                _ => Vec::new(),
            },
            ConnectionState::Connecting => match self.attempt_started {
                Some(started) if now >= started => {
                    let elapsed = now - started;
                    if elapsed >= self.config.handshake_timeout {
                        tracing::warn!(?elapsed, "handshake timed out");
                        self.fail_attempt(now, ConnectionError::HandshakeTimeout { elapsed })
                    } else {
                        Vec::new()
                    }
                },
                _ => Vec::new(),
            },
            ConnectionState::Disconnected | ConnectionState::Connected => Vec::new(),
        }
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        match self.state {
            ConnectionState::Reconnecting => self.retry_at,
            ConnectionState::Connecting => {
                self.attempt_started.map(|started| started + self.config.handshake_timeout)
            },
            ConnectionState::Disconnected | ConnectionState::Connected => None,
        }
    }

    /// Tear down the connection and cancel any pending retry.
    ///
    /// If the initial connect was still in progress it completes with
    /// [`ConnectionError::Cancelled`].
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.transport_open {
            actions.push(ConnectionAction::CloseTransport);
        }
        let connect_pending = !self.ever_connected;
        self.reset();

        if connect_pending {
            actions.push(ConnectionAction::Failed(ConnectionError::Cancelled));
        }
        actions
    }

    /// Gate an outbound frame on the connection state.
    ///
    /// Returns `None` when not connected. Sends are fire-and-forget: a dropped
    /// frame is not an error, and detecting it is left to the caller.
    pub fn send(&self, frame: ClientFrame) -> Option<ConnectionAction> {
        if self.is_connected() {
            Some(ConnectionAction::Send(frame))
        } else {
            tracing::debug!(state = ?self.state, "dropping frame while not connected");
            None
        }
    }

    fn begin_attempt(&mut self, now: I) -> Vec<ConnectionAction> {
        self.state = ConnectionState::Connecting;
        self.transport_open = false;
        self.retry_at = None;
        self.attempt_started = Some(now);

        vec![ConnectionAction::OpenTransport { attempt: self.attempt + 1 }]
    }

    fn fail_attempt(&mut self, now: I, error: ConnectionError) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if std::mem::take(&mut self.transport_open) {
            actions.push(ConnectionAction::CloseTransport);
        }

        self.attempt_started = None;
        self.attempt = self.attempt.saturating_add(1);

        if !self.ever_connected && self.attempt >= self.config.max_initial_attempts {
            let attempts = self.attempt;
            tracing::error!(attempts, %error, "initial connection failed");
            self.reset();
            actions.push(ConnectionAction::Failed(ConnectionError::RetriesExhausted {
                attempts,
                last_error: error.to_string(),
            }));
            return actions;
        }

        let sample = self.rng.next_u64();
        let delay = self.config.backoff.jittered(self.attempt, sample);
        self.retry_at = Some(now + delay);
        self.state = ConnectionState::Reconnecting;

        tracing::info!(attempt = self.attempt, ?delay, %error, "connection attempt failed, retrying");
        actions.push(ConnectionAction::RetryScheduled { attempt: self.attempt, delay });
        actions
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.credentials = None;
        self.attempt = 0;
        self.ever_connected = false;
        self.transport_open = false;
        self.attempt_started = None;
        self.retry_at = None;
        self.session_id = None;
    }

    fn invalid(&self, operation: &str) -> ConnectionError {
        ConnectionError::InvalidState { state: self.state, operation: operation.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("token-1", 42, Role::Customer)
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(ConnectionConfig::default(), 7)
    }

    fn connected(t0: Instant) -> ConnectionManager {
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();
        conn.on_transport_open(t0).unwrap();
        conn.on_auth_success(Some("s-1".into()), t0).unwrap();
        conn
    }

    fn scheduled_delay(actions: &[ConnectionAction]) -> Duration {
        actions
            .iter()
            .find_map(|a| match a {
                ConnectionAction::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .expect("retry scheduled")
    }

    #[test]
    fn connection_lifecycle() {
        let t0 = Instant::now();
        let mut conn = manager();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let actions = conn.connect(creds(), t0).unwrap();
        assert_eq!(actions, vec![ConnectionAction::OpenTransport { attempt: 1 }]);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let actions = conn.on_transport_open(t0).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Send(ClientFrame::Auth {
            token: "token-1".into(),
            user_id: 42,
            role: Role::Customer,
        })]);

        let actions = conn.on_auth_success(Some("s-1".into()), t0).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Established { resumed: false }]);
        assert!(conn.is_connected());
        assert_eq!(conn.session_id(), Some("s-1"));
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn backoff_doubles_and_success_resets_attempts() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();

        let mut now = t0;
        let mut delays = Vec::new();
        for attempt in 1..=3 {
            let actions = conn.on_open_failed("connection refused", now);
            let delay = scheduled_delay(&actions);
            delays.push(delay);
            assert_eq!(conn.state(), ConnectionState::Reconnecting);
            assert_eq!(conn.attempt(), attempt);

            // Not yet due
            assert!(conn.tick(now + delay - Duration::from_millis(1)).is_empty());

            now += delay;
            let actions = conn.tick(now);
            assert_eq!(actions, vec![ConnectionAction::OpenTransport { attempt: attempt + 1 }]);
        }
        assert_eq!(delays, vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]);

        conn.on_transport_open(now).unwrap();
        conn.on_auth_success(None, now).unwrap();
        assert_eq!(conn.attempt(), 0);
        assert!(conn.is_connected());
    }

    #[test]
    fn jittered_delays_replay_for_same_seed() {
        let config = ConnectionConfig::default()
            .with_backoff(Backoff::default().with_jitter(0.5))
            .with_max_initial_attempts(10);
        let run = |seed: u64| {
            let t0 = Instant::now();
            let mut conn: ConnectionManager = ConnectionManager::new(config.clone(), seed);
            conn.connect(creds(), t0).unwrap();
            (1..=4)
                .map(|_| {
                    let delay = scheduled_delay(&conn.on_open_failed("refused", t0));
                    conn.tick(t0 + delay);
                    delay
                })
                .collect::<Vec<_>>()
        };

        let delays = run(99);
        assert_eq!(delays, run(99));
        for (attempt, delay) in (1u32..).zip(&delays) {
            let nominal = Duration::from_secs(1 << (attempt - 1));
            assert!(*delay >= nominal.mul_f64(0.5), "attempt {attempt}: {delay:?}");
            assert!(*delay <= nominal.mul_f64(1.5), "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn initial_connect_gives_up_after_ceiling() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();

        let mut now = t0;
        for _ in 1..DEFAULT_MAX_INITIAL_ATTEMPTS {
            let delay = scheduled_delay(&conn.on_open_failed("refused", now));
            now += delay;
            conn.tick(now);
        }

        let actions = conn.on_open_failed("refused", now);
        assert_eq!(actions, vec![ConnectionAction::Failed(ConnectionError::RetriesExhausted {
            attempts: DEFAULT_MAX_INITIAL_ATTEMPTS,
            last_error: "transport error: refused".into(),
        })]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn reconnect_retries_indefinitely() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let mut now = t0;
        // Peer already closed the transport, nothing to close on our side
        let mut actions = conn.on_transport_closed("reset by peer", now);
        assert!(!actions.contains(&ConnectionAction::CloseTransport));

        for attempt in 1..=20u32 {
            let delay = scheduled_delay(&actions);
            assert!(delay <= Duration::from_secs(30));
            assert_eq!(conn.attempt(), attempt);

            now += delay;
            conn.tick(now);
            actions = conn.on_open_failed("offline", now);
            assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::Failed(_))));
        }

        assert_eq!(scheduled_delay(&actions), Duration::from_secs(30));
        now += Duration::from_secs(30);
        conn.tick(now);
        conn.on_transport_open(now).unwrap();
        let actions = conn.on_auth_success(None, now).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Established { resumed: true }]);
        assert_eq!(conn.attempt(), 0);
    }

    #[test]
    fn reconnect_reauthenticates() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let delay = scheduled_delay(&conn.on_transport_closed("gone", t0));
        assert_eq!(delay, Duration::from_secs(1));

        let now = t0 + delay;
        assert_eq!(conn.tick(now), vec![ConnectionAction::OpenTransport { attempt: 2 }]);

        let actions = conn.on_transport_open(now).unwrap();
        assert!(matches!(&actions[..], [ConnectionAction::Send(ClientFrame::Auth { .. })]));
    }

    #[test]
    fn initial_auth_rejection_is_fatal() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();
        conn.on_transport_open(t0).unwrap();

        let actions = conn.on_auth_error("token expired".into(), t0).unwrap();
        assert_eq!(actions, vec![
            ConnectionAction::CloseTransport,
            ConnectionAction::Failed(ConnectionError::AuthRejected {
                message: "token expired".into()
            }),
        ]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.credentials().is_none());
    }

    #[test]
    fn auth_rejection_on_reconnect_is_retried() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let delay = scheduled_delay(&conn.on_transport_closed("gone", t0));
        let now = t0 + delay;
        conn.tick(now);
        conn.on_transport_open(now).unwrap();

        let actions = conn.on_auth_error("server restarting".into(), now).unwrap();
        assert_eq!(actions[0], ConnectionAction::CloseTransport);
        assert_eq!(scheduled_delay(&actions), Duration::from_secs(2));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn stalled_handshake_times_out() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();
        conn.on_transport_open(t0).unwrap();

        assert_eq!(conn.next_deadline(), Some(t0 + DEFAULT_HANDSHAKE_TIMEOUT));
        assert!(conn.tick(t0 + Duration::from_secs(9)).is_empty());

        let actions = conn.tick(t0 + DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(actions[0], ConnectionAction::CloseTransport);
        assert_eq!(scheduled_delay(&actions), Duration::from_secs(1));
    }

    #[test]
    fn disconnect_cancels_pending_connect() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();
        conn.on_open_failed("refused", t0);
        assert!(conn.next_deadline().is_some());

        let actions = conn.disconnect();
        assert_eq!(actions, vec![ConnectionAction::Failed(ConnectionError::Cancelled)]);
        assert_eq!(conn.next_deadline(), None);
        assert!(conn.tick(t0 + Duration::from_secs(60)).is_empty());
        assert!(conn.disconnect().is_empty());
    }

    #[test]
    fn disconnect_closes_live_session() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        assert_eq!(conn.disconnect(), vec![ConnectionAction::CloseTransport]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // A late close notification from the dropped transport is ignored
        assert!(conn.on_transport_closed("closed", t0).is_empty());
    }

    #[test]
    fn sends_are_gated_on_connection() {
        let t0 = Instant::now();
        let frame = ClientFrame::Subscribe { topic: rxchat_proto::Topic::messages(1) };

        let conn = manager();
        assert_eq!(conn.send(frame.clone()), None);

        let conn = connected(t0);
        assert_eq!(conn.send(frame.clone()), Some(ConnectionAction::Send(frame)));
    }

    #[test]
    fn connect_twice_is_rejected() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();

        let result = conn.connect(creds(), t0);
        assert!(matches!(result, Err(ConnectionError::InvalidState { .. })));
    }

    #[test]
    fn auth_before_open_is_rejected() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(creds(), t0).unwrap();

        let result = conn.on_auth_success(None, t0);
        assert!(matches!(result, Err(ConnectionError::InvalidState { .. })));
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let rendered = format!("{:?}", creds());
        assert!(!rendered.contains("token-1"));
        assert!(rendered.contains("42"));
    }
}
