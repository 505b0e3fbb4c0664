//! Per-room topic subscriptions.
//!
//! The manager is the only place outbound frames are built. It does not know
//! whether the connection is up; callers gate the returned frames through
//! [`ConnectionManager::send`](rxchat_core::ConnectionManager::send).
//!
//! At most one subscription exists per room. Re-subscribing a room tears the
//! old subscription down first, so the server never delivers a broadcast twice.

use std::collections::BTreeMap;

use rxchat_proto::{
    Channel, ClientFrame, Destination, PresenceSignal, ProtocolError, RoomSignal, ThreadId, Topic,
    TypingSignal,
};
use serde::Serialize;
use serde_json::Value;

/// Optional channels to subscribe alongside a room's message topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSet {
    /// Receive typing indicators
    pub typing: bool,
    /// Receive join/leave presence broadcasts
    pub presence: bool,
}

impl ChannelSet {
    /// Messages, typing and presence.
    pub const ALL: Self = Self { typing: true, presence: true };

    /// Messages only.
    pub const MESSAGES_ONLY: Self = Self { typing: false, presence: false };

    fn contains(self, channel: Channel) -> bool {
        match channel {
            Channel::Messages => true,
            Channel::Typing => self.typing,
            Channel::Presence => self.presence,
        }
    }

    fn topics(self, thread_id: ThreadId) -> Vec<Topic> {
        [Topic::messages(thread_id), Topic::typing(thread_id), Topic::presence(thread_id)]
            .into_iter()
            .filter(|topic| self.contains(topic.channel))
            .collect()
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::ALL
    }
}

/// Identifies one subscription instance.
///
/// Subscribing the same room twice yields handles with different generations,
/// so a holder of a stale handle can tell its subscription was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Subscribed room
    pub thread_id: ThreadId,
    /// Monotonic per-manager counter
    pub generation: u64,
}

/// A broadcast matched to a live subscription and decoded by channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedFrame {
    /// Chat message body, still raw; the reconciler normalizes it
    Message {
        /// Room the topic belongs to
        thread_id: ThreadId,
        /// Raw body
        body: Value,
    },
    /// Typing indicator
    Typing {
        /// Room the topic belongs to
        thread_id: ThreadId,
        /// Decoded signal
        signal: TypingSignal,
    },
    /// Presence change
    Presence {
        /// Room the topic belongs to
        thread_id: ThreadId,
        /// Decoded signal
        signal: PresenceSignal,
    },
}

#[derive(Debug, Clone, Copy)]
struct Subscription {
    handle: SubscriptionHandle,
    channels: ChannelSet,
}

/// Tracks live room subscriptions and builds the frames that change them.
#[derive(Debug, Clone, Default)]
pub struct RoomSubscriptionManager {
    subscriptions: BTreeMap<ThreadId, Subscription>,
    next_generation: u64,
}

impl RoomSubscriptionManager {
    /// Manager with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a room and announce the join.
    ///
    /// An existing subscription for the same room is torn down first.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a signal body fails to serialize
    pub fn subscribe(
        &mut self,
        thread_id: ThreadId,
        channels: ChannelSet,
    ) -> Result<(SubscriptionHandle, Vec<ClientFrame>), ProtocolError> {
        let mut frames = self.unsubscribe(thread_id)?;

        self.next_generation += 1;
        let handle = SubscriptionHandle { thread_id, generation: self.next_generation };
        self.subscriptions.insert(thread_id, Subscription { handle, channels });

        frames.extend(Self::subscribe_frames(thread_id, channels)?);
        tracing::debug!(thread_id, generation = handle.generation, "room subscribed");

        Ok((handle, frames))
    }

    /// Announce the leave and drop a room's subscription. No-op if absent.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a signal body fails to serialize
    pub fn unsubscribe(&mut self, thread_id: ThreadId) -> Result<Vec<ClientFrame>, ProtocolError> {
        let Some(subscription) = self.subscriptions.remove(&thread_id) else {
            return Ok(Vec::new());
        };

        let mut frames = vec![self.publish(
            Destination::Leave(thread_id),
            &RoomSignal { chat_room_id: thread_id },
        )?];
        frames.extend(
            subscription
                .channels
                .topics(thread_id)
                .into_iter()
                .map(|topic| ClientFrame::Unsubscribe { topic }),
        );

        tracing::debug!(thread_id, "room unsubscribed");
        Ok(frames)
    }

    /// Make `target` the only live room.
    ///
    /// Leaves every other room before joining the target, keeping a single
    /// live subscription however many rooms were visited. Already being
    /// subscribed to the target alone produces no frames.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a signal body fails to serialize
    pub fn switch_to(
        &mut self,
        target: Option<ThreadId>,
        channels: ChannelSet,
    ) -> Result<Vec<ClientFrame>, ProtocolError> {
        let others: Vec<_> =
            self.subscriptions.keys().copied().filter(|id| Some(*id) != target).collect();

        let mut frames = Vec::new();
        for thread_id in others {
            frames.extend(self.unsubscribe(thread_id)?);
        }

        if let Some(thread_id) = target {
            if !self.is_subscribed(thread_id) {
                let (_, subscribe) = self.subscribe(thread_id, channels)?;
                frames.extend(subscribe);
            }
        }
        Ok(frames)
    }

    /// Frames that re-establish every live subscription on a fresh transport.
    ///
    /// Server-side subscription state does not survive a reconnect. Handles
    /// stay valid.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a signal body fails to serialize
    pub fn resubscribe_all(&self) -> Result<Vec<ClientFrame>, ProtocolError> {
        let mut frames = Vec::new();
        for (thread_id, subscription) in &self.subscriptions {
            frames.extend(Self::subscribe_frames(*thread_id, subscription.channels)?);
        }
        Ok(frames)
    }

    /// Drop every subscription, returning the leave/unsubscribe frames.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a signal body fails to serialize
    pub fn unsubscribe_all(&mut self) -> Result<Vec<ClientFrame>, ProtocolError> {
        let rooms: Vec<_> = self.subscriptions.keys().copied().collect();
        let mut frames = Vec::new();
        for thread_id in rooms {
            frames.extend(self.unsubscribe(thread_id)?);
        }
        Ok(frames)
    }

    /// Match a broadcast to a live subscription.
    ///
    /// Returns `None` for rooms without a subscription and for channels the
    /// subscription did not ask for.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a typing or presence body does not decode
    pub fn route(&self, topic: &Topic, body: Value) -> Result<Option<RoutedFrame>, ProtocolError> {
        let thread_id = topic.thread_id;
        let Some(subscription) = self.subscriptions.get(&thread_id) else {
            tracing::debug!(%topic, "no subscription for topic, dropping");
            return Ok(None);
        };
        if !subscription.channels.contains(topic.channel) {
            return Ok(None);
        }

        let routed = match topic.channel {
            Channel::Messages => RoutedFrame::Message { thread_id, body },
            Channel::Typing => {
                RoutedFrame::Typing { thread_id, signal: serde_json::from_value(body)? }
            },
            Channel::Presence => {
                RoutedFrame::Presence { thread_id, signal: serde_json::from_value(body)? }
            },
        };
        Ok(Some(routed))
    }

    /// Build a publish frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if the body fails to serialize
    pub fn publish<T: Serialize>(
        &self,
        destination: Destination,
        body: &T,
    ) -> Result<ClientFrame, ProtocolError> {
        ClientFrame::publish(destination, body)
    }

    /// Whether a room has a live subscription.
    pub fn is_subscribed(&self, thread_id: ThreadId) -> bool {
        self.subscriptions.contains_key(&thread_id)
    }

    /// Current handle for a room.
    pub fn handle(&self, thread_id: ThreadId) -> Option<SubscriptionHandle> {
        self.subscriptions.get(&thread_id).map(|subscription| subscription.handle)
    }

    /// Whether `handle` still names the live subscription for its room.
    pub fn is_current(&self, handle: SubscriptionHandle) -> bool {
        self.handle(handle.thread_id) == Some(handle)
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Rooms with a live subscription, ascending.
    pub fn subscribed_threads(&self) -> Vec<ThreadId> {
        self.subscriptions.keys().copied().collect()
    }

    fn subscribe_frames(
        thread_id: ThreadId,
        channels: ChannelSet,
    ) -> Result<Vec<ClientFrame>, ProtocolError> {
        let mut frames: Vec<_> = channels
            .topics(thread_id)
            .into_iter()
            .map(|topic| ClientFrame::Subscribe { topic })
            .collect();
        frames.push(ClientFrame::publish(
            Destination::Join(thread_id),
            &RoomSignal { chat_room_id: thread_id },
        )?);
        Ok(frames)
    }
}
