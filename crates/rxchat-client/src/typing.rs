//! Ephemeral typing and presence state.
//!
//! Typing flags expire on their own: every `set_typing(.., true)` (re)arms a
//! deadline for that (thread, user) pair, and [`TypingPresenceTracker::tick`]
//! clears whatever is due. A peer that disconnects mid-sentence therefore
//! stops "typing" without ever sending a stop signal.
//!
//! Presence is only changed by explicit join/leave broadcasts. Silence is not
//! evidence of absence.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use rxchat_core::MonotonicInstant;
use rxchat_proto::{ThreadId, UserId};

use crate::store::ConversationStore;

/// How long a typing flag survives without being refreshed.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Tracks typing deadlines and mirrors typing/presence into the store.
#[derive(Debug, Clone)]
pub struct TypingPresenceTracker<I = Instant>
where
    I: MonotonicInstant,
{
    expiry: Duration,
    deadlines: BTreeMap<(ThreadId, UserId), I>,
}

impl<I> Default for TypingPresenceTracker<I>
where
    I: MonotonicInstant,
{
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_EXPIRY)
    }
}

impl<I> TypingPresenceTracker<I>
where
    I: MonotonicInstant,
{
    /// Tracker with the given expiry window.
    pub fn new(expiry: Duration) -> Self {
        Self { expiry, deadlines: BTreeMap::new() }
    }

    /// Record a typing signal. Returns true if the visible flag changed.
    pub fn set_typing(
        &mut self,
        thread_id: ThreadId,
        user: UserId,
        is_typing: bool,
        now: I,
        store: &mut ConversationStore,
    ) -> bool {
        if is_typing {
            self.deadlines.insert((thread_id, user), now + self.expiry);
        } else {
            self.deadlines.remove(&(thread_id, user));
        }
        store.set_typing(thread_id, user, is_typing)
    }

    /// True if any user other than `except` has an unexpired typing flag.
    pub fn is_anyone_typing(&self, thread_id: ThreadId, except: Option<UserId>, now: I) -> bool {
        self.typing_users(thread_id, now).into_iter().any(|user| Some(user) != except)
    }

    /// Users with an unexpired typing flag in a thread.
    pub fn typing_users(&self, thread_id: ThreadId, now: I) -> Vec<UserId> {
        self.deadlines
            .range((thread_id, UserId::MIN)..=(thread_id, UserId::MAX))
            .filter(|(_, deadline)| **deadline > now)
            .map(|((_, user), _)| *user)
            .collect()
    }

    /// Clear expired typing flags. Returns the pairs that expired.
    pub fn tick(&mut self, now: I, store: &mut ConversationStore) -> Vec<(ThreadId, UserId)> {
        let expired: Vec<_> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        for (thread_id, user) in &expired {
            self.deadlines.remove(&(*thread_id, *user));
            store.set_typing(*thread_id, *user, false);
        }
        expired
    }

    /// Earliest pending expiry.
    pub fn next_deadline(&self) -> Option<I> {
        self.deadlines.values().min().copied()
    }

    /// Drop every typing flag for a thread, e.g. after leaving it.
    pub fn clear_thread(&mut self, thread_id: ThreadId, store: &mut ConversationStore) {
        let users: Vec<_> = self
            .deadlines
            .range((thread_id, UserId::MIN)..=(thread_id, UserId::MAX))
            .map(|((_, user), _)| *user)
            .collect();

        for user in users {
            self.deadlines.remove(&(thread_id, user));
            store.set_typing(thread_id, user, false);
        }
    }

    /// Forget all typing and presence state.
    pub fn clear(&mut self, store: &mut ConversationStore) {
        self.deadlines.clear();
        store.clear_typing();
        store.clear_presence();
    }

    /// Record a join broadcast. Returns true if the user was not yet online.
    pub fn mark_online(&self, user: UserId, store: &mut ConversationStore) -> bool {
        store.set_online(user, true)
    }

    /// Record a leave broadcast. Returns true if the user was online.
    pub fn mark_offline(&self, user: UserId, store: &mut ConversationStore) -> bool {
        store.set_online(user, false)
    }
}
