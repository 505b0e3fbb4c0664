//! Merging confirmed messages with optimistic local state.
//!
//! No correlation id survives the round trip through the server, so an echo
//! of our own message can only be recognised heuristically: same sender,
//! identical content, and timestamps closer than the match window. When
//! several local messages qualify, the closest in time wins, then the earliest
//! in the list.
//!
//! # Algorithm (`apply_inbound`)
//!
//! 1. Normalize the raw body.
//! 2. Drop it if the thread already holds that server id.
//! 3. Look for a local candidate (pending or failed). If found, replace it in
//!    place and restore timestamp order with a stable sort, which leaves it in
//!    place unless the server clock moved it past a neighbour.
//! 4. Otherwise insert it after every message with an equal or earlier
//!    timestamp.
//! 5. Advance the thread preview. If the thread is not active and the message
//!    was neither a reconciled echo nor written by the local user, bump
//!    `unread_count`.
//!
//! Every step keys on the message's own thread, never on the active thread,
//! so echoes for a thread the user already left still reconcile.

use std::time::Duration;

use chrono::TimeDelta;
use rxchat_proto::{ProtocolError, ThreadId, normalize_message};
use serde_json::Value;

use crate::store::{ConversationStore, Message, MessageId, MessageStatus};

/// Maximum clock distance between an optimistic message and its echo.
pub const DEFAULT_MATCH_WINDOW: Duration = Duration::from_secs(10);

/// What `apply_inbound` did with a confirmed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Server id already present. Nothing changed.
    Duplicate {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Server id
        server_id: String,
    },

    /// Replaced an optimistic message.
    Reconciled {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id that was replaced
        local_id: u64,
        /// Server id that replaced it
        server_id: String,
    },

    /// Inserted as a new message.
    Inserted {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Server id
        server_id: String,
        /// True if `unread_count` was incremented
        unread: bool,
    },
}

/// Reconciles inbound confirmed messages with optimistic local writes.
#[derive(Debug, Clone)]
pub struct MessageReconciler {
    window: TimeDelta,
}

impl Default for MessageReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_WINDOW)
    }
}

impl MessageReconciler {
    /// Reconciler with the given match window.
    pub fn new(window: Duration) -> Self {
        Self { window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX) }
    }

    /// Apply a raw message broadcast.
    ///
    /// `thread_hint` is the thread named by the topic the frame arrived on and
    /// takes precedence over any thread field in the body.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the body is malformed or names no thread. The
    ///   store is untouched in that case.
    pub fn apply_inbound(
        &self,
        raw: &Value,
        thread_hint: Option<ThreadId>,
        store: &mut ConversationStore,
    ) -> Result<InboundOutcome, ProtocolError> {
        let normalized = normalize_message(raw)?;
        let thread_id = thread_hint
            .or(normalized.thread_id)
            .ok_or(ProtocolError::MissingField("thread"))?;

        Ok(self.apply_confirmed(Message::confirmed(normalized, thread_id), store))
    }

    /// Apply an already-normalized confirmed message.
    pub fn apply_confirmed(&self, message: Message, store: &mut ConversationStore) -> InboundOutcome {
        self.merge(message, store, true)
    }

    /// Merge a page of confirmed history into a thread.
    ///
    /// Each entry goes through the same duplicate and echo matching as a live
    /// broadcast, so a persisted copy of a message still pending locally
    /// replaces it. History never counts as unread. Returns one outcome per
    /// entry, in page order.
    pub fn apply_history(
        &self,
        thread_id: ThreadId,
        page: Vec<Message>,
        store: &mut ConversationStore,
    ) -> Vec<InboundOutcome> {
        page.into_iter()
            .map(|mut message| {
                message.thread_id = thread_id;
                self.merge(message, store, false)
            })
            .collect()
    }

    /// Insert an optimistic message. Never affects `unread_count`.
    ///
    /// Returns the index the message landed at.
    pub fn apply_optimistic(&self, message: Message, store: &mut ConversationStore) -> usize {
        debug_assert!(message.id.is_local());

        let thread_id = message.thread_id;
        let timestamp = message.timestamp;
        let preview = message.content.clone();

        let index = store.insert_sorted(message);
        store.record_activity(thread_id, timestamp, preview);
        store.touch();
        index
    }

    fn merge(&self, message: Message, store: &mut ConversationStore, count_unread: bool) -> InboundOutcome {
        debug_assert_eq!(message.status, MessageStatus::Delivered);

        let thread_id = message.thread_id;
        let server_id = message.id.to_string();
        let timestamp = message.timestamp;
        let preview = message.content.clone();
        // Own messages never count as unread, even when no optimistic entry matched
        let from_local_user = store.local_user() == Some(message.sender_id);
        let is_active = store.active_thread() == Some(thread_id);

        let list = store.messages_mut(thread_id);
        if list.iter().any(|m| m.id == message.id) {
            tracing::debug!(thread_id, %server_id, "dropping duplicate delivery");
            return InboundOutcome::Duplicate { thread_id, server_id };
        }

        let outcome = match self.find_candidate(list, &message) {
            Some(index) => {
                let local_id = list[index].id.local().unwrap_or_default();
                let mut confirmed = message;
                confirmed.replaced_local = Some(local_id);
                list[index] = confirmed;
                list.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

                tracing::debug!(thread_id, local_id, %server_id, "reconciled optimistic message");
                InboundOutcome::Reconciled { thread_id, local_id, server_id }
            },
            None => {
                store.insert_sorted(message);
                let unread = count_unread && !is_active && !from_local_user;
                InboundOutcome::Inserted { thread_id, server_id, unread }
            },
        };

        store.record_activity(thread_id, timestamp, preview);
        if let InboundOutcome::Inserted { unread: true, .. } = outcome {
            store.increment_unread(thread_id);
        }
        store.touch();

        outcome
    }

    fn find_candidate(&self, list: &[Message], confirmed: &Message) -> Option<usize> {
        list.iter()
            .enumerate()
            .filter(|(_, m)| matches!(m.id, MessageId::Local(_)))
            .filter(|(_, m)| m.status != MessageStatus::Delivered)
            .filter(|(_, m)| m.sender_id == confirmed.sender_id && m.content == confirmed.content)
            .map(|(index, m)| (index, (m.timestamp - confirmed.timestamp).abs()))
            .filter(|(_, distance)| *distance < self.window)
            .min_by_key(|(index, distance)| (*distance, *index))
            .map(|(index, _)| index)
    }
}
