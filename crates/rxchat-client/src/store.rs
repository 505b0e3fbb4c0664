//! Authoritative in-memory conversation state.
//!
//! [`ConversationStore`] holds threads, per-thread message lists, the active
//! thread, connection state, and typing/presence maps. It performs no I/O:
//! every mutation is a plain method call and observers read immutable
//! [`StoreSnapshot`]s.
//!
//! # Invariants
//!
//! - Within a thread, no two messages share a server id.
//! - Within a thread, messages are non-decreasing by timestamp after every
//!   mutation. Ties keep insertion order.
//! - The active thread has `unread_count == 0` at the moment it becomes
//!   active.
//! - `version` strictly increases with every observable mutation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rxchat_core::ConnectionState;
use rxchat_proto::{NormalizedMessage, ThreadId, UserId};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Message identifier in one of two id spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    /// Issued by the server. Stable and unique within a thread.
    Server(String),
    /// Issued locally for an optimistic message. Valid until reconciliation.
    Local(u64),
}

impl MessageId {
    /// True for locally issued ids.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Local id, if this is one.
    pub fn local(&self) -> Option<u64> {
        match self {
            Self::Local(id) => Some(*id),
            Self::Server(_) => None,
        }
    }

    /// Server id, if this is one.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Local(id) => write!(f, "temp-{id}"),
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Optimistically inserted, not yet confirmed
    Pending,
    /// Confirmed by the server
    Delivered,
    /// Send was given up on; can be retried
    Failed,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server or local id
    pub id: MessageId,
    /// Owning thread
    pub thread_id: ThreadId,
    /// Author
    pub sender_id: UserId,
    /// Author display name, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Message text
    pub content: String,
    /// Logical send time
    pub timestamp: DateTime<Utc>,
    /// Delivery status
    pub status: MessageStatus,
    /// Attachment references and other opaque data
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Local id of the optimistic message this one replaced.
    ///
    /// Lets a renderer keep the same list key across reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_local: Option<u64>,
}

impl Message {
    /// Confirmed message from a normalized broadcast or history entry.
    pub fn confirmed(normalized: NormalizedMessage, thread_id: ThreadId) -> Self {
        Self {
            id: MessageId::Server(normalized.id),
            thread_id,
            sender_id: normalized.sender_id,
            sender_name: normalized.sender_name,
            content: normalized.content,
            timestamp: normalized.timestamp,
            status: MessageStatus::Delivered,
            metadata: normalized.metadata,
            replaced_local: None,
        }
    }

    /// Optimistic message awaiting confirmation.
    pub fn optimistic(
        local_id: u64,
        thread_id: ThreadId,
        sender_id: UserId,
        content: String,
        timestamp: DateTime<Utc>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: MessageId::Local(local_id),
            thread_id,
            sender_id,
            sender_name: None,
            content,
            timestamp,
            status: MessageStatus::Pending,
            metadata,
            replaced_local: None,
        }
    }
}

/// A conversation between a patient and a pharmacy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationThread {
    /// Thread id
    pub id: ThreadId,
    /// Display title, if the listing API supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Participant user ids, resolved to profiles elsewhere
    pub participants: Vec<UserId>,
    /// Preview of the newest message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// Timestamp of the newest message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    /// Messages received while the thread was not active
    pub unread_count: u32,
}

impl ConversationThread {
    /// Empty thread with no activity.
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            title: None,
            participants: Vec::new(),
            last_message: None,
            last_activity: None,
            unread_count: 0,
        }
    }

    /// Set the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the participants.
    #[must_use]
    pub fn with_participants(mut self, participants: impl IntoIterator<Item = UserId>) -> Self {
        self.participants = participants.into_iter().collect();
        self
    }

    /// Set the newest-message preview.
    #[must_use]
    pub fn with_last_message(mut self, preview: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.last_message = Some(preview.into());
        self.last_activity = Some(at);
        self
    }

    /// Set the unread count.
    #[must_use]
    pub fn with_unread(mut self, unread_count: u32) -> Self {
        self.unread_count = unread_count;
        self
    }
}

/// Immutable view of the store handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Store version this snapshot was taken at
    pub version: u64,
    /// Threads, most recently active first
    pub threads: Vec<ConversationThread>,
    /// Focused thread
    pub active_thread: Option<ThreadId>,
    /// Messages per thread, in timestamp order
    pub messages: BTreeMap<ThreadId, Vec<Message>>,
    /// Connection state
    pub connection: ConnectionState,
    /// Consecutive failed connection attempts
    pub reconnect_attempt: u32,
    /// Users currently typing, per thread
    pub typing: BTreeMap<ThreadId, Vec<UserId>>,
    /// Users known to be online
    pub online: Vec<UserId>,
}

impl StoreSnapshot {
    /// Messages of one thread.
    pub fn messages(&self, thread_id: ThreadId) -> &[Message] {
        self.messages.get(&thread_id).map_or(&[], Vec::as_slice)
    }

    /// Messages of the active thread.
    pub fn active_messages(&self) -> &[Message] {
        self.active_thread.map_or(&[], |id| self.messages(id))
    }

    /// Look up a thread.
    pub fn thread(&self, thread_id: ThreadId) -> Option<&ConversationThread> {
        self.threads.iter().find(|t| t.id == thread_id)
    }
}

/// The single mutable state container.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    threads: BTreeMap<ThreadId, ConversationThread>,
    messages: BTreeMap<ThreadId, Vec<Message>>,
    active_thread: Option<ThreadId>,
    connection: ConnectionState,
    reconnect_attempt: u32,
    typing: BTreeMap<ThreadId, BTreeSet<UserId>>,
    online: BTreeSet<UserId>,
    local_user: Option<UserId>,
    version: u64,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Empty, disconnected store.
    pub fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            messages: BTreeMap::new(),
            active_thread: None,
            connection: ConnectionState::Disconnected,
            reconnect_attempt: 0,
            typing: BTreeMap::new(),
            online: BTreeSet::new(),
            local_user: None,
            version: 0,
        }
    }

    /// Monotonic mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// User this client is signed in as.
    pub fn local_user(&self) -> Option<UserId> {
        self.local_user
    }

    /// Set the signed-in user. Messages from this user never count as unread.
    pub fn set_local_user(&mut self, user: Option<UserId>) {
        if self.local_user != user {
            self.local_user = user;
            self.touch();
        }
    }

    /// Focused thread.
    pub fn active_thread(&self) -> Option<ThreadId> {
        self.active_thread
    }

    /// Focus a thread and reset its unread count. Returns the previous active
    /// thread.
    ///
    /// Focusing a thread the store has not seen creates an empty entry for it.
    pub fn set_active_thread(&mut self, thread_id: Option<ThreadId>) -> Option<ThreadId> {
        let previous = std::mem::replace(&mut self.active_thread, thread_id);
        if let Some(id) = thread_id {
            self.ensure_thread(id).unread_count = 0;
        }
        self.touch();
        previous
    }

    /// Insert a thread or merge it into the existing entry.
    ///
    /// Title and participants are replaced when supplied. The activity
    /// timestamp never moves backwards. The active thread stays read.
    pub fn upsert_thread(&mut self, incoming: ConversationThread) {
        let is_active = self.active_thread == Some(incoming.id);
        let thread = self.ensure_thread(incoming.id);

        if incoming.title.is_some() {
            thread.title = incoming.title;
        }
        if !incoming.participants.is_empty() {
            thread.participants = incoming.participants;
        }
        if let Some(at) = incoming.last_activity {
            if thread.last_activity.is_none_or(|current| at >= current) {
                thread.last_activity = Some(at);
                thread.last_message = incoming.last_message;
            }
        }
        thread.unread_count = if is_active { 0 } else { incoming.unread_count };

        self.touch();
    }

    /// Replace the thread list from the listing API.
    ///
    /// Threads absent from the list are dropped unless they are active or
    /// hold messages received live.
    pub fn load_threads(&mut self, threads: Vec<ConversationThread>) {
        let listed: BTreeSet<ThreadId> = threads.iter().map(|t| t.id).collect();
        let active = self.active_thread;
        let messages = &self.messages;
        self.threads.retain(|id, _| {
            listed.contains(id)
                || active == Some(*id)
                || messages.get(id).is_some_and(|m| !m.is_empty())
        });

        for thread in threads {
            self.upsert_thread(thread);
        }
        self.touch();
    }

    /// Look up a thread.
    pub fn thread(&self, thread_id: ThreadId) -> Option<&ConversationThread> {
        self.threads.get(&thread_id)
    }

    /// Threads, most recently active first. Threads without activity sort
    /// last, then by id.
    pub fn threads(&self) -> Vec<&ConversationThread> {
        let mut threads: Vec<_> = self.threads.values().collect();
        threads.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then(a.id.cmp(&b.id)));
        threads
    }

    /// Messages of one thread in timestamp order.
    pub fn get_messages(&self, thread_id: ThreadId) -> &[Message] {
        self.messages.get(&thread_id).map_or(&[], Vec::as_slice)
    }

    /// Find a message by id.
    pub fn message(&self, thread_id: ThreadId, id: &MessageId) -> Option<&Message> {
        self.get_messages(thread_id).iter().find(|m| &m.id == id)
    }

    /// Connection state as last reported by the connection manager.
    pub fn get_connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Consecutive failed connection attempts.
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Users typing in a thread.
    pub fn typing_users(&self, thread_id: ThreadId) -> Vec<UserId> {
        self.typing.get(&thread_id).map(|users| users.iter().copied().collect()).unwrap_or_default()
    }

    /// True if the user is known online.
    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    /// Mark a pending optimistic message as failed.
    ///
    /// # Errors
    ///
    /// - `ClientError::MessageNotFound` if no such local message exists
    /// - `ClientError::UnexpectedStatus` if it is not pending
    pub fn mark_failed(&mut self, thread_id: ThreadId, local_id: u64) -> Result<(), ClientError> {
        let message = self.local_message_mut(thread_id, local_id)?;
        if message.status != MessageStatus::Pending {
            return Err(ClientError::UnexpectedStatus {
                message_id: message.id.to_string(),
                status: message.status,
                expected: MessageStatus::Pending,
            });
        }

        message.status = MessageStatus::Failed;
        self.touch();
        Ok(())
    }

    /// Remove a failed optimistic message so it can be resubmitted.
    ///
    /// # Errors
    ///
    /// - `ClientError::MessageNotFound` if no such local message exists
    /// - `ClientError::UnexpectedStatus` if it has not failed
    pub fn take_failed(&mut self, thread_id: ThreadId, local_id: u64) -> Result<Message, ClientError> {
        let message = self.local_message_mut(thread_id, local_id)?;
        if message.status != MessageStatus::Failed {
            return Err(ClientError::UnexpectedStatus {
                message_id: message.id.to_string(),
                status: message.status,
                expected: MessageStatus::Failed,
            });
        }

        let id = MessageId::Local(local_id);
        let list = self.messages.entry(thread_id).or_default();
        let Some(index) = list.iter().position(|m| m.id == id) else {
            return Err(ClientError::MessageNotFound { thread_id, message_id: id.to_string() });
        };
        let message = list.remove(index);
        self.touch();
        Ok(message)
    }

    /// Take an immutable snapshot for observers.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: self.version,
            threads: self.threads().into_iter().cloned().collect(),
            active_thread: self.active_thread,
            messages: self.messages.clone(),
            connection: self.connection,
            reconnect_attempt: self.reconnect_attempt,
            typing: self
                .typing
                .iter()
                .filter(|(_, users)| !users.is_empty())
                .map(|(id, users)| (*id, users.iter().copied().collect()))
                .collect(),
            online: self.online.iter().copied().collect(),
        }
    }

    pub(crate) fn set_connection_state(&mut self, state: ConnectionState, attempt: u32) -> bool {
        if self.connection == state && self.reconnect_attempt == attempt {
            return false;
        }
        let changed = self.connection != state;
        self.connection = state;
        self.reconnect_attempt = attempt;
        self.touch();
        changed
    }

    pub(crate) fn set_typing(&mut self, thread_id: ThreadId, user: UserId, typing: bool) -> bool {
        let changed = if typing {
            self.typing.entry(thread_id).or_default().insert(user)
        } else {
            self.typing.get_mut(&thread_id).is_some_and(|users| users.remove(&user))
        };
        if changed {
            self.touch();
        }
        changed
    }

    pub(crate) fn clear_typing(&mut self) {
        if self.typing.values().any(|users| !users.is_empty()) {
            self.typing.clear();
            self.touch();
        }
    }

    pub(crate) fn set_online(&mut self, user: UserId, online: bool) -> bool {
        let changed = if online { self.online.insert(user) } else { self.online.remove(&user) };
        if changed {
            self.touch();
        }
        changed
    }

    pub(crate) fn clear_presence(&mut self) {
        if !self.online.is_empty() {
            self.online.clear();
            self.touch();
        }
    }

    pub(crate) fn messages_mut(&mut self, thread_id: ThreadId) -> &mut Vec<Message> {
        self.messages.entry(thread_id).or_default()
    }

    /// Insert keeping timestamp order; ties go after existing entries.
    pub(crate) fn insert_sorted(&mut self, message: Message) -> usize {
        let list = self.messages_mut(message.thread_id);
        let index = list.partition_point(|m| m.timestamp <= message.timestamp);
        list.insert(index, message);
        index
    }

    /// Advance the thread preview if `at` is not older than the current one.
    pub(crate) fn record_activity(&mut self, thread_id: ThreadId, at: DateTime<Utc>, preview: String) {
        let thread = self.ensure_thread(thread_id);
        if thread.last_activity.is_none_or(|current| at >= current) {
            thread.last_activity = Some(at);
            thread.last_message = Some(preview);
        }
    }

    pub(crate) fn increment_unread(&mut self, thread_id: ThreadId) {
        let thread = self.ensure_thread(thread_id);
        thread.unread_count = thread.unread_count.saturating_add(1);
    }

    pub(crate) fn ensure_thread(&mut self, thread_id: ThreadId) -> &mut ConversationThread {
        self.threads.entry(thread_id).or_insert_with(|| ConversationThread::new(thread_id))
    }

    pub(crate) fn touch(&mut self) {
        self.version += 1;
    }

    fn local_message_mut(
        &mut self,
        thread_id: ThreadId,
        local_id: u64,
    ) -> Result<&mut Message, ClientError> {
        let id = MessageId::Local(local_id);
        self.messages
            .get_mut(&thread_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == id))
            .ok_or_else(|| ClientError::MessageNotFound { thread_id, message_id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::MessageReconciler;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000 + secs, 0).unwrap()
    }

    fn delivered(id: &str, thread_id: ThreadId, secs: i64) -> Message {
        Message {
            id: MessageId::Server(id.into()),
            thread_id,
            sender_id: 2,
            sender_name: None,
            content: format!("msg {id}"),
            timestamp: at(secs),
            status: MessageStatus::Delivered,
            metadata: Map::new(),
            replaced_local: None,
        }
    }

    #[test]
    fn local_ids_render_as_temp() {
        assert_eq!(MessageId::Local(17).to_string(), "temp-17");
        assert_eq!(MessageId::Server("abc".into()).to_string(), "abc");
        assert_eq!(serde_json::to_value(MessageId::Local(3)).unwrap(), Value::from("temp-3"));
    }

    #[test]
    fn activating_thread_resets_unread() {
        let mut store = ConversationStore::new();
        store.upsert_thread(ConversationThread::new(1).with_unread(4));
        assert_eq!(store.thread(1).unwrap().unread_count, 4);

        assert_eq!(store.set_active_thread(Some(1)), None);
        assert_eq!(store.thread(1).unwrap().unread_count, 0);

        // Listing refresh cannot resurrect unread on the active thread
        store.upsert_thread(ConversationThread::new(1).with_unread(9));
        assert_eq!(store.thread(1).unwrap().unread_count, 0);
    }

    #[test]
    fn activating_unknown_thread_creates_it() {
        let mut store = ConversationStore::new();
        store.set_active_thread(Some(5));
        assert!(store.thread(5).is_some());
    }

    #[test]
    fn upsert_never_moves_activity_backwards() {
        let mut store = ConversationStore::new();
        store.upsert_thread(ConversationThread::new(1).with_last_message("newer", at(100)));
        store.upsert_thread(
            ConversationThread::new(1).with_title("Refill question").with_last_message("older", at(50)),
        );

        let thread = store.thread(1).unwrap();
        assert_eq!(thread.title.as_deref(), Some("Refill question"));
        assert_eq!(thread.last_message.as_deref(), Some("newer"));
        assert_eq!(thread.last_activity, Some(at(100)));
    }

    #[test]
    fn threads_sorted_by_recency() {
        let mut store = ConversationStore::new();
        store.upsert_thread(ConversationThread::new(1).with_last_message("a", at(10)));
        store.upsert_thread(ConversationThread::new(2));
        store.upsert_thread(ConversationThread::new(3).with_last_message("c", at(30)));

        let order: Vec<_> = store.threads().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn load_threads_keeps_live_and_active_threads() {
        let mut store = ConversationStore::new();
        store.upsert_thread(ConversationThread::new(1));
        store.upsert_thread(ConversationThread::new(2));
        MessageReconciler::default().apply_history(2, vec![delivered("a", 2, 0)], &mut store);
        store.set_active_thread(Some(3));

        store.load_threads(vec![ConversationThread::new(4)]);

        let mut ids: Vec<_> = store.threads().iter().map(|t| t.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let mut store = ConversationStore::new();
        store.insert_sorted(delivered("first", 1, 5));
        store.insert_sorted(delivered("second", 1, 5));
        store.insert_sorted(delivered("early", 1, 4));

        let ids: Vec<_> = store.get_messages(1).iter().map(|m| m.id.to_string()).collect();
        assert_eq!(ids, vec!["early", "first", "second"]);
    }

    #[test]
    fn failed_lifecycle() {
        let mut store = ConversationStore::new();
        let pending = Message::optimistic(1, 9, 2, "hi".into(), at(0), Map::new());
        store.insert_sorted(pending);

        assert!(matches!(
            store.take_failed(9, 1),
            Err(ClientError::UnexpectedStatus { status: MessageStatus::Pending, .. })
        ));

        store.mark_failed(9, 1).unwrap();
        assert_eq!(store.get_messages(9)[0].status, MessageStatus::Failed);
        assert!(matches!(store.mark_failed(9, 1), Err(ClientError::UnexpectedStatus { .. })));

        let taken = store.take_failed(9, 1).unwrap();
        assert_eq!(taken.content, "hi");
        assert!(store.get_messages(9).is_empty());
        assert!(matches!(store.mark_failed(9, 1), Err(ClientError::MessageNotFound { .. })));
    }

    #[test]
    fn typing_and_presence_changes_are_reported_once() {
        let mut store = ConversationStore::new();
        assert!(store.set_typing(1, 7, true));
        assert!(!store.set_typing(1, 7, true));
        assert_eq!(store.typing_users(1), vec![7]);
        assert!(store.set_typing(1, 7, false));
        assert!(!store.set_typing(1, 7, false));

        assert!(store.set_online(7, true));
        assert!(!store.set_online(7, true));
        assert!(store.is_online(7));
    }

    #[test]
    fn snapshot_omits_empty_typing_sets() {
        let mut store = ConversationStore::new();
        store.set_typing(1, 7, true);
        store.set_typing(1, 7, false);
        assert!(store.snapshot().typing.is_empty());
    }

    #[test]
    fn version_advances_on_mutation() {
        let mut store = ConversationStore::new();
        let v0 = store.version();
        store.set_active_thread(Some(1));
        assert!(store.version() > v0);

        let v1 = store.version();
        assert!(!store.set_connection_state(ConnectionState::Disconnected, 0));
        assert_eq!(store.version(), v1);
    }

    #[test]
    fn snapshot_serializes_for_ui() {
        let mut store = ConversationStore::new();
        MessageReconciler::default().apply_history(1, vec![delivered("a", 1, 0)], &mut store);
        let json = serde_json::to_value(store.snapshot()).unwrap();

        assert_eq!(json["connection"], "disconnected");
        assert_eq!(json["messages"]["1"][0]["id"], "a");
        assert_eq!(json["messages"]["1"][0]["status"], "delivered");
        assert_eq!(json["threads"][0]["unreadCount"], 0);
    }
}
