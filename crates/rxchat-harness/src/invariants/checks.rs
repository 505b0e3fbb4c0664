//! Standard invariant checks.

use std::collections::HashSet;

use rxchat_client::{MessageId, MessageStatus, StoreSnapshot};

use super::{Invariant, InvariantResult, Violation};

/// Messages of every thread are sorted by timestamp.
///
/// Renderers show the list as-is, so an out-of-order insert would show up as
/// a message jumping backwards in the conversation.
pub struct MessagesOrdered;

impl Invariant for MessagesOrdered {
    fn name(&self) -> &'static str {
        "MessagesOrdered"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        for (thread_id, messages) in &state.messages {
            for window in messages.windows(2) {
                if window[1].timestamp < window[0].timestamp {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "thread {thread_id}: {:?} at {} after {:?} at {}",
                            window[1].id, window[1].timestamp, window[0].id, window[0].timestamp
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A server id appears at most once per thread.
pub struct UniqueServerIds;

impl Invariant for UniqueServerIds {
    fn name(&self) -> &'static str {
        "UniqueServerIds"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        for (thread_id, messages) in &state.messages {
            let mut seen = HashSet::new();
            for id in messages.iter().filter_map(|message| message.id.server()) {
                if !seen.insert(id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("thread {thread_id}: server id {id} duplicated"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Delivery status agrees with the id kind.
///
/// Local ids are pending or failed. Server ids are delivered.
pub struct StatusMatchesId;

impl Invariant for StatusMatchesId {
    fn name(&self) -> &'static str {
        "StatusMatchesId"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        for (thread_id, messages) in &state.messages {
            for message in messages {
                let consistent = match &message.id {
                    MessageId::Local(_) => message.status != MessageStatus::Delivered,
                    MessageId::Server(_) => message.status == MessageStatus::Delivered,
                };
                if !consistent {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "thread {thread_id}: {:?} has status {:?}",
                            message.id, message.status
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The focused thread never shows unread messages.
pub struct ActiveThreadRead;

impl Invariant for ActiveThreadRead {
    fn name(&self) -> &'static str {
        "ActiveThreadRead"
    }

    fn check(&self, state: &StoreSnapshot) -> InvariantResult {
        let Some(active) = state.active_thread else { return Ok(()) };
        match state.thread(active) {
            Some(thread) if thread.unread_count > 0 => Err(Violation {
                invariant: self.name(),
                message: format!("active thread {active} has {} unread", thread.unread_count),
            }),
            _ => Ok(()),
        }
    }
}
