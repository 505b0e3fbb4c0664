//! Invariant checking for simulation tests.
//!
//! Invariants are properties of a [`StoreSnapshot`] that must hold after every
//! event, whatever the interleaving of sends, echoes, history pages and
//! reconnects. Tests run an [`InvariantRegistry`] against each snapshot a
//! service publishes.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.assert_all(&service.snapshot(), "after reconnect");
//! ```

mod checks;

use rxchat_client::StoreSnapshot;

pub use checks::{ActiveThreadRead, MessagesOrdered, StatusMatchesId, UniqueServerIds};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property that must hold for every snapshot.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &StoreSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with the standard store invariants.
    ///
    /// Includes:
    /// - [`MessagesOrdered`]: each thread's messages are in timestamp order
    /// - [`UniqueServerIds`]: no server id appears twice in a thread
    /// - [`StatusMatchesId`]: local ids are never delivered, server ids never
    ///   pending
    /// - [`ActiveThreadRead`]: the active thread has no unread messages
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(MessagesOrdered);
        registry.add(UniqueServerIds);
        registry.add(StatusMatchesId);
        registry.add(ActiveThreadRead);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &StoreSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &StoreSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
