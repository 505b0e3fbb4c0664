//! Public service handle.

use rxchat_client::{ClientAction, ClientEvent, ConversationThread, StoreSnapshot};
use rxchat_core::{Credentials, Environment};
use rxchat_proto::ThreadId;
use serde_json::{Map, Value};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    config::ChatConfig,
    error::ServiceError,
    event::ChatEvent,
    runtime::{Command, Runtime},
    transport::TransportFactory,
};

/// Chat synchronization service.
///
/// Each instance owns an isolated runtime task with its own store,
/// connection and transport factory. Instances share nothing, so tests can
/// run many side by side.
///
/// # Lifecycle
///
/// [`create`](Self::create) spawns the runtime on the current tokio runtime.
/// [`dispose`](Self::dispose) leaves live rooms, closes the transport and
/// waits for the task to finish. Dropping the handle without disposing stops
/// the task as well, without waiting.
///
/// # Observing
///
/// - [`snapshot`](Self::snapshot) / [`watch`](Self::watch): latest
///   [`StoreSnapshot`]
/// - [`events`](Self::events): [`ChatEvent`] stream, one receiver per
///   subscriber
pub struct ChatService<E: Environment> {
    commands: mpsc::Sender<Command<E::Instant>>,
    snapshots: watch::Receiver<StoreSnapshot>,
    events: broadcast::Sender<ChatEvent>,
    task: JoinHandle<()>,
}

impl<E: Environment> ChatService<E> {
    /// Spawn a service.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create<F: TransportFactory>(env: E, factory: F, config: ChatConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(config.command_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let (runtime, snapshots) =
            Runtime::new(env, factory, &config, command_rx, events.clone());
        let task = tokio::spawn(runtime.run());

        tracing::debug!("chat service created");
        Self { commands, snapshots, events, task }
    }

    /// Disconnect and stop the runtime task.
    pub async fn dispose(self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        if let Err(error) = self.task.await {
            tracing::error!(%error, "chat runtime task failed");
        }
        tracing::debug!("chat service disposed");
    }

    /// Connect and authenticate.
    ///
    /// Resolves once the first session is established. Later connection
    /// losses are retried in the background without ceiling.
    ///
    /// # Errors
    ///
    /// - `ServiceError::Connection` with `AuthRejected` if the server rejects
    ///   the credentials, `RetriesExhausted` after the initial attempt ceiling,
    ///   or `Cancelled` if [`disconnect`](Self::disconnect) is called first
    /// - `ServiceError::Client` if already connecting or connected
    pub async fn connect(&self, credentials: Credentials) -> Result<(), ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Connect { credentials, reply })
            .await
            .map_err(|_| ServiceError::Stopped)?;
        response.await.map_err(|_| ServiceError::Stopped)?
    }

    /// Leave live rooms, close the transport and cancel pending retries.
    pub async fn disconnect(&self) -> Result<(), ServiceError> {
        self.request(ClientEvent::Disconnect).await.map(drop)
    }

    /// Send a text message. Returns the local id of the optimistic entry.
    ///
    /// Resolves as soon as the message is stored and handed to the transport;
    /// confirmation arrives later as [`ChatEvent::MessageConfirmed`].
    pub async fn send_message(
        &self,
        thread_id: ThreadId,
        content: impl Into<String>,
    ) -> Result<u64, ServiceError> {
        self.send_message_with(thread_id, content, Map::new()).await
    }

    /// Send a message with attachment metadata.
    pub async fn send_message_with(
        &self,
        thread_id: ThreadId,
        content: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<u64, ServiceError> {
        let actions = self
            .request(ClientEvent::SendMessage { thread_id, content: content.into(), metadata })
            .await?;
        pending_local_id(&actions)
    }

    /// Report that the local user started or stopped typing.
    pub async fn set_typing(&self, thread_id: ThreadId, is_typing: bool) -> Result<(), ServiceError> {
        self.request(ClientEvent::SetTyping { thread_id, is_typing }).await.map(drop)
    }

    /// Focus a thread, or none. Resets its unread count and moves the live
    /// subscription.
    pub async fn set_active_thread(&self, thread_id: Option<ThreadId>) -> Result<(), ServiceError> {
        self.request(ClientEvent::SetActiveThread(thread_id)).await.map(drop)
    }

    /// Replace the thread list with a page from the listing API.
    pub async fn load_threads(&self, threads: Vec<ConversationThread>) -> Result<(), ServiceError> {
        self.request(ClientEvent::LoadThreads(threads)).await.map(drop)
    }

    /// Merge one thread from the listing API.
    pub async fn upsert_thread(&self, thread: ConversationThread) -> Result<(), ServiceError> {
        self.request(ClientEvent::UpsertThread(thread)).await.map(drop)
    }

    /// Merge a page of raw history entries.
    pub async fn load_history(
        &self,
        thread_id: ThreadId,
        page: Vec<Value>,
    ) -> Result<(), ServiceError> {
        self.request(ClientEvent::LoadHistory { thread_id, page }).await.map(drop)
    }

    /// Mark a pending message failed after a caller-side timeout.
    pub async fn mark_failed(&self, thread_id: ThreadId, local_id: u64) -> Result<(), ServiceError> {
        self.request(ClientEvent::MarkFailed { thread_id, local_id }).await.map(drop)
    }

    /// Resubmit a failed message. Returns the new local id.
    pub async fn retry_message(
        &self,
        thread_id: ThreadId,
        local_id: u64,
    ) -> Result<u64, ServiceError> {
        let actions = self.request(ClientEvent::RetryMessage { thread_id, local_id }).await?;
        pending_local_id(&actions)
    }

    /// Latest state.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshots.clone()
    }

    /// Subscribe to events from now on.
    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    async fn request(&self, event: ClientEvent<E::Instant>) -> Result<Vec<ClientAction>, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Dispatch { event, reply })
            .await
            .map_err(|_| ServiceError::Stopped)?;
        let result = response.await.map_err(|_| ServiceError::Stopped)?;
        Ok(result?)
    }
}

/// A successful send always reports its pending entry.
fn pending_local_id(actions: &[ClientAction]) -> Result<u64, ServiceError> {
    actions
        .iter()
        .find_map(|action| match action {
            ClientAction::MessagePending { local_id, .. } => Some(*local_id),
            _ => None,
        })
        .ok_or(ServiceError::Stopped)
}
