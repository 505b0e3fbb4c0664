//! Runtime loop.
//!
//! Owns the [`ChatClient`] and executes its actions. All inputs (service
//! commands, transport outcomes, inbound frames, timer expiry) are serialized
//! through one `select!` loop, so the client is only ever touched from this
//! task.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use rxchat_client::{ChatClient, ClientAction, ClientError, ClientEvent, StoreSnapshot};
use rxchat_core::{Credentials, Environment};
use rxchat_proto::{ClientFrame, ServerFrame};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::{
    config::ChatConfig,
    error::ServiceError,
    event::ChatEvent,
    transport::{TransportError, TransportFactory, TransportLink},
};

/// Requests from [`ChatService`](crate::ChatService) handles.
pub(crate) enum Command<I> {
    /// Start connecting; reply once the first session is up or the sequence
    /// fails
    Connect {
        credentials: Credentials,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    /// Feed one event to the client and reply with its actions
    Dispatch {
        event: ClientEvent<I>,
        reply: oneshot::Sender<Result<Vec<ClientAction>, ClientError>>,
    },
    /// Disconnect and stop the loop
    Shutdown { reply: oneshot::Sender<()> },
}

/// Outcome of a spawned `TransportFactory::connect`.
struct Opened {
    seq: u64,
    result: Result<TransportLink, TransportError>,
}

pub(crate) struct Runtime<E, F>
where
    E: Environment,
    F: TransportFactory,
{
    env: E,
    client: ChatClient<E>,
    factory: Arc<F>,
    idle_tick: Duration,
    commands: mpsc::Receiver<Command<E::Instant>>,
    opened_tx: mpsc::Sender<Opened>,
    opened_rx: mpsc::Receiver<Opened>,
    link: Option<TransportLink>,
    /// Sequence number of the most recent open request
    open_seq: u64,
    /// Open request whose outcome the client is waiting for
    pending_open: Option<u64>,
    connect_waiters: Vec<oneshot::Sender<Result<(), ServiceError>>>,
    snapshots: watch::Sender<StoreSnapshot>,
    events: broadcast::Sender<ChatEvent>,
}

impl<E, F> Runtime<E, F>
where
    E: Environment,
    F: TransportFactory,
{
    pub(crate) fn new(
        env: E,
        factory: F,
        config: &ChatConfig,
        commands: mpsc::Receiver<Command<E::Instant>>,
        events: broadcast::Sender<ChatEvent>,
    ) -> (Self, watch::Receiver<StoreSnapshot>) {
        let client = ChatClient::new(env.clone(), config.client.clone());
        let (snapshots, snapshot_rx) = watch::channel(client.snapshot());
        let (opened_tx, opened_rx) = mpsc::channel(4);
        let runtime = Self {
            client,
            env,
            factory: Arc::new(factory),
            idle_tick: config.idle_tick,
            commands,
            opened_tx,
            opened_rx,
            link: None,
            open_seq: 0,
            pending_open: None,
            connect_waiters: Vec::new(),
            snapshots,
            events,
        };
        (runtime, snapshot_rx)
    }

    /// Run until shut down or every service handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let wait = self.next_wait();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("all service handles dropped, stopping");
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                },
                Some(opened) = self.opened_rx.recv() => self.handle_opened(opened).await,
                inbound = next_inbound(&mut self.link) => self.handle_inbound(inbound).await,
                () = self.env.sleep(wait) => {
                    let now = self.env.now();
                    // Errors are logged inside dispatch
                    let _ = self.dispatch(ClientEvent::Tick { now }).await;
                },
            }
        }
    }

    fn next_wait(&self) -> Duration {
        let now = self.env.now();
        match self.client.next_deadline() {
            Some(deadline) if deadline > now => (deadline - now).min(self.idle_tick),
            Some(_) => Duration::ZERO,
            None => self.idle_tick,
        }
    }

    async fn handle_command(&mut self, command: Command<E::Instant>) -> ControlFlow<()> {
        match command {
            Command::Connect { credentials, reply } => {
                self.connect_waiters.push(reply);
                if let Err(error) = self.dispatch(ClientEvent::Connect { credentials }).await {
                    if let Some(reply) = self.connect_waiters.pop() {
                        let _ = reply.send(Err(error.into()));
                    }
                }
            },
            Command::Dispatch { event, reply } => {
                let result = self.dispatch(event).await;
                let _ = reply.send(result);
            },
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            },
        }
        ControlFlow::Continue(())
    }

    async fn handle_opened(&mut self, opened: Opened) {
        if self.pending_open != Some(opened.seq) {
            tracing::debug!(seq = opened.seq, "discarding stale transport");
            return;
        }
        self.pending_open = None;

        let event = match opened.result {
            Ok(link) => {
                self.link = Some(link);
                ClientEvent::TransportOpened
            },
            Err(error) => ClientEvent::TransportOpenFailed { reason: error.to_string() },
        };
        if let Err(error) = self.dispatch(event).await {
            tracing::warn!(%error, "transport outcome rejected");
        }
    }

    async fn handle_inbound(&mut self, inbound: Option<ServerFrame>) {
        let event = match inbound {
            Some(frame) => ClientEvent::FrameReceived(frame),
            None => {
                self.link = None;
                ClientEvent::TransportClosed { reason: "closed by peer".to_string() }
            },
        };
        if let Err(error) = self.dispatch(event).await {
            tracing::warn!(%error, "inbound event rejected");
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.dispatch(ClientEvent::Disconnect).await;
        self.link = None;
        self.resolve_waiters(&Err(ServiceError::Stopped));
    }

    async fn dispatch(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let result = self.client.handle(event);
        match &result {
            Ok(actions) => self.execute(actions.clone()).await,
            Err(error) => tracing::debug!(%error, "event rejected"),
        }
        self.publish_snapshot();
        result
    }

    async fn execute(&mut self, actions: Vec<ClientAction>) {
        let mut pending_actions = actions;

        while !pending_actions.is_empty() {
            let actions = std::mem::take(&mut pending_actions);

            for action in actions {
                if let Some(event) = ChatEvent::from_action(&action) {
                    // No subscribers is fine
                    let _ = self.events.send(event);
                }

                match action {
                    ClientAction::Send(frame) => {
                        let outbound = self.link.as_ref().map(|link| link.outbound.clone());
                        if let Err(error) = send_frame(outbound, frame).await {
                            tracing::warn!(%error, "transport write failed");
                            self.link = None;
                            let closed = ClientEvent::TransportClosed { reason: error.to_string() };
                            match self.client.handle(closed) {
                                Ok(follow_up) => pending_actions.extend(follow_up),
                                Err(error) => tracing::warn!(%error, "close after write failure rejected"),
                            }
                        }
                    },
                    ClientAction::OpenTransport { attempt } => self.open_transport(attempt),
                    ClientAction::CloseTransport => {
                        self.link = None;
                        self.pending_open = None;
                    },
                    ClientAction::RetryScheduled { .. } => self.pending_open = None,
                    ClientAction::Connected { .. } => self.resolve_waiters(&Ok(())),
                    ClientAction::ConnectFailed(error) => {
                        self.pending_open = None;
                        self.resolve_waiters(&Err(ServiceError::Connection(error)));
                    },
                    ClientAction::StateChanged { .. }
                    | ClientAction::MessagePending { .. }
                    | ClientAction::MessageConfirmed { .. }
                    | ClientAction::MessageReceived { .. }
                    | ClientAction::MessageFailed { .. } => {},
                }
            }
        }
    }

    fn open_transport(&mut self, attempt: u32) {
        self.link = None;
        self.open_seq += 1;
        let seq = self.open_seq;
        self.pending_open = Some(seq);

        tracing::debug!(attempt, seq, "opening transport");
        let factory = Arc::clone(&self.factory);
        let opened = self.opened_tx.clone();
        tokio::spawn(async move {
            let result = factory.connect().await;
            // Runtime gone means nobody wants the transport
            let _ = opened.send(Opened { seq, result }).await;
        });
    }

    fn resolve_waiters(&mut self, result: &Result<(), ServiceError>) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn publish_snapshot(&self) {
        let version = self.client.store().version();
        self.snapshots.send_if_modified(|current| {
            if current.version == version {
                return false;
            }
            *current = self.client.snapshot();
            true
        });
    }
}

async fn send_frame(
    outbound: Option<mpsc::Sender<ClientFrame>>,
    frame: ClientFrame,
) -> Result<(), TransportError> {
    let Some(outbound) = outbound else {
        tracing::debug!("no transport, dropping frame");
        return Ok(());
    };
    outbound.send(frame).await.map_err(|_| TransportError::Closed)
}

async fn next_inbound(link: &mut Option<TransportLink>) -> Option<ServerFrame> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}
