//! Transport seam.
//!
//! The service never touches sockets. A [`TransportFactory`] opens a fresh
//! bidirectional frame channel per connect attempt and hands back a
//! [`TransportLink`]. Dropping the link closes the transport; the factory's
//! side sees its receiver end. A closed inbound channel means the peer went
//! away.
//!
//! Reconnects always go through a new `connect()`; no session resumption is
//! assumed.

use std::future::Future;

use rxchat_proto::{ClientFrame, ServerFrame};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The transport is closed.
    #[error("transport closed")]
    Closed,
}

/// Open transport: frames to the server and frames from the server.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to the server
    pub outbound: mpsc::Sender<ClientFrame>,
    /// Frames from the server. `None` from `recv` means the peer closed.
    pub inbound: mpsc::Receiver<ServerFrame>,
}

impl TransportLink {
    /// Bundle the two channel halves.
    pub fn new(outbound: mpsc::Sender<ClientFrame>, inbound: mpsc::Receiver<ServerFrame>) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens transports on demand.
///
/// # Implementations
///
/// - Production: a WebSocket or similar adaptor that encodes frames with
///   [`ClientFrame::encode`] / [`ServerFrame::decode`]
/// - Simulation: an in-memory broker
pub trait TransportFactory: Send + Sync + 'static {
    /// Open a fresh transport.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connect` if the server is unreachable
    fn connect(&self) -> impl Future<Output = Result<TransportLink, TransportError>> + Send;
}
