//! Async chat service
//!
//! Runs the sans-IO [`rxchat_client::ChatClient`] on a tokio task, executes
//! its actions against a pluggable transport, and publishes state to
//! observers.
//!
//! # Components
//!
//! - [`ChatService`]: handle with explicit `create`/`dispose` lifecycle
//! - [`TransportFactory`]: seam to the wire transport
//! - [`SystemEnv`]: production clocks and entropy
//! - [`ChatEvent`]: broadcast notifications
//! - [`ChatConfig`]: state machine settings plus channel sizing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod event;
mod runtime;
mod service;
mod system_env;
mod transport;

pub use config::{ChatConfig, DEFAULT_COMMAND_CAPACITY, DEFAULT_EVENT_CAPACITY, DEFAULT_IDLE_TICK};
pub use error::ServiceError;
pub use event::ChatEvent;
pub use rxchat_client::{
    ChannelSet, ClientConfig, ConnectionState, ConversationThread, Credentials, Environment,
    Message, MessageId, MessageStatus, StoreSnapshot,
};
pub use service::ChatService;
pub use system_env::SystemEnv;
pub use transport::{TransportError, TransportFactory, TransportLink};
