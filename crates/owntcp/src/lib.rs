//! # OwnTcp
//!
//! Keeps player instances in sync over TCP. A server applies every client's
//! changes in one global order and fans them out; clients pull a snapshot on
//! connect and then exchange coalesced change notifications.
//!
//! The transport never looks inside payloads. Domain state is reached through
//! a [`Dispatcher`] (apply received messages, produce/apply snapshots) and a
//! [`ChangeSource`] (learn about local mutations to forward).

pub mod base;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod pending;
pub mod send_queue;
pub mod server;
pub mod service;
pub mod topic_lock;


pub use client::ClientCommunicator;
pub use client::Disconnected;
pub use client::State;
pub use config::Config;
pub use error::Error;
pub use error::Result;
pub use events::Subscribers;
pub use events::Subscription;
pub use server::ConnectionEvent;
pub use server::ConnectionId;
pub use server::ServerCommunicator;
pub use service::Change;
pub use service::ChangeSource;
pub use service::Dispatcher;

pub use ownrpc::Answer;
pub use ownrpc::AnswerCode;
pub use ownrpc::Topic;
