//! Sockflow composes raw sockets, TLS termination and SOCKS5 negotiation behind
//! a uniform plugin/filter pipeline, frames inbound byte streams into messages
//! and dispatches session lifecycle events through an adaptive worker pool.
//!
//! A [SocketContext](context::SocketContext) carries the immutable wiring of a
//! listener or client. Each connection gets a [Session](session::Session) whose
//! events are raised by the [IoLoop](executor::IoLoop) read tasks and processed
//! on the [WorkerPool](executor::WorkerPool), with at most one RECEIVE in flight
//! per session.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod buffer;
pub mod codec;
pub mod context;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod handler;
pub mod plugin;
pub mod session;
pub mod tls;
pub mod transport;

pub use error::{Error, Result};
pub use handler::{Handler, Message, SynchronousHandler};

#[cfg(test)]
pub(crate) mod test_util;
