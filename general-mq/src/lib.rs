// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! A unified unicast/broadcast, reliable/best-effort messaging abstraction
//! over AMQP 0-9-1 and MQTT 3.1/5.
//!
//! A [`connection::Connection`] owns a transport to one broker host; one or
//! more [`queue::Queue`]s attach to it to send or receive. A
//! [`pool::ConnectionPool`] lets several queues (and, in higher layers, an
//! application-specific manager) share one connection per host.

pub mod connection;
pub mod error;
pub mod pool;
pub mod queue;
mod constants;
mod status;

pub use connection::{Connection, Protocol};
pub use constants::is_valid_name;
pub use error::{GeneralMqError, GeneralMqErrorKind, Result};
pub use pool::ConnectionPool;
pub use queue::{Message, MessageMeta, MsgHandlerFn, Queue};
pub use status::{Status, StatusChannel, StatusReceiver};

#[macro_use]
extern crate derive_builder;
