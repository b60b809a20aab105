// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Common error types

use thiserror::Error;

/// Error returned by a fallible general-mq operation.
///
/// Wraps a [`GeneralMqErrorKind`] the same way the kind-plus-wrapper errors in
/// this crate's predecessor separated the error category from its `Display`.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct GeneralMqError {
    kind: GeneralMqErrorKind,
}

impl GeneralMqError {
    /// Create a new [`GeneralMqError`]
    #[must_use]
    pub fn new(kind: GeneralMqErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`GeneralMqErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &GeneralMqErrorKind {
        &self.kind
    }

    /// Shorthand for constructing an [`GeneralMqErrorKind::InvalidArgument`] error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(GeneralMqErrorKind::InvalidArgument(msg.into()))
    }
}

/// An enumeration of categories of [`GeneralMqError`], matching the abstract error
/// kinds a unified Connection/Queue/Pool/Manager can surface.
#[derive(Debug, Error)]
pub enum GeneralMqErrorKind {
    /// Malformed options, out-of-range numeric, wrong connection family at queue
    /// construction, wrong host scheme, or malformed handler signature.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation requires `Connected` state but the queue/connection isn't.
    #[error("not connected")]
    NotConnected,
    /// A send-only operation was attempted on a receiver queue.
    #[error("queue is configured as a receiver")]
    QueueIsReceiver,
    /// `connect()` was called on a receiver queue with no message handler installed.
    #[error("no message handler installed")]
    NoMsgHandler,
    /// Broker-reported I/O or protocol failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// An external collaborator (auth, coremgr, ...) was unreachable.
    #[error("resource unavailable: {0}")]
    RscUnavailable(String),
}

/// Broker-reported transport failure, carrying the underlying client library's
/// own error type as its source rather than re-encoding it as a string -
/// mirrors how `azure_iot_operations_mqtt::error` re-exports `rumqttc`'s error
/// types instead of wrapping them opaquely.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Error from the AMQP 0-9-1 client
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
    /// Error from the MQTT client
    #[error(transparent)]
    Mqtt(#[from] rumqttc::v5::ClientError),
    /// Error from the MQTT connection/event loop
    #[error(transparent)]
    MqttConnection(#[from] rumqttc::v5::ConnectionError),
    /// Any other transport-level failure not captured by a specific variant
    #[error("{0}")]
    Other(String),
}

impl From<lapin::Error> for GeneralMqError {
    fn from(e: lapin::Error) -> Self {
        Self::new(GeneralMqErrorKind::Transport(TransportError::Amqp(e)))
    }
}

impl From<rumqttc::v5::ClientError> for GeneralMqError {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        Self::new(GeneralMqErrorKind::Transport(TransportError::Mqtt(e)))
    }
}

/// Result alias used throughout general-mq.
pub type Result<T> = std::result::Result<T, GeneralMqError>;
