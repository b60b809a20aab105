// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unified connection to an AMQP 0-9-1 or MQTT 3.1/5 broker.
//!
//! A [`Connection`] owns the transport only; queues attach to it and ride its
//! status transitions. Dial/reconnect is driven by a background task spawned
//! from [`Connection::connect`] and torn down by [`Connection::close`].

pub mod amqp;
pub mod mqtt;

use crate::error::{GeneralMqError, GeneralMqErrorKind, Result};
use crate::status::{Status, StatusReceiver};
use std::sync::Arc;

pub use amqp::{AmqpConnection, AmqpConnectionOptions, AmqpConnectionOptionsBuilder};
pub use mqtt::{MqttConnection, MqttConnectionOptions, MqttConnectionOptionsBuilder};

/// Broker protocol family a [`Connection`] speaks. A Queue must be built from
/// a Connection of the matching family; mixing families is rejected at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// AMQP 0-9-1, via `lapin`.
    Amqp,
    /// MQTT 3.1/5, via `rumqttc`.
    Mqtt,
}

/// A transport to a single broker host, reference-countable via
/// [`crate::pool::ConnectionPool`] and shared by every [`crate::queue::Queue`]
/// built on top of it.
#[derive(Clone)]
pub enum Connection {
    /// AMQP 0-9-1 transport.
    Amqp(Arc<AmqpConnection>),
    /// MQTT 3.1/5 transport.
    Mqtt(Arc<MqttConnection>),
}

impl Connection {
    /// Build a Connection from a `amqp(s)://` or `mqtt(s)://` URI, using
    /// default options for everything the URI does not encode.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let parsed = fluent_uri::Uri::parse(uri)
            .map_err(|e| GeneralMqError::invalid_argument(format!("invalid host uri: {e}")))?;
        match parsed.scheme().as_str() {
            "amqp" | "amqps" => Ok(Self::Amqp(Arc::new(AmqpConnection::new(
                AmqpConnectionOptionsBuilder::default()
                    .host_uri(uri)
                    .build()
                    .map_err(|e| GeneralMqError::invalid_argument(e.to_string()))?,
            ))),
            "mqtt" | "mqtts" => Ok(Self::Mqtt(Arc::new(MqttConnection::new(
                MqttConnectionOptionsBuilder::default()
                    .host_uri(uri)
                    .build()
                    .map_err(|e| GeneralMqError::invalid_argument(e.to_string()))?,
            )?))),
            other => Err(GeneralMqError::invalid_argument(format!(
                "unsupported host uri scheme: {other}"
            ))),
        }
    }

    /// Build an AMQP connection from fully specified options.
    #[must_use]
    pub fn new_amqp(options: AmqpConnectionOptions) -> Self {
        Self::Amqp(Arc::new(AmqpConnection::new(options)))
    }

    /// Build an MQTT connection from fully specified options.
    pub fn new_mqtt(options: MqttConnectionOptions) -> Result<Self> {
        Ok(Self::Mqtt(Arc::new(MqttConnection::new(options)?)))
    }

    /// Which protocol family this connection speaks.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Amqp(_) => Protocol::Amqp,
            Self::Mqtt(_) => Protocol::Mqtt,
        }
    }

    /// Begin (or resume) dialing the broker. Returns once the background
    /// reconnect loop has been spawned; does not wait for `Connected`.
    pub async fn connect(&self) -> Result<()> {
        match self {
            Self::Amqp(c) => c.connect().await,
            Self::Mqtt(c) => c.connect().await,
        }
    }

    /// Stop reconnecting and tear down the transport.
    pub async fn close(&self) -> Result<()> {
        match self {
            Self::Amqp(c) => c.close().await,
            Self::Mqtt(c) => c.close().await,
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Amqp(c) => c.status(),
            Self::Mqtt(c) => c.status(),
        }
    }

    /// Subscribe to this connection's status transitions.
    #[must_use]
    pub fn status_receiver(&self) -> StatusReceiver {
        match self {
            Self::Amqp(c) => c.status_receiver(),
            Self::Mqtt(c) => c.status_receiver(),
        }
    }

    pub(crate) fn as_amqp(&self) -> Result<&Arc<AmqpConnection>> {
        match self {
            Self::Amqp(c) => Ok(c),
            Self::Mqtt(_) => Err(GeneralMqError::new(GeneralMqErrorKind::InvalidArgument(
                "queue/connection protocol family mismatch: expected amqp".to_string(),
            ))),
        }
    }

    pub(crate) fn as_mqtt(&self) -> Result<&Arc<MqttConnection>> {
        match self {
            Self::Mqtt(c) => Ok(c),
            Self::Amqp(_) => Err(GeneralMqError::new(GeneralMqErrorKind::InvalidArgument(
                "queue/connection protocol family mismatch: expected mqtt".to_string(),
            ))),
        }
    }
}
