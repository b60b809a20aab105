// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unified unicast/broadcast, reliable/best-effort message queue over an
//! AMQP or MQTT [`crate::connection::Connection`].

pub mod amqp;
pub mod mqtt;

use crate::error::{GeneralMqError, GeneralMqErrorKind, Result};
use crate::status::{Status, StatusReceiver};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use amqp::{AmqpQueue, AmqpQueueOptions, AmqpQueueOptionsBuilder};
pub use mqtt::{MqttQueue, MqttQueueOptions, MqttQueueOptionsBuilder};

/// Driver-specific acknowledgement metadata carried alongside a delivered
/// payload so [`Queue::ack`]/[`Queue::nack`] know how to settle it.
#[derive(Clone)]
pub enum MessageMeta {
    /// AMQP: settle via `channel.basic_ack`/`basic_nack` on this delivery tag.
    Amqp {
        /// The channel the delivery arrived on.
        channel: lapin::Channel,
        /// The delivery's tag, unique within the channel.
        delivery_tag: u64,
    },
    /// MQTT: ack/nack are no-ops, since reliability is QoS-1 retransmission
    /// handled by the broker, not application-level settlement.
    Mqtt,
}

/// A single payload delivered to a receiver [`Queue`].
#[derive(Clone)]
pub struct Message {
    /// The message body.
    pub payload: Bytes,
    /// Driver-specific settlement metadata.
    pub meta: MessageMeta,
}

/// Handler installed via [`Queue::set_msg_handler`]. Invoked once per
/// delivered message, in broker delivery order, with the next delivery held
/// back until this future resolves, so messages are never processed out of
/// order or concurrently. The handler is responsible for calling
/// [`Queue::ack`] or [`Queue::nack`] itself once it has finished processing.
pub type MsgHandlerFn =
    Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Options shared by both AMQP and MQTT queues, embedded in their
/// protocol-specific option structs.
#[derive(Clone, Debug)]
pub struct QueueOptions {
    /// `^[a-z0-9_-]+(\.[a-z0-9_-]+)*$`-validated queue/topic leaf name.
    pub name: String,
    /// `true` for a receiver, `false` for a sender.
    pub is_recv: bool,
    /// `true` for at-least-once delivery with publisher confirmation
    /// (AMQP) or QoS 1 (MQTT); `false` for best-effort.
    pub reliable: bool,
    /// `true` for fanout-to-all-receivers delivery; `false` for unicast
    /// (exactly one of possibly-several receivers gets each message).
    pub broadcast: bool,
    /// Delay between reconnect attempts, in milliseconds.
    pub reconnect_millis: u64,
}

/// A unified unicast/broadcast, reliable/best-effort message queue.
#[derive(Clone)]
pub enum Queue {
    /// AMQP 0-9-1 queue (plain queue or fanout exchange + queue).
    Amqp(Arc<AmqpQueue>),
    /// MQTT 3.1/5 topic.
    Mqtt(Arc<MqttQueue>),
}

impl Queue {
    /// Build an AMQP queue bound to an AMQP connection.
    pub fn new_amqp(connection: &crate::connection::Connection, options: AmqpQueueOptions) -> Result<Self> {
        let conn = connection.as_amqp()?;
        Ok(Self::Amqp(Arc::new(AmqpQueue::new(Arc::clone(conn), options))))
    }

    /// Build an MQTT queue bound to an MQTT connection.
    pub fn new_mqtt(connection: &crate::connection::Connection, options: MqttQueueOptions) -> Result<Self> {
        let conn = connection.as_mqtt()?;
        Ok(Self::Mqtt(Arc::new(MqttQueue::new(Arc::clone(conn), options))))
    }

    /// The queue's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Amqp(q) => q.name(),
            Self::Mqtt(q) => q.name(),
        }
    }

    /// `true` if this queue was constructed as a receiver.
    #[must_use]
    pub fn is_recv(&self) -> bool {
        match self {
            Self::Amqp(q) => q.is_recv(),
            Self::Mqtt(q) => q.is_recv(),
        }
    }

    /// Install the handler invoked for every delivered message. Must be
    /// called before [`Queue::connect`] for a receiver queue
    /// ([`GeneralMqErrorKind::NoMsgHandler`] otherwise).
    pub async fn set_msg_handler(&self, handler: MsgHandlerFn) -> Result<()> {
        match self {
            Self::Amqp(q) => q.set_msg_handler(handler).await,
            Self::Mqtt(q) => q.set_msg_handler(handler).await,
        }
    }

    /// Begin (or resume) connecting, declaring, and (for receivers)
    /// consuming.
    pub async fn connect(&self) -> Result<()> {
        match self {
            Self::Amqp(q) => q.connect().await,
            Self::Mqtt(q) => q.connect().await,
        }
    }

    /// Stop reconnecting and tear down.
    pub async fn close(&self) -> Result<()> {
        match self {
            Self::Amqp(q) => q.close().await,
            Self::Mqtt(q) => q.close().await,
        }
    }

    /// Publish `payload`. Errors with [`GeneralMqErrorKind::QueueIsReceiver`]
    /// if this queue was constructed as a receiver.
    pub async fn send_msg(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if self.is_recv() {
            return Err(GeneralMqError::new(GeneralMqErrorKind::QueueIsReceiver));
        }
        match self {
            Self::Amqp(q) => q.send_msg(payload).await,
            Self::Mqtt(q) => q.send_msg(payload).await,
        }
    }

    /// Acknowledge successful processing of a delivered message.
    pub async fn ack(&self, msg: &Message) -> Result<()> {
        match &msg.meta {
            MessageMeta::Amqp { channel, delivery_tag } => {
                channel
                    .basic_ack(*delivery_tag, lapin::options::BasicAckOptions::default())
                    .await?;
                Ok(())
            }
            MessageMeta::Mqtt => Ok(()),
        }
    }

    /// Reject a delivered message, requesting redelivery.
    pub async fn nack(&self, msg: &Message) -> Result<()> {
        match &msg.meta {
            MessageMeta::Amqp { channel, delivery_tag } => {
                channel
                    .basic_nack(
                        *delivery_tag,
                        lapin::options::BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }
            MessageMeta::Mqtt => Ok(()),
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Amqp(q) => q.status(),
            Self::Mqtt(q) => q.status(),
        }
    }

    /// Subscribe to this queue's status transitions.
    #[must_use]
    pub fn status_receiver(&self) -> StatusReceiver {
        match self {
            Self::Amqp(q) => q.status_receiver(),
            Self::Mqtt(q) => q.status_receiver(),
        }
    }
}
