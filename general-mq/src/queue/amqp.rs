// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! AMQP 0-9-1 queue backend: a durable named queue for unicast, or a fanout
//! exchange plus an exclusive anonymous queue per receiver for broadcast.

use crate::connection::amqp::AmqpConnection;
use crate::constants::{is_valid_name, DEFAULT_PERSISTENT, DEFAULT_PREFETCH, DEFAULT_RECONNECT_MILLIS};
use crate::error::{GeneralMqError, GeneralMqErrorKind, Result};
use crate::queue::{Message, MessageMeta, MsgHandlerFn};
use crate::status::{Status, StatusChannel, StatusReceiver};
use bytes::Bytes;
use lapin::message::DeliveryResult;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Options for an AMQP-backed [`super::Queue`].
#[derive(Builder, Clone, Debug)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct AmqpQueueOptions {
    /// Queue/exchange leaf name, matching `^[a-z0-9_-]+(\.[a-z0-9_-]+)*$`.
    pub name: String,
    /// `true` for a receiver, `false` for a sender.
    pub is_recv: bool,
    /// At-least-once (publisher-confirmed) delivery when `true`.
    pub reliable: bool,
    /// Fanout-to-all-receivers when `true`, unicast otherwise.
    pub broadcast: bool,
    /// Delay between reconnect attempts, in milliseconds.
    #[builder(default = "DEFAULT_RECONNECT_MILLIS")]
    pub reconnect_millis: u64,
    /// Receiver prefetch count. Must be in `1..=65535` when `is_recv` is
    /// `true`; unused for a sender.
    #[builder(default = "DEFAULT_PREFETCH")]
    pub prefetch: u16,
    /// Whether sent messages are marked persistent (delivery mode 2).
    #[builder(default = "DEFAULT_PERSISTENT")]
    pub persistent: bool,
}

impl AmqpQueueOptionsBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let name = self.name.as_ref().ok_or_else(|| "name is required".to_string())?;
        if !is_valid_name(name) {
            return Err(format!("invalid queue name: {name}"));
        }
        if self.is_recv.unwrap_or(false) && self.prefetch == Some(0) {
            return Err("prefetch must be in 1..=65535 for a receiver queue".to_string());
        }
        Ok(())
    }
}

struct AmqpDelegate {
    handler: Arc<Mutex<Option<MsgHandlerFn>>>,
    channel: Channel,
}

impl lapin::message::ConsumerDelegate for AmqpDelegate {
    fn on_new_delivery(&self, delivery: DeliveryResult) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let handler = Arc::clone(&self.handler);
        let channel = self.channel.clone();
        Box::pin(async move {
            match delivery {
                Ok(Some(delivery)) => {
                    let handler = handler.lock().await.clone();
                    if let Some(handler) = handler {
                        let msg = Message {
                            payload: Bytes::from(delivery.data),
                            meta: MessageMeta::Amqp {
                                channel,
                                delivery_tag: delivery.delivery_tag,
                            },
                        };
                        handler(msg).await;
                    }
                }
                Ok(None) => {}
                Err(e) => log::error!("amqp consumer error: {e}"),
            }
        })
    }
}

/// An AMQP-backed receiver or sender queue.
pub struct AmqpQueue {
    connection: Arc<AmqpConnection>,
    options: AmqpQueueOptions,
    status: StatusChannel,
    channel: Mutex<Option<Channel>>,
    broadcast_queue_name: Mutex<Option<String>>,
    handler: Arc<Mutex<Option<MsgHandlerFn>>>,
    closing: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpQueue {
    pub(crate) fn new(connection: Arc<AmqpConnection>, options: AmqpQueueOptions) -> Self {
        Self {
            connection,
            options,
            status: StatusChannel::new(Status::Closed),
            channel: Mutex::new(None),
            broadcast_queue_name: Mutex::new(None),
            handler: Arc::new(Mutex::new(None)),
            closing: AtomicBool::new(false),
            join: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    #[must_use]
    pub fn is_recv(&self) -> bool {
        self.options.is_recv
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status.get()
    }

    #[must_use]
    pub fn status_receiver(&self) -> StatusReceiver {
        self.status.receiver()
    }

    fn closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) async fn set_msg_handler(&self, handler: MsgHandlerFn) -> Result<()> {
        *self.handler.lock().await = Some(handler);
        Ok(())
    }

    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.options.is_recv && self.handler.lock().await.is_none() {
            return Err(GeneralMqError::new(GeneralMqErrorKind::NoMsgHandler));
        }
        let mut join = self.join.lock().await;
        if join.is_some() {
            return Ok(());
        }
        self.closing.store(false, Ordering::Release);
        let this = Arc::clone(self);
        *join = Some(tokio::spawn(async move { this.run().await }));
        Ok(())
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        self.closing.store(true, Ordering::Release);
        self.status.set(Status::Closing);
        if let Some(channel) = self.channel.lock().await.take() {
            let _ = channel.close(200, "closed").await;
        }
        let handle = self.join.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.status.set(Status::Closed);
        Ok(())
    }

    pub(crate) async fn send_msg(&self, payload: Bytes) -> Result<()> {
        let guard = self.channel.lock().await;
        let channel = guard
            .as_ref()
            .ok_or_else(|| GeneralMqError::new(GeneralMqErrorKind::NotConnected))?;
        let (exchange, routing_key) = if self.options.broadcast {
            (self.options.name.as_str(), "")
        } else {
            ("", self.options.name.as_str())
        };
        let props = BasicProperties::default()
            .with_delivery_mode(if self.options.persistent { 2 } else { 1 });
        if self.options.reliable {
            let confirm = channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions {
                        mandatory: true,
                        ..Default::default()
                    },
                    &payload,
                    props,
                )
                .await?
                .await?;
            if let Confirmation::Nack(_) = confirm {
                return Err(GeneralMqError::new(GeneralMqErrorKind::Transport(
                    crate::error::TransportError::Other("broker nacked publish".to_string()),
                )));
            }
        } else {
            channel
                .basic_publish(exchange, routing_key, BasicPublishOptions::default(), &payload, props)
                .await?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn try_connect_once(&self) -> Result<Channel> {
        let channel = self.connection.create_channel().await?;
        if self.options.reliable {
            channel.confirm_select(ConfirmSelectOptions::default()).await?;
        }
        if self.options.broadcast {
            channel
                .exchange_declare(
                    &self.options.name,
                    ExchangeKind::Fanout,
                    ExchangeDeclareOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            if self.options.is_recv {
                let declared = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                let queue_name = declared.name().to_string();
                channel
                    .queue_bind(
                        &queue_name,
                        &self.options.name,
                        "",
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
                *self.broadcast_queue_name.lock().await = Some(queue_name);
            }
        } else {
            channel
                .queue_declare(
                    &self.options.name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        if self.options.is_recv {
            channel
                .basic_qos(self.options.prefetch, BasicQosOptions::default())
                .await?;
            let target = if self.options.broadcast {
                self.broadcast_queue_name
                    .lock()
                    .await
                    .clone()
                    .expect("broadcast queue declared above")
            } else {
                self.options.name.clone()
            };
            let consumer = channel
                .basic_consume(
                    &target,
                    &format!("{}-consumer", self.options.name),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            consumer.set_delegate(AmqpDelegate {
                handler: Arc::clone(&self.handler),
                channel: channel.clone(),
            });
        }
        Ok(channel)
    }

    async fn run(self: Arc<Self>) {
        let mut conn_status = self.connection.status_receiver();
        loop {
            if self.closing() {
                break;
            }
            if conn_status.get() != Status::Connected {
                self.status.set(Status::Connecting);
                conn_status.wait_for(Status::Connected).await;
                if self.closing() {
                    break;
                }
            }
            self.status.set(Status::Connecting);
            match self.try_connect_once().await {
                Ok(channel) => {
                    *self.channel.lock().await = Some(channel);
                    self.status.set(Status::Connected);
                    loop {
                        let st = conn_status.changed().await;
                        if self.closing() {
                            break;
                        }
                        if st != Status::Connected {
                            self.status.set(Status::Disconnected);
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("amqp queue {} setup failed: {e}", self.options.name);
                    tokio::time::sleep(Duration::from_millis(self.options.reconnect_millis)).await;
                }
            }
        }
        self.status.set(Status::Closed);
    }
}
