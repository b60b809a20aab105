// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT 3.1/5 queue backend. Unicast receivers subscribe via a shared
//! subscription (`$share/<prefix>/<name>`) so that only one of several
//! competing receivers gets each message; broadcast receivers and all
//! senders use the plain topic name.

use crate::connection::mqtt::MqttConnection;
use crate::constants::{is_valid_name, DEFAULT_MQTT_SHARED_PREFIX, DEFAULT_RECONNECT_MILLIS};
use crate::error::{GeneralMqError, GeneralMqErrorKind, Result};
use crate::queue::{Message, MessageMeta, MsgHandlerFn};
use crate::status::{Status, StatusChannel, StatusReceiver};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Options for an MQTT-backed [`super::Queue`].
#[derive(Builder, Clone, Debug)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct MqttQueueOptions {
    /// Topic leaf name, matching `^[a-z0-9_-]+(\.[a-z0-9_-]+)*$`.
    pub name: String,
    /// `true` for a receiver, `false` for a sender.
    pub is_recv: bool,
    /// QoS 1 when `true`, QoS 0 otherwise.
    pub reliable: bool,
    /// Plain-topic fanout when `true`, shared-subscription unicast otherwise.
    pub broadcast: bool,
    /// Delay between reconnect attempts, in milliseconds.
    #[builder(default = "DEFAULT_RECONNECT_MILLIS")]
    pub reconnect_millis: u64,
    /// Shared-subscription group prefix for unicast receivers. Must be
    /// non-empty; ignored for senders and broadcast receivers.
    #[builder(default = "Some(DEFAULT_MQTT_SHARED_PREFIX.to_string())")]
    pub shared_prefix: Option<String>,
}

impl MqttQueueOptionsBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let name = self.name.as_ref().ok_or_else(|| "name is required".to_string())?;
        if !is_valid_name(name) {
            return Err(format!("invalid queue name: {name}"));
        }
        if let Some(Some(prefix)) = &self.shared_prefix {
            if prefix.is_empty() {
                return Err("shared_prefix must be non-empty when set".to_string());
            }
        }
        Ok(())
    }
}

/// An MQTT-backed receiver or sender queue.
pub struct MqttQueue {
    connection: Arc<MqttConnection>,
    options: MqttQueueOptions,
    status: StatusChannel,
    handler: Arc<Mutex<Option<MsgHandlerFn>>>,
    closing: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl MqttQueue {
    pub(crate) fn new(connection: Arc<MqttConnection>, options: MqttQueueOptions) -> Self {
        Self {
            connection,
            options,
            status: StatusChannel::new(Status::Closed),
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

    /// Topic used for subscribe/publish: `sharedPrefix ++ name` for unicast
    /// receivers, `name` for broadcast receivers and for every sender.
    fn topic(&self) -> String {
        if self.options.is_recv && !self.options.broadcast {
            format!(
                "{}{}",
                self.options.shared_prefix.as_deref().unwrap_or(""),
                self.options.name
            )
        } else {
            self.options.name.clone()
        }
    }

    fn qos(&self) -> QoS {
        if self.options.reliable {
            QoS::AtLeastOnce
        } else {
            QoS::AtMostOnce
        }
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
        if self.options.is_recv {
            let _ = self.connection.client().unsubscribe(self.topic()).await;
            self.connection.handlers().remove(&self.topic()).await;
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
        if self.connection.status() != Status::Connected {
            return Err(GeneralMqError::new(GeneralMqErrorKind::NotConnected));
        }
        self.connection
            .client()
            .publish(self.topic(), self.qos(), false, payload.to_vec())
            .await?;
        Ok(())
    }

    async fn try_connect_once(self: &Arc<Self>) -> Result<()> {
        if self.options.is_recv {
            let handler = Arc::clone(&self.handler);
            let handler_entry: crate::connection::mqtt::PacketHandler = Arc::new(move |publish| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let handler = handler.lock().await.clone();
                    if let Some(handler) = handler {
                        let msg = Message {
                            payload: Bytes::from(publish.payload),
                            meta: MessageMeta::Mqtt,
                        };
                        handler(msg).await;
                    }
                })
            });
            self.connection
                .handlers()
                .insert(self.topic(), handler_entry)
                .await;
            self.connection
                .client()
                .subscribe(self.topic(), self.qos())
                .await?;
        }
        Ok(())
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
                Ok(()) => {
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
                    log::warn!("mqtt queue {} setup failed: {e}", self.options.name);
                    tokio::time::sleep(Duration::from_millis(self.options.reconnect_millis)).await;
                }
            }
        }
        self.status.set(Status::Closed);
    }
}
