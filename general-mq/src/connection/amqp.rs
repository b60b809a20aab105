// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! AMQP 0-9-1 connection backend, built on `lapin`.

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_RECONNECT_MILLIS};
use crate::error::{GeneralMqError, GeneralMqErrorKind, Result};
use crate::status::{Status, StatusChannel, StatusReceiver};
use lapin::{uri::AMQPUri, Connection as LapinConnection, ConnectionProperties};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Options for an AMQP 0-9-1 [`Connection`](super::Connection).
#[derive(Builder, Clone, Debug)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct AmqpConnectionOptions {
    /// `amqp(s)://user:pass@host:port/vhost`.
    pub host_uri: String,
    /// Dial timeout, in milliseconds.
    #[builder(default = "DEFAULT_CONNECT_TIMEOUT_MILLIS")]
    pub connect_timeout_millis: u64,
    /// Delay between reconnect attempts, in milliseconds.
    #[builder(default = "DEFAULT_RECONNECT_MILLIS")]
    pub reconnect_millis: u64,
    /// Skip server certificate verification for `amqps://`. Has no effect on
    /// a plain `amqp://` connection.
    #[builder(default = "false")]
    pub insecure: bool,
}

impl AmqpConnectionOptionsBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let uri = self
            .host_uri
            .as_ref()
            .ok_or_else(|| "host_uri is required".to_string())?;
        let parsed = fluent_uri::Uri::parse(uri).map_err(|e| format!("invalid host uri: {e}"))?;
        match parsed.scheme().as_str() {
            "amqp" => Ok(()),
            "amqps" => {
                if self.insecure == Some(true) {
                    return Err(
                        "insecure amqps:// connections are not supported: lapin's TLS transport does not expose a certificate-verification override".to_string(),
                    );
                }
                Ok(())
            }
            other => Err(format!("host uri scheme must be amqp or amqps, got {other}")),
        }
    }
}

/// An AMQP 0-9-1 transport to a single broker.
pub struct AmqpConnection {
    options: AmqpConnectionOptions,
    status: StatusChannel,
    conn: Mutex<Option<LapinConnection>>,
    disconnect_notify: Notify,
    closing: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpConnection {
    /// Construct a new, not-yet-connected AMQP connection.
    #[must_use]
    pub fn new(options: AmqpConnectionOptions) -> Self {
        Self {
            options,
            status: StatusChannel::new(Status::Closed),
            conn: Mutex::new(None),
            disconnect_notify: Notify::new(),
            closing: AtomicBool::new(false),
            join: Mutex::new(None),
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Subscribe to this connection's status transitions.
    #[must_use]
    pub fn status_receiver(&self) -> StatusReceiver {
        self.status.receiver()
    }

    fn closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Open a fresh channel on the underlying connection. Used by
    /// [`crate::queue::amqp::AmqpQueue`] to declare exchanges/queues and
    /// publish/consume.
    pub(crate) async fn create_channel(&self) -> Result<lapin::Channel> {
        let guard = self.conn.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| GeneralMqError::new(GeneralMqErrorKind::NotConnected))?;
        Ok(conn.create_channel().await?)
    }

    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
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
        self.disconnect_notify.notify_waiters();
        if let Some(conn) = self.conn.lock().await.take() {
            let _ = conn.close(200, "closed").await;
        }
        let handle = self.join.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.status.set(Status::Closed);
        Ok(())
    }

    async fn dial(self: &Arc<Self>) -> Result<LapinConnection> {
        let uri = AMQPUri::from_str(&self.options.host_uri)
            .map_err(|e| GeneralMqError::invalid_argument(format!("invalid amqp uri: {e}")))?;
        let props = ConnectionProperties::default();
        let connect = LapinConnection::connect_uri(uri, props);
        match tokio::time::timeout(
            Duration::from_millis(self.options.connect_timeout_millis),
            connect,
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(GeneralMqError::new(GeneralMqErrorKind::Transport(
                crate::error::TransportError::Other("connect timed out".to_string()),
            ))),
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.closing() {
                break;
            }
            self.status.set(Status::Connecting);
            match self.dial().await {
                Ok(conn) => {
                    let on_error = Arc::clone(&self);
                    conn.on_error(move |err| {
                        log::warn!("amqp connection error: {err}");
                        on_error.status.set(Status::Disconnected);
                        on_error.disconnect_notify.notify_waiters();
                    });
                    *self.conn.lock().await = Some(conn);
                    self.status.set(Status::Connected);
                    self.disconnect_notify.notified().await;
                    if self.closing() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("amqp dial failed: {e}");
                    self.status.set(Status::Disconnected);
                    tokio::time::sleep(Duration::from_millis(self.options.reconnect_millis)).await;
                }
            }
        }
        self.status.set(Status::Closed);
    }
}
