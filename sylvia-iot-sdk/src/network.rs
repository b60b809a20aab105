// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Network manager: owns `uldata` (send), `dldata` (recv),
//! `dldata-result` (send), and `ctrl` (recv) on one shared Connection, and
//! presents a typed IoT message surface over them.

use crate::application::{install_json_handler, ResultFuture};
use crate::manager::{
    spawn_readiness_aggregator, validate_units, ManagerStatus, ManagerStatusReceiver,
    ReadinessAggregatorHandle,
};
use crate::models::{NetCtrlMsg, NetDlData, NetDlDataResult, NetUlData};
use crate::queue_factory::{self, QueueFactoryOptions, QueueRole};
use general_mq::{ConnectionPool, GeneralMqError, Queue, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Construction options for a [`NetworkMgr`].
#[derive(Debug, Clone, Default)]
pub struct NetworkMgrOptions {
    /// Tenant-like isolation identifier. May be empty together with
    /// `unit_code` to denote a public network.
    pub unit_id: String,
    /// Queue-name-safe form of `unit_id`.
    pub unit_code: String,
    /// Opaque network identifier.
    pub id: String,
    /// Queue-name-safe network name.
    pub name: String,
    /// Forwarded to every owned queue's AMQP options.
    pub prefetch: Option<u16>,
    /// Forwarded to every owned queue's AMQP options.
    pub persistent: Option<bool>,
    /// Forwarded to every owned queue's MQTT options.
    pub shared_prefix: Option<String>,
    /// Forwarded to every owned queue's reconnect interval.
    pub reconnect_millis: Option<u64>,
}

/// Invoked for each decoded [`NetDlData`] delivered on `dldata`.
pub type OnDlData = Arc<dyn Fn(NetDlData) -> ResultFuture + Send + Sync>;
/// Invoked for each decoded [`NetCtrlMsg`] delivered on `ctrl`.
pub type OnCtrl = Arc<dyn Fn(NetCtrlMsg) -> ResultFuture + Send + Sync>;

/// The two typed callbacks a [`NetworkMgr`] routes incoming messages to, one
/// per receiver queue it owns.
#[derive(Clone)]
pub struct NetworkMgrHandlers {
    /// Handler for `dldata`.
    pub on_dl_data: OnDlData,
    /// Handler for `ctrl`.
    pub on_ctrl: OnCtrl,
}

/// Composes the data-queue factory output with typed IoT message schemas
/// for the Network side of the protocol.
pub struct NetworkMgr {
    id: String,
    name: String,
    unit_id: String,
    unit_code: String,
    host_uri: String,
    pool: Arc<ConnectionPool>,
    queues: HashMap<QueueRole, Queue>,
    status: Arc<crate::manager::ManagerStatusChannel>,
    aggregator: ReadinessAggregatorHandle,
}

impl NetworkMgr {
    /// Obtain a Connection from `pool`, declare the four queues, install
    /// `handlers`, and start connecting.
    pub async fn new(
        pool: Arc<ConnectionPool>,
        host_uri: impl Into<String>,
        prefix: &str,
        options: NetworkMgrOptions,
        handlers: NetworkMgrHandlers,
    ) -> Result<Self> {
        validate_units(&options.unit_id, &options.unit_code)
            .map_err(GeneralMqError::invalid_argument)?;
        if options.id.is_empty() || options.name.is_empty() {
            return Err(GeneralMqError::invalid_argument("id and name must be non-empty"));
        }
        if options.prefetch == Some(0) {
            return Err(GeneralMqError::invalid_argument("prefetch must not be 0"));
        }
        let host_uri = host_uri.into();
        let connection = pool
            .get_connection(&host_uri, queue_factory::queue_count(true))
            .await?;
        let factory_options = QueueFactoryOptions {
            prefetch: options.prefetch,
            persistent: options.persistent,
            shared_prefix: options.shared_prefix.clone(),
            reconnect_millis: options.reconnect_millis,
        };
        let queues = queue_factory::build_queues(
            &connection,
            prefix,
            &options.unit_code,
            &options.name,
            &factory_options,
            true,
        )?;

        let dl_data = queues[&QueueRole::DlData].clone();
        dl_data
            .set_msg_handler(install_json_handler(dl_data.clone(), handlers.on_dl_data))
            .await?;
        let ctrl = queues[&QueueRole::Ctrl].clone();
        ctrl.set_msg_handler(install_json_handler(ctrl.clone(), handlers.on_ctrl))
            .await?;

        connection.connect().await?;
        for queue in queues.values() {
            queue.connect().await?;
        }

        let status = Arc::new(crate::manager::ManagerStatusChannel::new(ManagerStatus::NotReady));
        let aggregator =
            spawn_readiness_aggregator(queues.values().cloned().collect(), Arc::clone(&status));

        Ok(Self {
            id: options.id,
            name: options.name,
            unit_id: options.unit_id,
            unit_code: options.unit_code,
            host_uri,
            pool,
            queues,
            status,
            aggregator,
        })
    }

    /// Opaque network identifier this manager was constructed with.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Network name this manager was constructed with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tenant-like isolation identifier.
    #[must_use]
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Queue-name-safe form of `unit_id`.
    #[must_use]
    pub fn unit_code(&self) -> &str {
        &self.unit_code
    }

    /// Current readiness: `Ready` iff every owned queue is `Connected`.
    #[must_use]
    pub fn status(&self) -> ManagerStatus {
        self.status.get()
    }

    /// Subscribe to this manager's readiness transitions.
    #[must_use]
    pub fn status_receiver(&self) -> ManagerStatusReceiver {
        self.status.receiver()
    }

    /// Publish uplink data on `uldata`.
    pub async fn send_ul_data(&self, data: &NetUlData) -> Result<()> {
        let payload = serde_json::to_vec(data)
            .map_err(|e| GeneralMqError::invalid_argument(e.to_string()))?;
        self.queues[&QueueRole::UlData].send_msg(payload).await
    }

    /// Publish a downlink delivery outcome on `dldata-result`.
    pub async fn send_dl_data_result(&self, data: &NetDlDataResult) -> Result<()> {
        let payload = serde_json::to_vec(data)
            .map_err(|e| GeneralMqError::invalid_argument(e.to_string()))?;
        self.queues[&QueueRole::DlDataResult].send_msg(payload).await
    }

    /// Close every owned queue, then release this manager's connection
    /// reference.
    pub async fn close(&self) -> Result<()> {
        self.aggregator.abort();
        let mut first_err = None;
        for queue in self.queues.values() {
            if let Err(e) = queue.close().await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        self.pool
            .remove_connection(&self.host_uri, self.queues.len() as u32)
            .await?;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
