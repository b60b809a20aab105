// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Application manager: owns `uldata` (recv), `dldata` (send),
//! `dldata-resp` (recv), and `dldata-result` (recv) on one shared
//! Connection, and presents a typed IoT message surface over them.

use crate::manager::{
    spawn_readiness_aggregator, validate_units, ManagerStatus, ManagerStatusReceiver,
    ReadinessAggregatorHandle,
};
use crate::models::{AppDlData, AppDlDataResp, AppDlDataResult, AppUlData};
use crate::queue_factory::{self, QueueFactoryOptions, QueueRole};
use general_mq::{ConnectionPool, GeneralMqError, Message, Queue, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Construction options for an [`ApplicationMgr`].
#[derive(Debug, Clone, Default)]
pub struct ApplicationMgrOptions {
    /// Tenant-like isolation identifier. Must be non-empty for an
    /// Application manager.
    pub unit_id: String,
    /// Queue-name-safe form of `unit_id`. Empty iff `unit_id` names the
    /// public unit (never true here, since `unit_id` must be non-empty).
    pub unit_code: String,
    /// Opaque application identifier.
    pub id: String,
    /// Queue-name-safe application name.
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

pub(crate) type ResultFuture = Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>;

/// Invoked for each decoded [`AppUlData`] delivered on `uldata`.
pub type OnUlData = Arc<dyn Fn(AppUlData) -> ResultFuture + Send + Sync>;
/// Invoked for each decoded [`AppDlDataResp`] delivered on `dldata-resp`.
pub type OnDlDataResp = Arc<dyn Fn(AppDlDataResp) -> ResultFuture + Send + Sync>;
/// Invoked for each decoded [`AppDlDataResult`] delivered on `dldata-result`.
pub type OnDlDataResult = Arc<dyn Fn(AppDlDataResult) -> ResultFuture + Send + Sync>;

/// The three typed callbacks an [`ApplicationMgr`] routes incoming messages
/// to, one per receiver queue it owns.
#[derive(Clone)]
pub struct ApplicationMgrHandlers {
    /// Handler for `uldata`.
    pub on_ul_data: OnUlData,
    /// Handler for `dldata-resp`.
    pub on_dl_data_resp: OnDlDataResp,
    /// Handler for `dldata-result`.
    pub on_dl_data_result: OnDlDataResult,
}

pub(crate) fn install_json_handler<T>(
    queue: Queue,
    handler: Arc<dyn Fn(T) -> ResultFuture + Send + Sync>,
) -> general_mq::MsgHandlerFn
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    Arc::new(move |msg: Message| {
        let queue = queue.clone();
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let decoded = match serde_json::from_slice::<T>(&msg.payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::warn!("malformed payload on {}: {e}", queue.name());
                    let _ = queue.ack(&msg).await;
                    return;
                }
            };
            match handler(decoded).await {
                Ok(()) => {
                    let _ = queue.ack(&msg).await;
                }
                Err(e) => {
                    log::warn!("handler for {} reported an error: {e}", queue.name());
                    let _ = queue.nack(&msg).await;
                }
            }
        })
    })
}

/// Composes the data-queue factory output with typed IoT message schemas
/// for the Application side of the protocol.
pub struct ApplicationMgr {
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

impl ApplicationMgr {
    /// Obtain a Connection from `pool`, declare the four queues, install
    /// `handlers`, and start connecting.
    pub async fn new(
        pool: Arc<ConnectionPool>,
        host_uri: impl Into<String>,
        prefix: &str,
        options: ApplicationMgrOptions,
        handlers: ApplicationMgrHandlers,
    ) -> Result<Self> {
        validate_units(&options.unit_id, &options.unit_code)
            .map_err(GeneralMqError::invalid_argument)?;
        if options.unit_id.is_empty() {
            return Err(GeneralMqError::invalid_argument(
                "unitId must be non-empty for an Application manager",
            ));
        }
        if options.id.is_empty() || options.name.is_empty() {
            return Err(GeneralMqError::invalid_argument("id and name must be non-empty"));
        }
        if options.prefetch == Some(0) {
            return Err(GeneralMqError::invalid_argument("prefetch must not be 0"));
        }
        let host_uri = host_uri.into();
        let connection = pool
            .get_connection(&host_uri, queue_factory::queue_count(false))
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
            false,
        )?;

        let ul_data = queues[&QueueRole::UlData].clone();
        ul_data
            .set_msg_handler(install_json_handler(ul_data.clone(), handlers.on_ul_data))
            .await?;
        let dl_data_resp = queues[&QueueRole::DlDataResp].clone();
        dl_data_resp
            .set_msg_handler(install_json_handler(
                dl_data_resp.clone(),
                handlers.on_dl_data_resp,
            ))
            .await?;
        let dl_data_result = queues[&QueueRole::DlDataResult].clone();
        dl_data_result
            .set_msg_handler(install_json_handler(
                dl_data_result.clone(),
                handlers.on_dl_data_result,
            ))
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

    /// Opaque application identifier this manager was constructed with.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Application name this manager was constructed with.
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

    /// Validate and publish a downlink request on `dldata`.
    pub async fn send_dl_data(&self, data: &AppDlData) -> Result<()> {
        let payload = serde_json::to_vec(data)
            .map_err(|e| GeneralMqError::invalid_argument(e.to_string()))?;
        self.queues[&QueueRole::DlData].send_msg(payload).await
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
