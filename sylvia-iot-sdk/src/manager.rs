// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Readiness aggregation shared by [`crate::application::ApplicationMgr`] and
//! [`crate::network::NetworkMgr`]: a manager is `Ready` iff every queue it
//! owns reports `Connected`.

use general_mq::{Queue, Status};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Aggregated readiness of a Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerStatus {
    /// At least one owned queue is not `Connected`.
    NotReady,
    /// Every owned queue is `Connected`.
    Ready,
}

/// A single-slot broadcast of a Manager's [`ManagerStatus`], mirroring
/// [`general_mq::StatusChannel`] at the manager layer.
pub struct ManagerStatusChannel {
    tx: watch::Sender<ManagerStatus>,
}

impl ManagerStatusChannel {
    #[must_use]
    pub(crate) fn new(initial: ManagerStatus) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    /// Current readiness.
    #[must_use]
    pub fn get(&self) -> ManagerStatus {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, status: ManagerStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Obtain a new receiver for this manager's readiness transitions.
    #[must_use]
    pub fn receiver(&self) -> ManagerStatusReceiver {
        ManagerStatusReceiver(self.tx.subscribe())
    }
}

/// A handle that observes a Manager's readiness transitions.
#[derive(Clone)]
pub struct ManagerStatusReceiver(watch::Receiver<ManagerStatus>);

impl ManagerStatusReceiver {
    /// Current readiness, without waiting.
    #[must_use]
    pub fn get(&self) -> ManagerStatus {
        *self.0.borrow()
    }

    /// Wait for the next readiness transition and return it.
    pub async fn changed(&mut self) -> ManagerStatus {
        if self.0.changed().await.is_err() {
            return *self.0.borrow();
        }
        *self.0.borrow()
    }
}

/// Handles backing a running [`spawn_readiness_aggregator`] task set. Aborts
/// every task on drop or explicit [`ReadinessAggregatorHandle::abort`].
pub(crate) struct ReadinessAggregatorHandle {
    aggregator: JoinHandle<()>,
    watchers: Vec<JoinHandle<()>>,
}

impl ReadinessAggregatorHandle {
    pub(crate) fn abort(&self) {
        self.aggregator.abort();
        for w in &self.watchers {
            w.abort();
        }
    }
}

/// Spawn the background tasks that keep `status` equal to the conjunction of
/// `queues`' statuses, recomputing only on real transitions.
pub(crate) fn spawn_readiness_aggregator(
    queues: Vec<Queue>,
    status: Arc<ManagerStatusChannel>,
) -> ReadinessAggregatorHandle {
    let notify = Arc::new(Notify::new());
    let mut watchers = Vec::with_capacity(queues.len());
    for queue in &queues {
        let mut rx = queue.status_receiver();
        let notify = Arc::clone(&notify);
        watchers.push(tokio::spawn(async move {
            loop {
                rx.changed().await;
                notify.notify_one();
            }
        }));
    }
    let aggregator = tokio::spawn(async move {
        loop {
            let ready = queues.iter().all(|q| q.status() == Status::Connected);
            status.set(if ready {
                ManagerStatus::Ready
            } else {
                ManagerStatus::NotReady
            });
            notify.notified().await;
        }
    });
    ReadinessAggregatorHandle { aggregator, watchers }
}

pub(crate) fn validate_units(unit_id: &str, unit_code: &str) -> std::result::Result<(), String> {
    if unit_id.is_empty() != unit_code.is_empty() {
        return Err("unitId and unitCode must both be empty or both be non-empty".to_string());
    }
    Ok(())
}
