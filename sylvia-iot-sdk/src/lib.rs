// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Application/Network manager layer and IoT payload schemas on top of
//! `general-mq`: typed uplink/downlink/control messages, a readiness
//! aggregator, and the fixed data-queue naming scheme that ties a manager's
//! queues to one Sylvia-IoT unit/application/network.

#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod application;
pub mod manager;
pub mod models;
pub mod network;
pub mod queue_factory;
mod codec;

pub use application::{ApplicationMgr, ApplicationMgrHandlers, ApplicationMgrOptions};
pub use manager::{ManagerStatus, ManagerStatusReceiver};
pub use network::{NetworkMgr, NetworkMgrHandlers, NetworkMgrOptions};

#[macro_use]
extern crate derive_builder;
