// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Construction-time validation that fails before a Manager ever touches a
//! Connection, so these do not require a reachable broker.

use general_mq::ConnectionPool;
use std::sync::Arc;
use sylvia_iot_sdk::application::{ApplicationMgr, ApplicationMgrHandlers, ApplicationMgrOptions};
use sylvia_iot_sdk::network::{NetworkMgr, NetworkMgrHandlers, NetworkMgrOptions};

fn application_handlers() -> ApplicationMgrHandlers {
    ApplicationMgrHandlers {
        on_ul_data: Arc::new(|_| Box::pin(async { Ok(()) })),
        on_dl_data_resp: Arc::new(|_| Box::pin(async { Ok(()) })),
        on_dl_data_result: Arc::new(|_| Box::pin(async { Ok(()) })),
    }
}

fn network_handlers() -> NetworkMgrHandlers {
    NetworkMgrHandlers {
        on_dl_data: Arc::new(|_| Box::pin(async { Ok(()) })),
        on_ctrl: Arc::new(|_| Box::pin(async { Ok(()) })),
    }
}

#[tokio::test]
async fn application_manager_requires_non_empty_unit_id() {
    let pool = Arc::new(ConnectionPool::new());
    let options = ApplicationMgrOptions {
        unit_id: String::new(),
        unit_code: String::new(),
        id: "app1".to_string(),
        name: "broker".to_string(),
        ..Default::default()
    };
    let result = ApplicationMgr::new(
        pool,
        "amqp://localhost:5672",
        "coremgr",
        options,
        application_handlers(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn application_manager_rejects_mismatched_unit_emptiness() {
    let pool = Arc::new(ConnectionPool::new());
    let options = ApplicationMgrOptions {
        unit_id: "unit1".to_string(),
        unit_code: String::new(),
        id: "app1".to_string(),
        name: "broker".to_string(),
        ..Default::default()
    };
    let result = ApplicationMgr::new(
        pool,
        "amqp://localhost:5672",
        "coremgr",
        options,
        application_handlers(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn application_manager_rejects_zero_prefetch() {
    let pool = Arc::new(ConnectionPool::new());
    let options = ApplicationMgrOptions {
        unit_id: "unit1".to_string(),
        unit_code: "unit1".to_string(),
        id: "app1".to_string(),
        name: "broker".to_string(),
        prefetch: Some(0),
        ..Default::default()
    };
    let result = ApplicationMgr::new(
        pool,
        "amqp://localhost:5672",
        "coremgr",
        options,
        application_handlers(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn network_manager_allows_public_network() {
    let pool = Arc::new(ConnectionPool::new());
    let options = NetworkMgrOptions {
        unit_id: String::new(),
        unit_code: String::new(),
        id: "net1".to_string(),
        name: "lora".to_string(),
        ..Default::default()
    };
    let result = NetworkMgr::new(
        pool,
        "amqp://localhost:5672",
        "coremgr",
        options,
        network_handlers(),
    )
    .await;
    assert!(result.is_ok());
    if let Ok(mgr) = result {
        let _ = mgr.close().await;
    }
}
