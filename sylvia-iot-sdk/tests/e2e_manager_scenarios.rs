// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end manager scenarios against a real broker, gated behind
//! `ENABLE_NETWORK_TESTS` (see `general-mq`'s `e2e_broker_scenarios` for the
//! lower-layer counterpart of this gating convention).

use chrono::Utc;
use general_mq::ConnectionPool;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sylvia_iot_sdk::application::{ApplicationMgr, ApplicationMgrHandlers, ApplicationMgrOptions};
use sylvia_iot_sdk::models::{AppUlData, NetUlData};
use sylvia_iot_sdk::network::{NetworkMgr, NetworkMgrHandlers, NetworkMgrOptions};
use tokio::sync::Notify;

fn network_tests_enabled() -> bool {
    if env::var("ENABLE_NETWORK_TESTS").is_err() {
        log::warn!("This test is skipped. Set ENABLE_NETWORK_TESTS to run.");
        return false;
    }
    true
}

fn host_uri() -> String {
    env::var("AMQP_HOST_URI").unwrap_or_else(|_| "amqp://localhost:5672".to_string())
}

fn noop_handlers() -> ApplicationMgrHandlers {
    ApplicationMgrHandlers {
        on_ul_data: Arc::new(|_| Box::pin(async { Ok(()) })),
        on_dl_data_resp: Arc::new(|_| Box::pin(async { Ok(()) })),
        on_dl_data_result: Arc::new(|_| Box::pin(async { Ok(()) })),
    }
}

fn noop_network_handlers() -> NetworkMgrHandlers {
    NetworkMgrHandlers {
        on_dl_data: Arc::new(|_| Box::pin(async { Ok(()) })),
        on_ctrl: Arc::new(|_| Box::pin(async { Ok(()) })),
    }
}

/// A `NetworkMgr.send_ul_data` payload, received by an `ApplicationMgr`
/// sharing the same `unit_code`/`name`, round-trips `data`/`time`/
/// `network_addr`/`extension` unchanged (millisecond resolution after the
/// ISO-8601 round-trip).
#[tokio::test]
async fn network_uplink_round_trips_to_application() {
    if !network_tests_enabled() {
        return;
    }
    let pool = Arc::new(ConnectionPool::new());
    let received: Arc<Mutex<Option<AppUlData>>> = Arc::new(Mutex::new(None));
    let notify = Arc::new(Notify::new());

    let received_clone = Arc::clone(&received);
    let notify_clone = Arc::clone(&notify);
    let mut handlers = noop_handlers();
    handlers.on_ul_data = Arc::new(move |data: AppUlData| {
        let received = Arc::clone(&received_clone);
        let notify = Arc::clone(&notify_clone);
        Box::pin(async move {
            *received.lock().unwrap() = Some(data);
            notify.notify_one();
            Ok(())
        })
    });

    let app = ApplicationMgr::new(
        Arc::clone(&pool),
        host_uri(),
        "broker",
        ApplicationMgrOptions {
            unit_id: "unit1".to_string(),
            unit_code: "unit1".to_string(),
            id: "app1".to_string(),
            name: "net1".to_string(),
            ..Default::default()
        },
        handlers,
    )
    .await
    .expect("application manager construction");

    let net = NetworkMgr::new(
        Arc::clone(&pool),
        host_uri(),
        "broker",
        NetworkMgrOptions {
            unit_id: "unit1".to_string(),
            unit_code: "unit1".to_string(),
            id: "net1".to_string(),
            name: "net1".to_string(),
            ..Default::default()
        },
        noop_network_handlers(),
    )
    .await
    .expect("network manager construction");

    let time = Utc::now();
    let ul_data = NetUlData {
        time,
        network_addr: "addr1".to_string(),
        data: vec![0xde, 0xad, 0xbe, 0xef],
        extension: Some(serde_json::json!({"key": "value"})),
    };
    net.send_ul_data(&ul_data).await.expect("publish succeeds");

    let _ = tokio::time::timeout(Duration::from_millis(1500), notify.notified()).await;
    let got = received
        .lock()
        .unwrap()
        .clone()
        .expect("application manager received the uplink");
    assert_eq!(got.network_addr, ul_data.network_addr);
    assert_eq!(got.data, ul_data.data);
    assert_eq!(got.extension, ul_data.extension);
    assert_eq!(got.time.timestamp_millis(), time.timestamp_millis());

    app.close().await.unwrap();
    net.close().await.unwrap();
}

/// N managers on the same host URI share exactly one underlying Connection,
/// released back to zero once all close.
#[tokio::test]
async fn pool_shares_one_connection_across_managers() {
    if !network_tests_enabled() {
        return;
    }
    let pool = Arc::new(ConnectionPool::new());
    let uri = host_uri();

    let app1 = ApplicationMgr::new(
        Arc::clone(&pool),
        uri.clone(),
        "broker",
        ApplicationMgrOptions {
            unit_id: "unit1".to_string(),
            unit_code: "unit1".to_string(),
            id: "app1".to_string(),
            name: "app1".to_string(),
            ..Default::default()
        },
        noop_handlers(),
    )
    .await
    .unwrap();
    assert_eq!(pool.ref_count(&uri).await, 4);

    let app2 = ApplicationMgr::new(
        Arc::clone(&pool),
        uri.clone(),
        "broker",
        ApplicationMgrOptions {
            unit_id: "unit2".to_string(),
            unit_code: "unit2".to_string(),
            id: "app2".to_string(),
            name: "app2".to_string(),
            ..Default::default()
        },
        noop_handlers(),
    )
    .await
    .unwrap();
    assert_eq!(pool.ref_count(&uri).await, 8);

    app1.close().await.unwrap();
    assert_eq!(pool.ref_count(&uri).await, 4);
    app2.close().await.unwrap();
    assert_eq!(pool.ref_count(&uri).await, 0);
}
