//! Hardware integration tests for navassist-core
//!
//! These tests require a powered navassist peripheral in range and should be
//! run with:
//! ```
//! cargo test --package navassist-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the peripheral via `NAVASSIST_DEVICE` (MAC address, or the
//! CoreBluetooth UUID on macOS).

use std::env;
use std::sync::Arc;
use std::time::Duration;

use navassist_core::{
    BleService, BtleBackend, ConnectionConfig, ConnectionStatus, MemoryIdentityStore,
    ReconnectOptions, ServiceConfig,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(45);

fn get_device() -> Option<String> {
    env::var("NAVASSIST_DEVICE").ok().filter(|s| !s.is_empty())
}

fn start() -> navassist_core::BleHandle {
    let backend = Arc::new(BtleBackend::new(
        ConnectionConfig::default(),
        ReconnectOptions::none(),
    ));
    let (service, handle) = BleService::new(
        backend,
        Arc::new(MemoryIdentityStore::new()),
        ServiceConfig::default(),
    )
    .expect("valid config");
    tokio::spawn(service.run());
    handle
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_finds_peripherals() {
    let handle = start();
    let mut status = handle.bus().status();
    handle.start_scan().unwrap();

    let stopped = timeout(
        BLE_TIMEOUT,
        status.wait_for(|s| matches!(s, ConnectionStatus::ScanStopped | ConnectionStatus::ScanFailed { .. })),
    )
    .await
    .expect("scan did not finish")
    .map(|s| s.clone())
    .expect("bus closed");

    let results = handle.bus().current_scan_results();
    println!("Scan ended with {stopped}, {} peripheral(s):", results.len());
    for peripheral in &results {
        println!("  {} ({:?} dBm)", peripheral.display_name(), peripheral.rssi);
    }
    handle.shutdown();
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_receive_action() {
    let Some(device) = get_device() else {
        eprintln!("NAVASSIST_DEVICE not set, skipping");
        return;
    };

    let handle = start();
    let mut actions = handle.bus().actions();
    let mut successful = handle.bus().connection_successful();
    handle.connect(device.as_str()).unwrap();

    timeout(BLE_TIMEOUT, successful.wait_for(Option::is_some))
        .await
        .expect("connect timed out")
        .expect("bus closed");
    println!("Connected: {}", handle.bus().current_status());

    println!("Waiting for an action from the peripheral...");
    match timeout(BLE_TIMEOUT, actions.recv()).await {
        Ok(Ok(event)) => println!("Received {event:?}"),
        Ok(Err(e)) => panic!("action stream failed: {e}"),
        Err(_) => println!("No action within {BLE_TIMEOUT:?}"),
    }

    handle.disconnect().unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.shutdown();
}
