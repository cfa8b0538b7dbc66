//! BLE session core for the navassist assistive-navigation peripheral.
//!
//! The peripheral is a wearable sensor module that sends short comma-separated
//! action messages over a single notify characteristic. This crate discovers
//! it, negotiates a GATT session, keeps that session alive across restarts and
//! turns its notifications into typed [`DomainEvent`]s.
//!
//! # Architecture
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Controller`] | Pure state machine: one [`Input`] in, ordered [`Effect`]s out |
//! | [`ScanManager`] | Discovery cycles, deduplication, auto-stop timer |
//! | [`ConnectionManager`] | The single session: connect, MTU, discovery, CCCD write, teardown |
//! | [`PermissionGate`] | API-level dependent permission rules |
//! | [`DeviceNameResolver`] | Stable display names and persisted-name reconciliation |
//! | [`ConnectionStateBus`] | Latest-value status channels and the action stream |
//! | [`BleService`] | Async driver executing effects against a [`BleBackend`] |
//!
//! Two backends ship with the crate: [`BtleBackend`] over btleplug, and
//! [`MockBackend`] for tests.
//!
//! # Session protocol
//!
//! ```text
//! connect ─► link up ─► MTU 185 ─► discover services ─► write CCCD 0x0001 ─► Connected
//! ```
//!
//! `Connected` is broadcast once optimistically when the link comes up and
//! once more, terminally, when the CCCD write is confirmed.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use navassist_core::{BleService, BtleBackend, MemoryIdentityStore, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(BtleBackend::default());
//!     let store = Arc::new(MemoryIdentityStore::new());
//!     let (service, handle) = BleService::new(backend, store, ServiceConfig::default())?;
//!     tokio::spawn(service.run());
//!
//!     let mut actions = handle.bus().actions();
//!     handle.restore()?;
//!     handle.start_scan()?;
//!
//!     while let Ok(event) = actions.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod btle;
pub mod bus;
pub mod config;
pub mod connection;
pub mod controller;
pub mod effect;
pub mod error;
pub mod gatt;
pub mod identity;
pub mod input;
pub mod mock;
pub mod name;
pub mod permissions;
pub mod scan;
pub mod service;
pub mod status;

pub use backend::BleBackend;
pub use btle::BtleBackend;
pub use bus::{ConnectedPeripheral, ConnectionFailure, ConnectionStateBus};
pub use config::{ConnectionConfig, ReconnectOptions, ServiceConfig};
pub use connection::{ConnectMode, ConnectionManager, ConnectionSession, SessionState};
pub use controller::Controller;
pub use effect::{Effect, KeepAlive};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use gatt::{
    ConnectOptions, DescriptorWriteMode, GattCharacteristic, GattOp, GattService, GattStatus,
    HandleId, LinkState, Transport,
};
pub use identity::{IdentityStore, MemoryIdentityStore};
pub use input::{BackendEvent, Command, EventSink, Input};
pub use mock::{BackendCall, MockBackend};
pub use name::DeviceNameResolver;
pub use permissions::{Capability, Environment, Permission, PermissionGate, PermissionSet};
pub use scan::ScanManager;
pub use service::{BleHandle, BleService};
pub use status::{ConnectionStatus, PeripheralRef, ScanFailure};

// Re-export types for convenience
pub use navassist_types::uuid as uuids;
pub use navassist_types::{
    ActionType, DecodeError, DomainEvent, PeripheralAddress, PeripheralDescriptor,
    PersistedPeripheralIdentity,
};
