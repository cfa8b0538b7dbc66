//! Platform-agnostic types for the navassist BLE peripheral protocol.
//!
//! This crate holds what both the BLE core and the app service need to agree
//! on without pulling in a Bluetooth stack:
//!
//! - GATT UUID constants and protocol constants
//! - Peripheral addresses and scan descriptors
//! - The action message decoder
//!
//! # Example
//!
//! ```
//! use navassist_types::{DomainEvent, PeripheralAddress};
//!
//! let address: PeripheralAddress = "24:0A:C4:12:34:56".parse().unwrap();
//! assert_eq!(address.to_string(), "24:0A:C4:12:34:56");
//!
//! let event = DomainEvent::decode(b"1,24.14,-110.27,").unwrap();
//! assert!(event.coordinates().is_some());
//! ```

pub mod action;
pub mod address;
pub mod error;
pub mod peripheral;
pub mod uuid;

pub use action::{ActionType, DomainEvent};
pub use address::PeripheralAddress;
pub use error::{DecodeError, ParseError, ParseResult};
pub use peripheral::{PeripheralDescriptor, PersistedPeripheralIdentity};
pub use uuid as uuids;
