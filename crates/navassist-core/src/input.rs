//! Inputs to the controller: user commands and backend events.
//!
//! Both arrive on the same queue, so the controller sees one ordered stream
//! and never needs locking.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use navassist_types::PeripheralAddress;

use crate::gatt::{GattOp, GattService, GattStatus, HandleId, LinkState};
use crate::permissions::PermissionSet;

/// Requests accepted from the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScan,
    StopScan,
    /// Connect to the peripheral at `address`. The string is validated by the
    /// controller so malformed input turns into a broadcast, not an error.
    Connect { address: String },
    Disconnect,
    /// Reserved. Logged and ignored.
    RequestCurrentStatus,
    /// Service (re)start with no explicit action: reconnect to the persisted
    /// peripheral if there is one and no session exists.
    Restore,
}

/// Everything the platform reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    ScanResult {
        address: PeripheralAddress,
        /// Name the platform knows the device by.
        hardware_name: Option<String>,
        /// Local name from the advertisement.
        advertised_name: Option<String>,
        rssi: Option<i16>,
    },
    ScanTimeout {
        generation: u64,
    },
    LinkStateChanged {
        handle: HandleId,
        status: GattStatus,
        state: LinkState,
    },
    MtuChanged {
        handle: HandleId,
        mtu: u16,
        status: GattStatus,
    },
    ServicesDiscovered {
        handle: HandleId,
        status: GattStatus,
        services: Vec<GattService>,
    },
    /// Result of a descriptor write. `handle` is `None` when the platform
    /// reports a failure without a link reference.
    DescriptorWritten {
        handle: Option<HandleId>,
        descriptor: Uuid,
        status: GattStatus,
    },
    CharacteristicChanged {
        handle: HandleId,
        characteristic: Uuid,
        value: Bytes,
    },
    /// A backend call could not be issued.
    OperationFailed {
        handle: Option<HandleId>,
        op: GattOp,
        reason: String,
    },
    PermissionsChanged {
        granted: PermissionSet,
    },
    RadioStateChanged {
        enabled: bool,
    },
}

/// One item on the controller queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(Command),
    Backend(BackendEvent),
}

impl From<Command> for Input {
    fn from(command: Command) -> Self {
        Input::Command(command)
    }
}

impl From<BackendEvent> for Input {
    fn from(event: BackendEvent) -> Self {
        Input::Backend(event)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::StartScan => write!(f, "start scan"),
            Command::StopScan => write!(f, "stop scan"),
            Command::Connect { address } => write!(f, "connect {}", address),
            Command::Disconnect => write!(f, "disconnect"),
            Command::RequestCurrentStatus => write!(f, "request current status"),
            Command::Restore => write!(f, "restore"),
        }
    }
}

/// Sending half of the controller queue, handed to backends.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<Input>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<Input>) -> Self {
        Self { sender }
    }

    /// Report a backend event. Returns `false` once the controller is gone.
    pub fn emit(&self, event: BackendEvent) -> bool {
        self.sender.send(Input::Backend(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
