//! Effects produced by the controller.
//!
//! The controller never performs I/O. It returns effects and the service
//! driver carries them out in order.

use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use navassist_types::{PeripheralAddress, PeripheralDescriptor, PersistedPeripheralIdentity};

use crate::gatt::{ConnectOptions, DescriptorWriteMode, HandleId};
use crate::status::ConnectionStatus;

/// Foreground keep-alive signalling while a link is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAlive {
    Start { text: String },
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish a status on the bus.
    Broadcast(ConnectionStatus),
    /// Publish the current ordered scan result list.
    PublishScanResults(Vec<PeripheralDescriptor>),
    StartDiscovery {
        service: Uuid,
    },
    StopDiscovery,
    /// Feed `ScanTimeout { generation }` back after `after`.
    ScheduleScanTimeout {
        generation: u64,
        after: Duration,
    },
    CancelScanTimeout,
    OpenLink {
        handle: HandleId,
        address: PeripheralAddress,
        options: ConnectOptions,
    },
    RequestMtu {
        handle: HandleId,
        mtu: u16,
    },
    DiscoverServices {
        handle: HandleId,
    },
    EnableNotifications {
        handle: HandleId,
        service: Uuid,
        characteristic: Uuid,
    },
    WriteDescriptor {
        handle: HandleId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
        mode: DescriptorWriteMode,
    },
    /// Protocol disconnect; teardown follows the link-down event.
    Disconnect {
        handle: HandleId,
    },
    /// Release the platform handle immediately.
    CloseHandle {
        handle: HandleId,
    },
    PersistIdentity(PersistedPeripheralIdentity),
    ClearIdentity,
    KeepAlive(KeepAlive),
    /// Decode and publish a notification payload off the controller task.
    DispatchNotification {
        handle: HandleId,
        value: Bytes,
    },
}

impl Effect {
    /// The status carried by a broadcast effect.
    pub fn as_broadcast(&self) -> Option<&ConnectionStatus> {
        match self {
            Effect::Broadcast(status) => Some(status),
            _ => None,
        }
    }
}
