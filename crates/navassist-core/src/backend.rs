//! The seam between the service loop and a Bluetooth stack.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use navassist_types::PeripheralAddress;

use crate::error::Result;
use crate::gatt::{ConnectOptions, DescriptorWriteMode, HandleId};
use crate::input::EventSink;

/// Platform operations the controller's effects map onto.
///
/// Every method only *issues* an operation. Results are reported later
/// through the [`EventSink`] handed to [`attach`](BleBackend::attach), tagged
/// with the [`HandleId`] the operation was issued for. An `Err` return means
/// the operation could not be issued at all; the service turns it into an
/// `OperationFailed` event.
///
/// Methods are awaited in order on the service loop, so anything that waits
/// on the radio must be spawned rather than awaited inline.
#[async_trait]
pub trait BleBackend: Send + Sync {
    /// Called once before any other method.
    async fn attach(&self, sink: EventSink) -> Result<()>;

    /// Start discovery restricted to peripherals advertising `service`.
    async fn start_discovery(&self, service: Uuid) -> Result<()>;

    async fn stop_discovery(&self) -> Result<()>;

    /// Open a link to `address`. The platform handle is owned by the backend
    /// under `handle` until [`close`](BleBackend::close).
    async fn open_link(
        &self,
        handle: HandleId,
        address: PeripheralAddress,
        options: ConnectOptions,
    ) -> Result<()>;

    async fn request_mtu(&self, handle: HandleId, mtu: u16) -> Result<()>;

    async fn discover_services(&self, handle: HandleId) -> Result<()>;

    /// Enable local delivery of notifications for a characteristic.
    async fn enable_notifications(
        &self,
        handle: HandleId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn write_descriptor(
        &self,
        handle: HandleId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
        mode: DescriptorWriteMode,
    ) -> Result<()>;

    /// Protocol disconnect. The link-down event follows.
    async fn disconnect(&self, handle: HandleId) -> Result<()>;

    /// Release the handle immediately. Never fails; unknown handles are ignored.
    async fn close(&self, handle: HandleId);
}
