//! Scripted backend for testing without BLE hardware.
//!
//! [`MockBackend`] records every call and, unless switched to manual mode,
//! answers like a well-behaved peripheral: links come up, MTU negotiation
//! succeeds, discovery returns the configured service tree and the CCCD write
//! is confirmed. Individual operations can be made to fail to exercise the
//! error paths.
//!
//! # Example
//!
//! ```
//! use navassist_core::{GattOp, MockBackend};
//!
//! let backend = MockBackend::new()
//!     .with_advertisement("24:0A:C4:12:34:56".parse().unwrap(), Some("NavCane"))
//!     .fail_on(GattOp::DiscoverServices);
//! assert!(backend.is_failing(GattOp::DiscoverServices));
//! ```

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use navassist_types::PeripheralAddress;
use navassist_types::uuid::{ACTION_CHARACTERISTIC, CCCD, NAVASSIST_SERVICE};

use crate::backend::BleBackend;
use crate::error::{Error, Result};
use crate::gatt::{
    ConnectOptions, DescriptorWriteMode, GattCharacteristic, GattOp, GattService, GattStatus,
    HandleId, LinkState,
};
use crate::input::{BackendEvent, EventSink};

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    StartDiscovery { service: Uuid },
    StopDiscovery,
    OpenLink { handle: HandleId, address: PeripheralAddress },
    RequestMtu { handle: HandleId, mtu: u16 },
    DiscoverServices { handle: HandleId },
    EnableNotifications { handle: HandleId, characteristic: Uuid },
    WriteDescriptor {
        handle: HandleId,
        descriptor: Uuid,
        value: Vec<u8>,
        mode: DescriptorWriteMode,
    },
    Disconnect { handle: HandleId },
    Close { handle: HandleId },
}

#[derive(Debug)]
struct Script {
    auto_respond: bool,
    services: Vec<GattService>,
    advertisements: Vec<(PeripheralAddress, Option<String>)>,
    failing: HashSet<GattOp>,
    link_status: GattStatus,
    mtu_status: GattStatus,
    discovery_status: GattStatus,
    descriptor_status: GattStatus,
    calls: Vec<BackendCall>,
    open: Option<HandleId>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            auto_respond: true,
            services: navassist_service_tree(),
            advertisements: Vec::new(),
            failing: HashSet::new(),
            link_status: GattStatus::SUCCESS,
            mtu_status: GattStatus::SUCCESS,
            discovery_status: GattStatus::SUCCESS,
            descriptor_status: GattStatus::SUCCESS,
            calls: Vec::new(),
            open: None,
        }
    }
}

/// The service tree a real peripheral exposes.
pub fn navassist_service_tree() -> Vec<GattService> {
    vec![GattService::new(
        NAVASSIST_SERVICE,
        vec![GattCharacteristic::new(ACTION_CHARACTERISTIC, vec![CCCD])],
    )]
}

/// A mock BLE backend.
#[derive(Debug, Default)]
pub struct MockBackend {
    sink: OnceLock<EventSink>,
    script: Mutex<Script>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn script_mut(&mut self) -> &mut Script {
        self.script
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record calls without answering them. Tests then drive every
    /// platform callback through [`emit`](Self::emit).
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.script_mut().auto_respond = false;
        self
    }

    #[must_use]
    pub fn with_services(mut self, services: Vec<GattService>) -> Self {
        self.script_mut().services = services;
        self
    }

    /// Peripheral reported as a scan result when discovery starts.
    #[must_use]
    pub fn with_advertisement(mut self, address: PeripheralAddress, name: Option<&str>) -> Self {
        self.script_mut()
            .advertisements
            .push((address, name.map(String::from)));
        self
    }

    /// Make `op` fail to issue.
    #[must_use]
    pub fn fail_on(mut self, op: GattOp) -> Self {
        self.script_mut().failing.insert(op);
        self
    }

    #[must_use]
    pub fn with_link_status(mut self, status: GattStatus) -> Self {
        self.script_mut().link_status = status;
        self
    }

    #[must_use]
    pub fn with_mtu_status(mut self, status: GattStatus) -> Self {
        self.script_mut().mtu_status = status;
        self
    }

    #[must_use]
    pub fn with_discovery_status(mut self, status: GattStatus) -> Self {
        self.script_mut().discovery_status = status;
        self
    }

    #[must_use]
    pub fn with_descriptor_status(mut self, status: GattStatus) -> Self {
        self.script_mut().descriptor_status = status;
        self
    }

    /// Toggle failure injection for `op` at runtime.
    pub fn set_failing(&self, op: GattOp, failing: bool) {
        let mut script = self.script();
        if failing {
            script.failing.insert(op);
        } else {
            script.failing.remove(&op);
        }
    }

    pub fn set_services(&self, services: Vec<GattService>) {
        self.script().services = services;
    }

    pub fn is_failing(&self, op: GattOp) -> bool {
        self.script().failing.contains(&op)
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.script().calls.clone()
    }

    /// Number of calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.script().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Handle of the most recently opened link that has not been closed.
    pub fn open_handle(&self) -> Option<HandleId> {
        self.script().open
    }

    /// Inject a backend event as if the platform reported it.
    pub fn emit(&self, event: BackendEvent) -> bool {
        match self.sink.get() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Deliver a notification on the action characteristic of the open link.
    pub fn notify(&self, value: impl Into<Bytes>) -> bool {
        let Some(handle) = self.open_handle() else {
            return false;
        };
        self.emit(BackendEvent::CharacteristicChanged {
            handle,
            characteristic: ACTION_CHARACTERISTIC,
            value: value.into(),
        })
    }

    /// Drop the open link from the peripheral side.
    pub fn drop_link(&self, status: GattStatus) -> bool {
        let Some(handle) = self.open_handle() else {
            return false;
        };
        self.emit(BackendEvent::LinkStateChanged {
            handle,
            status,
            state: LinkState::Disconnected,
        })
    }

    /// Record `call`, fail if `op` is scripted to fail, and return whether
    /// the mock should answer.
    fn record(&self, op: GattOp, call: BackendCall) -> Result<bool> {
        let mut script = self.script();
        debug!(?call, "Mock backend call");
        script.calls.push(call);
        if script.failing.contains(&op) {
            return Err(Error::Bluetooth(btleplug::Error::Other(
                format!("mock failure: {op}").into(),
            )));
        }
        Ok(script.auto_respond)
    }
}

#[async_trait]
impl BleBackend for MockBackend {
    async fn attach(&self, sink: EventSink) -> Result<()> {
        // A second attach keeps the first sink.
        let _ = self.sink.set(sink);
        Ok(())
    }

    async fn start_discovery(&self, service: Uuid) -> Result<()> {
        if self.record(GattOp::StartScan, BackendCall::StartDiscovery { service })? {
            let advertisements = self.script().advertisements.clone();
            for (address, name) in advertisements {
                self.emit(BackendEvent::ScanResult {
                    address,
                    hardware_name: name.clone(),
                    advertised_name: name,
                    rssi: Some(-60),
                });
            }
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.record(GattOp::StopScan, BackendCall::StopDiscovery)?;
        Ok(())
    }

    async fn open_link(
        &self,
        handle: HandleId,
        address: PeripheralAddress,
        _options: ConnectOptions,
    ) -> Result<()> {
        let respond = self.record(GattOp::Connect, BackendCall::OpenLink { handle, address })?;
        let status = {
            let mut script = self.script();
            script.open = Some(handle);
            script.link_status
        };
        if respond {
            self.emit(BackendEvent::LinkStateChanged {
                handle,
                status,
                state: if status.is_success() {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                },
            });
        }
        Ok(())
    }

    async fn request_mtu(&self, handle: HandleId, mtu: u16) -> Result<()> {
        if self.record(GattOp::RequestMtu, BackendCall::RequestMtu { handle, mtu })? {
            let status = self.script().mtu_status;
            self.emit(BackendEvent::MtuChanged {
                handle,
                mtu,
                status,
            });
        }
        Ok(())
    }

    async fn discover_services(&self, handle: HandleId) -> Result<()> {
        if self.record(
            GattOp::DiscoverServices,
            BackendCall::DiscoverServices { handle },
        )? {
            let (status, services) = {
                let script = self.script();
                (script.discovery_status, script.services.clone())
            };
            self.emit(BackendEvent::ServicesDiscovered {
                handle,
                status,
                services,
            });
        }
        Ok(())
    }

    async fn enable_notifications(
        &self,
        handle: HandleId,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<()> {
        self.record(
            GattOp::EnableNotifications,
            BackendCall::EnableNotifications {
                handle,
                characteristic,
            },
        )?;
        Ok(())
    }

    async fn write_descriptor(
        &self,
        handle: HandleId,
        _service: Uuid,
        _characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
        mode: DescriptorWriteMode,
    ) -> Result<()> {
        let call = BackendCall::WriteDescriptor {
            handle,
            descriptor,
            value: value.to_vec(),
            mode,
        };
        if self.record(GattOp::WriteDescriptor, call)? {
            let status = self.script().descriptor_status;
            self.emit(BackendEvent::DescriptorWritten {
                handle: Some(handle),
                descriptor,
                status,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, handle: HandleId) -> Result<()> {
        if self.record(GattOp::Disconnect, BackendCall::Disconnect { handle })? {
            self.emit(BackendEvent::LinkStateChanged {
                handle,
                status: GattStatus::SUCCESS,
                state: LinkState::Disconnected,
            });
        }
        Ok(())
    }

    async fn close(&self, handle: HandleId) {
        let mut script = self.script();
        script.calls.push(BackendCall::Close { handle });
        if script.open == Some(handle) {
            script.open = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Input;
    use tokio::sync::mpsc;

    fn attached() -> (MockBackend, mpsc::UnboundedReceiver<Input>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = MockBackend::new();
        backend
            .sink
            .set(EventSink::new(tx))
            .expect("sink already set");
        (backend, rx)
    }

    #[tokio::test]
    async fn test_open_link_answers_with_link_up() {
        let (backend, mut rx) = attached();
        let address = "24:0A:C4:12:34:56".parse().unwrap();
        backend
            .open_link(HandleId(1), address, ConnectOptions::session())
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Input::Backend(BackendEvent::LinkStateChanged {
                handle: HandleId(1),
                status: GattStatus::SUCCESS,
                state: LinkState::Connected,
            }))
        );
        assert_eq!(backend.open_handle(), Some(HandleId(1)));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let (backend, mut rx) = attached();
        backend.set_failing(GattOp::DiscoverServices, true);
        assert!(backend.discover_services(HandleId(1)).await.is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(
            backend.calls(),
            vec![BackendCall::DiscoverServices {
                handle: HandleId(1)
            }]
        );

        backend.set_failing(GattOp::DiscoverServices, false);
        assert!(backend.discover_services(HandleId(1)).await.is_ok());
        assert!(matches!(
            rx.recv().await,
            Some(Input::Backend(BackendEvent::ServicesDiscovered { .. }))
        ));
    }

    #[tokio::test]
    async fn test_manual_mode_records_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = MockBackend::new().manual();
        backend.attach(EventSink::new(tx)).await.unwrap();
        backend.request_mtu(HandleId(3), 185).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::RequestMtu { .. })), 1);
    }

    #[tokio::test]
    async fn test_close_clears_open_handle() {
        let (backend, _rx) = attached();
        let address = "24:0A:C4:12:34:56".parse().unwrap();
        backend
            .open_link(HandleId(1), address, ConnectOptions::session())
            .await
            .unwrap();
        backend.close(HandleId(1)).await;
        assert_eq!(backend.open_handle(), None);
        assert!(!backend.notify(&b"1,0,0,x"[..]));
    }
}
