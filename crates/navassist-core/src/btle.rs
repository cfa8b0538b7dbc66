//! [`BleBackend`] over btleplug.
//!
//! Desktop stacks differ from the callback model the controller expects in a
//! few ways, which this module papers over:
//!
//! - there is no MTU request, so `request_mtu` reports the default MTU with
//!   `REQUEST_NOT_SUPPORTED` and negotiation continues;
//! - CCCD writes go through `subscribe`/`unsubscribe`, and a characteristic
//!   with the notify or indicate property is reported as carrying a CCCD even
//!   when the platform hides descriptor discovery;
//! - there are no runtime permissions, so the environment stays unrestricted;
//! - adapter power changes arrive as `StateUpdate` events and are forwarded
//!   as radio state. An unknown state is not reported.
//!
//! Each platform call is bounded by the [`ConnectionConfig`] timeouts and
//! runs on its own task; results come back through the [`EventSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use navassist_types::PeripheralAddress;
use navassist_types::uuid::{CCCD, DEFAULT_MTU, ENABLE_NOTIFICATION_VALUE};

use crate::backend::BleBackend;
use crate::config::{ConnectionConfig, ReconnectOptions};
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::gatt::{
    ConnectOptions, DescriptorWriteMode, GattCharacteristic, GattOp, GattService, GattStatus,
    HandleId, LinkState,
};
use crate::input::{BackendEvent, EventSink};

/// How often the lookup scan checks for the target peripheral.
const LOOKUP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Format a btleplug peripheral ID without the `PeripheralId(...)` wrapper.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Address for a peripheral. macOS hides MAC addresses and reports all
/// zeros, so the platform identifier is used there instead.
async fn peripheral_address(peripheral: &Peripheral) -> Option<PeripheralAddress> {
    let from_id = || {
        format_peripheral_id(&peripheral.id())
            .parse::<PeripheralAddress>()
            .ok()
    };
    match peripheral.properties().await {
        Ok(Some(props)) => props
            .address
            .to_string()
            .parse::<PeripheralAddress>()
            .ok()
            .filter(|a| !a.is_unspecified())
            .or_else(from_id),
        _ => from_id(),
    }
}

/// Convert the platform's service tree.
fn map_services(peripheral: &Peripheral) -> Vec<GattService> {
    peripheral
        .services()
        .into_iter()
        .map(|service| {
            let characteristics = service
                .characteristics
                .iter()
                .map(|c| {
                    let mut descriptors: Vec<Uuid> = c.descriptors.iter().map(|d| d.uuid).collect();
                    if c.properties
                        .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
                        && !descriptors.contains(&CCCD)
                    {
                        descriptors.push(CCCD);
                    }
                    GattCharacteristic::new(c.uuid, descriptors)
                })
                .collect();
            GattService::new(service.uuid, characteristics)
        })
        .collect()
}

fn find_characteristic(
    peripheral: &Peripheral,
    service: Uuid,
    characteristic: Uuid,
) -> Result<Characteristic> {
    let characteristics = peripheral.characteristics();
    let count = peripheral.services().len();
    characteristics
        .into_iter()
        .find(|c| c.uuid == characteristic && c.service_uuid == service)
        .ok_or_else(|| Error::characteristic_not_found(characteristic.to_string(), count))
}

struct Link {
    /// `None` until the link is up.
    peripheral: Option<Peripheral>,
    cancel: CancellationToken,
}

struct Inner {
    config: ConnectionConfig,
    reconnect: ReconnectOptions,
    adapter: OnceLock<Adapter>,
    sink: OnceLock<EventSink>,
    links: Mutex<HashMap<HandleId, Link>>,
    scanning: AtomicBool,
    shutdown: CancellationToken,
}

/// btleplug-backed [`BleBackend`].
#[derive(Clone)]
pub struct BtleBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BtleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleBackend")
            .field("config", &self.inner.config)
            .field("attached", &self.inner.adapter.get().is_some())
            .field("scanning", &self.inner.scanning.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for BtleBackend {
    fn default() -> Self {
        Self::new(ConnectionConfig::default(), ReconnectOptions::default())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl BtleBackend {
    pub fn new(config: ConnectionConfig, reconnect: ReconnectOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                reconnect,
                adapter: OnceLock::new(),
                sink: OnceLock::new(),
                links: Mutex::new(HashMap::new()),
                scanning: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

impl Inner {
    fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .get()
            .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
    }

    fn emit(&self, event: BackendEvent) {
        match self.sink.get() {
            Some(sink) => {
                if !sink.emit(event) {
                    debug!("Service gone, dropping backend event");
                }
            }
            None => warn!("Backend event before attach"),
        }
    }

    async fn peripheral(&self, handle: HandleId) -> Result<Peripheral> {
        self.links
            .lock()
            .await
            .get(&handle)
            .and_then(|link| link.peripheral.clone())
            .ok_or(Error::NotConnected)
    }

    async fn report_scan_result(&self, id: &PeripheralId) {
        let Ok(adapter) = self.adapter() else {
            return;
        };
        let Ok(peripheral) = adapter.peripheral(id).await else {
            return;
        };
        let Some(address) = peripheral_address(&peripheral).await else {
            debug!(id = %format_peripheral_id(id), "Skipping peripheral without usable address");
            return;
        };
        let props = peripheral.properties().await.ok().flatten();
        let name = props.as_ref().and_then(|p| p.local_name.clone());
        self.emit(BackendEvent::ScanResult {
            address,
            hardware_name: name.clone(),
            advertised_name: name,
            rssi: props.and_then(|p| p.rssi),
        });
    }

    async fn on_device_disconnected(&self, id: &PeripheralId) {
        let handles: Vec<HandleId> = self
            .links
            .lock()
            .await
            .iter()
            .filter(|(_, link)| link.peripheral.as_ref().is_some_and(|p| p.id() == *id))
            .map(|(handle, _)| *handle)
            .collect();
        for handle in handles {
            info!(%handle, "Peripheral disconnected");
            self.emit(BackendEvent::LinkStateChanged {
                handle,
                status: GattStatus::SUCCESS,
                state: LinkState::Disconnected,
            });
        }
    }

    async fn listen(self: Arc<Self>, adapter: Adapter) {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Adapter events unavailable");
                return;
            }
        };
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    if self.scanning.load(Ordering::Acquire) {
                        self.report_scan_result(&id).await;
                    }
                }
                CentralEvent::DeviceDisconnected(id) => self.on_device_disconnected(&id).await,
                CentralEvent::StateUpdate(state) => self.report_radio_state(state),
                _ => {}
            }
        }
        debug!("Adapter event listener stopped");
    }

    fn report_radio_state(&self, state: CentralState) {
        let enabled = match state {
            CentralState::PoweredOn => true,
            CentralState::PoweredOff => false,
            _ => return,
        };
        info!(enabled, "Adapter power changed");
        self.emit(BackendEvent::RadioStateChanged { enabled });
    }

    /// Look for `address` among known peripherals, scanning briefly if needed.
    async fn find_peripheral(&self, address: PeripheralAddress) -> Result<Peripheral> {
        let adapter = self.adapter()?;
        if let Some(peripheral) = self.known_peripheral(adapter, address).await? {
            debug!(%address, "Peripheral already known to adapter");
            return Ok(peripheral);
        }

        info!(%address, timeout_secs = self.config.lookup_timeout.as_secs(), "Scanning for peripheral");
        adapter.start_scan(ScanFilter::default()).await?;
        let found = timeout(self.config.lookup_timeout, async {
            loop {
                if let Some(peripheral) = self.known_peripheral(adapter, address).await? {
                    return Ok::<_, Error>(peripheral);
                }
                sleep(LOOKUP_POLL_INTERVAL).await;
            }
        })
        .await;
        if !self.scanning.load(Ordering::Acquire)
            && let Err(e) = adapter.stop_scan().await
        {
            debug!(error = %e, "Failed to stop lookup scan");
        }

        match found {
            Ok(result) => result,
            Err(_) => Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: self.config.lookup_timeout,
            })),
        }
    }

    async fn known_peripheral(
        &self,
        adapter: &Adapter,
        address: PeripheralAddress,
    ) -> Result<Option<Peripheral>> {
        for peripheral in adapter.peripherals().await? {
            if peripheral_address(&peripheral).await == Some(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn connect_once(&self, address: PeripheralAddress) -> Result<Peripheral> {
        let peripheral = self.find_peripheral(address).await?;
        if !peripheral.is_connected().await.unwrap_or(false) {
            timeout(self.config.connection_timeout, peripheral.connect())
                .await
                .map_err(|_| Error::timeout("connect", self.config.connection_timeout))??;
        }
        Ok(peripheral)
    }

    async fn connect_with_retry(
        &self,
        address: PeripheralAddress,
        options: ConnectOptions,
    ) -> Result<Peripheral> {
        let mut attempt = 0;
        loop {
            match self.connect_once(address).await {
                Ok(peripheral) => return Ok(peripheral),
                Err(e) if options.auto_reconnect && self.reconnect.allows(attempt) => {
                    let delay = self.reconnect.delay_for_attempt(attempt);
                    warn!(%address, attempt = attempt + 1, ?delay, error = %e, "Connect failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn establish(
        self: Arc<Self>,
        handle: HandleId,
        address: PeripheralAddress,
        options: ConnectOptions,
        cancel: CancellationToken,
    ) {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%handle, "Link attempt cancelled");
                return;
            }
            result = self.connect_with_retry(address, options) => result,
        };

        let peripheral = match result {
            Ok(peripheral) => peripheral,
            Err(e) => {
                warn!(%handle, %address, error = %e, "Failed to open link");
                self.emit(BackendEvent::OperationFailed {
                    handle: Some(handle),
                    op: GattOp::Connect,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let installed = match self.links.lock().await.get_mut(&handle) {
            Some(link) => {
                link.peripheral = Some(peripheral.clone());
                true
            }
            None => false,
        };
        if !installed {
            debug!(%handle, "Handle closed while connecting, dropping link");
            let _ = peripheral.disconnect().await;
            return;
        }

        self.spawn_notification_pump(handle, &peripheral, cancel).await;
        self.emit(BackendEvent::LinkStateChanged {
            handle,
            status: GattStatus::SUCCESS,
            state: LinkState::Connected,
        });
    }

    async fn spawn_notification_pump(
        self: &Arc<Self>,
        handle: HandleId,
        peripheral: &Peripheral,
        cancel: CancellationToken,
    ) {
        let mut stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%handle, error = %e, "Notification stream unavailable");
                return;
            }
        };
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = stream.next() => match notification {
                        Some(n) => inner.emit(BackendEvent::CharacteristicChanged {
                            handle,
                            characteristic: n.uuid,
                            value: Bytes::from(n.value),
                        }),
                        None => break,
                    },
                }
            }
            debug!(%handle, "Notification pump stopped");
        });
    }

    async fn write_descriptor_now(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let write_timeout = self.config.write_timeout;
        let operation = async {
            if descriptor == CCCD {
                if value == ENABLE_NOTIFICATION_VALUE {
                    peripheral.subscribe(characteristic).await
                } else {
                    peripheral.unsubscribe(characteristic).await
                }
            } else {
                match characteristic.descriptors.iter().find(|d| d.uuid == descriptor) {
                    Some(d) => peripheral.write_descriptor(d, value).await,
                    None => Err(btleplug::Error::NoSuchCharacteristic),
                }
            }
        };
        timeout(write_timeout, operation)
            .await
            .map_err(|_| Error::timeout("write descriptor", write_timeout))??;
        Ok(())
    }
}

#[async_trait]
impl BleBackend for BtleBackend {
    async fn attach(&self, sink: EventSink) -> Result<()> {
        if self.inner.sink.set(sink).is_err() {
            debug!("Backend already attached");
            return Ok(());
        }

        let manager = Manager::new().await?;
        let Some(adapter) = manager.adapters().await?.into_iter().next() else {
            warn!("No Bluetooth adapter found, reporting radio off");
            self.inner
                .emit(BackendEvent::RadioStateChanged { enabled: false });
            return Ok(());
        };
        let adapter_info = adapter.adapter_info().await.ok();
        info!(adapter = ?adapter_info, "Using Bluetooth adapter");
        match adapter.adapter_state().await {
            Ok(state) => self.inner.report_radio_state(state),
            Err(e) => debug!(error = %e, "Adapter state unavailable"),
        }

        let _ = self.inner.adapter.set(adapter.clone());
        tokio::spawn(Arc::clone(&self.inner).listen(adapter));
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn start_discovery(&self, service: Uuid) -> Result<()> {
        let adapter = self.inner.adapter()?;
        adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        self.inner.scanning.store(true, Ordering::Release);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn stop_discovery(&self) -> Result<()> {
        self.inner.scanning.store(false, Ordering::Release);
        self.inner.adapter()?.stop_scan().await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self, options), fields(auto_reconnect = options.auto_reconnect))]
    async fn open_link(
        &self,
        handle: HandleId,
        address: PeripheralAddress,
        options: ConnectOptions,
    ) -> Result<()> {
        self.inner.adapter()?;
        debug!(transport = ?options.transport, "Transport selection is left to the platform");
        let cancel = self.inner.shutdown.child_token();
        self.inner.links.lock().await.insert(
            handle,
            Link {
                peripheral: None,
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(Arc::clone(&self.inner).establish(handle, address, options, cancel));
        Ok(())
    }

    async fn request_mtu(&self, handle: HandleId, mtu: u16) -> Result<()> {
        self.inner.peripheral(handle).await?;
        debug!(%handle, requested = mtu, "MTU requests are not exposed by this stack");
        self.inner.emit(BackendEvent::MtuChanged {
            handle,
            mtu: DEFAULT_MTU,
            status: GattStatus::REQUEST_NOT_SUPPORTED,
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn discover_services(&self, handle: HandleId) -> Result<()> {
        let peripheral = self.inner.peripheral(handle).await?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let discovery_timeout = inner.config.discovery_timeout;
            let outcome = timeout(discovery_timeout, peripheral.discover_services()).await;
            let (status, services) = match outcome {
                Ok(Ok(())) => (GattStatus::SUCCESS, map_services(&peripheral)),
                Ok(Err(e)) => {
                    warn!(%handle, error = %e, "Service discovery failed");
                    (GattStatus::ERROR, Vec::new())
                }
                Err(_) => {
                    warn!(%handle, ?discovery_timeout, "Service discovery timed out");
                    (GattStatus::ERROR, Vec::new())
                }
            };
            debug!(%handle, services = services.len(), "Services discovered");
            inner.emit(BackendEvent::ServicesDiscovered {
                handle,
                status,
                services,
            });
        });
        Ok(())
    }

    async fn enable_notifications(
        &self,
        handle: HandleId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()> {
        let peripheral = self.inner.peripheral(handle).await?;
        // Delivery is enabled by the pump started with the link; the
        // characteristic only has to exist.
        find_characteristic(&peripheral, service, characteristic)?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, value))]
    async fn write_descriptor(
        &self,
        handle: HandleId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
        mode: DescriptorWriteMode,
    ) -> Result<()> {
        debug!(?mode, "btleplug writes the CCCD through subscribe in either mode");
        let peripheral = self.inner.peripheral(handle).await?;
        let characteristic = find_characteristic(&peripheral, service, characteristic)?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let status = match inner
                .write_descriptor_now(&peripheral, &characteristic, descriptor, &value)
                .await
            {
                Ok(()) => GattStatus::SUCCESS,
                Err(e) => {
                    warn!(%handle, %descriptor, error = %e, "Descriptor write failed");
                    GattStatus::ERROR
                }
            };
            inner.emit(BackendEvent::DescriptorWritten {
                handle: Some(handle),
                descriptor,
                status,
            });
        });
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn disconnect(&self, handle: HandleId) -> Result<()> {
        let peripheral = self.inner.peripheral(handle).await?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let connection_timeout = inner.config.connection_timeout;
            let event = match timeout(connection_timeout, peripheral.disconnect()).await {
                Ok(Ok(())) => BackendEvent::LinkStateChanged {
                    handle,
                    status: GattStatus::SUCCESS,
                    state: LinkState::Disconnected,
                },
                Ok(Err(e)) => BackendEvent::OperationFailed {
                    handle: Some(handle),
                    op: GattOp::Disconnect,
                    reason: e.to_string(),
                },
                Err(_) => BackendEvent::OperationFailed {
                    handle: Some(handle),
                    op: GattOp::Disconnect,
                    reason: Error::timeout("disconnect", connection_timeout).to_string(),
                },
            };
            inner.emit(event);
        });
        Ok(())
    }

    async fn close(&self, handle: HandleId) {
        let Some(link) = self.inner.links.lock().await.remove(&handle) else {
            return;
        };
        link.cancel.cancel();
        if let Some(peripheral) = link.peripheral {
            tokio::spawn(async move {
                if peripheral.is_connected().await.unwrap_or(false)
                    && let Err(e) = peripheral.disconnect().await
                {
                    debug!(%handle, error = %e, "Best-effort disconnect on close failed");
                }
            });
        }
        debug!(%handle, "Handle closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_futures_are_send() {
        // async_trait boxes every method as `Send`; the service spawns them.
        fn _assert_backend<B: BleBackend + 'static>() {}
        _assert_backend::<BtleBackend>();
    }
}
