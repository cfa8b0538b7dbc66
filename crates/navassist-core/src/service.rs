//! The long-running BLE service task.
//!
//! [`BleService::run`] owns the [`Controller`] and a single input queue that
//! carries both app commands and backend events. Each input is handed to the
//! controller and the resulting effects are carried out in order against the
//! [`BleBackend`], the [`ConnectionStateBus`] and the [`IdentityStore`].
//!
//! Notification payloads are decoded on tasks spawned on a [`TaskTracker`],
//! so a malformed or panicking decode never reaches the loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use navassist_types::{DomainEvent, PersistedPeripheralIdentity};

use crate::backend::BleBackend;
use crate::bus::ConnectionStateBus;
use crate::config::ServiceConfig;
use crate::controller::Controller;
use crate::effect::{Effect, KeepAlive};
use crate::error::{Error, Result};
use crate::gatt::{GattOp, HandleId};
use crate::identity::IdentityStore;
use crate::input::{BackendEvent, Command, EventSink, Input};
use crate::permissions::PermissionSet;

/// Cheap, cloneable handle for talking to a running [`BleService`].
#[derive(Debug, Clone)]
pub struct BleHandle {
    inputs: mpsc::UnboundedSender<Input>,
    bus: ConnectionStateBus,
    keep_alive: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
}

impl BleHandle {
    /// Queue a command.
    pub fn send(&self, command: Command) -> Result<()> {
        self.inputs
            .send(Input::Command(command))
            .map_err(|_| Error::ServiceStopped)
    }

    pub fn start_scan(&self) -> Result<()> {
        self.send(Command::StartScan)
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.send(Command::StopScan)
    }

    pub fn connect(&self, address: impl Into<String>) -> Result<()> {
        self.send(Command::Connect {
            address: address.into(),
        })
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    pub fn request_current_status(&self) -> Result<()> {
        self.send(Command::RequestCurrentStatus)
    }

    /// Reconnect to the persisted peripheral if no session exists.
    pub fn restore(&self) -> Result<()> {
        self.send(Command::Restore)
    }

    /// Report a change in granted runtime permissions.
    pub fn update_permissions(&self, granted: PermissionSet) -> Result<()> {
        self.inputs
            .send(Input::Backend(BackendEvent::PermissionsChanged { granted }))
            .map_err(|_| Error::ServiceStopped)
    }

    /// Report the radio being switched on or off.
    pub fn set_radio_enabled(&self, enabled: bool) -> Result<()> {
        self.inputs
            .send(Input::Backend(BackendEvent::RadioStateChanged { enabled }))
            .map_err(|_| Error::ServiceStopped)
    }

    pub fn bus(&self) -> &ConnectionStateBus {
        &self.bus
    }

    /// Keep-alive text while a link is up, `None` otherwise.
    pub fn keep_alive(&self) -> watch::Receiver<Option<String>> {
        self.keep_alive.clone()
    }

    /// Ask the service loop to stop. Pending inputs are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.inputs.is_closed() && !self.cancel.is_cancelled()
    }
}

/// The service loop. Create with [`BleService::new`], then drive with
/// [`run`](BleService::run).
pub struct BleService<B> {
    backend: Arc<B>,
    store: Arc<dyn IdentityStore>,
    controller: Controller,
    bus: ConnectionStateBus,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    keep_alive: watch::Sender<Option<String>>,
    scan_timer: Option<JoinHandle<()>>,
    notifications: Option<mpsc::UnboundedSender<(HandleId, Bytes)>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl<B> std::fmt::Debug for BleService<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleService")
            .field("controller", &self.controller)
            .field("scan_timer", &self.scan_timer.is_some())
            .field("tracked_tasks", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl<B: BleBackend + 'static> BleService<B> {
    /// Create the service and its handle.
    ///
    /// The persisted identity is loaded from `store` here; a store that fails
    /// to load is treated as empty.
    pub fn new(
        backend: Arc<B>,
        store: Arc<dyn IdentityStore>,
        config: ServiceConfig,
    ) -> Result<(Self, BleHandle)> {
        config.validate()?;

        let identity = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load persisted peripheral, starting without one");
            PersistedPeripheralIdentity::default()
        });
        debug!(?identity, "Loaded persisted peripheral");

        let bus = ConnectionStateBus::with_action_capacity(config.action_capacity);
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (keep_alive, keep_alive_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let handle = BleHandle {
            inputs: inputs_tx.clone(),
            bus: bus.clone(),
            keep_alive: keep_alive_rx,
            cancel: cancel.clone(),
        };
        let service = Self {
            backend,
            store,
            controller: Controller::new(&config, identity),
            bus,
            inputs_tx,
            inputs_rx,
            keep_alive,
            scan_timer: None,
            notifications: None,
            tracker: TaskTracker::new(),
            cancel,
        };
        Ok((service, handle))
    }

    /// Read-only view of the controller, for inspection before `run`.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Run until [`BleHandle::shutdown`] is called.
    ///
    /// On exit the scan timer is cancelled, any open handle is closed and
    /// notifications already queued for decoding are drained.
    pub async fn run(mut self) -> Result<()> {
        self.backend
            .attach(EventSink::new(self.inputs_tx.clone()))
            .await?;
        self.notifications = Some(self.spawn_decoder());
        info!("BLE service started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("BLE service shutting down");
                    break;
                }
                input = self.inputs_rx.recv() => {
                    match input {
                        Some(input) => self.step(input).await,
                        None => break,
                    }
                }
            }
        }

        self.cancel_scan_timer();
        if let Some(session) = self.controller.connection().session() {
            self.backend.close(session.handle()).await;
        }
        self.notifications = None;
        self.tracker.close();
        self.tracker.wait().await;
        self.keep_alive.send_replace(None);
        info!("BLE service stopped");
        Ok(())
    }

    async fn step(&mut self, input: Input) {
        let effects = self.controller.handle(input);
        for effect in effects {
            self.execute(effect).await;
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Broadcast(status) => self.bus.publish(status),
            Effect::PublishScanResults(results) => self.bus.publish_scan_results(results),
            Effect::StartDiscovery { service } => {
                if let Err(e) = self.backend.start_discovery(service).await {
                    self.report_failure(None, GattOp::StartScan, e);
                }
            }
            Effect::StopDiscovery => {
                if let Err(e) = self.backend.stop_discovery().await {
                    self.report_failure(None, GattOp::StopScan, e);
                }
            }
            Effect::ScheduleScanTimeout { generation, after } => {
                self.schedule_scan_timeout(generation, after)
            }
            Effect::CancelScanTimeout => self.cancel_scan_timer(),
            Effect::OpenLink {
                handle,
                address,
                options,
            } => {
                if let Err(e) = self.backend.open_link(handle, address, options).await {
                    self.report_failure(Some(handle), GattOp::Connect, e);
                }
            }
            Effect::RequestMtu { handle, mtu } => {
                if let Err(e) = self.backend.request_mtu(handle, mtu).await {
                    self.report_failure(Some(handle), GattOp::RequestMtu, e);
                }
            }
            Effect::DiscoverServices { handle } => {
                if let Err(e) = self.backend.discover_services(handle).await {
                    self.report_failure(Some(handle), GattOp::DiscoverServices, e);
                }
            }
            Effect::EnableNotifications {
                handle,
                service,
                characteristic,
            } => {
                if let Err(e) = self
                    .backend
                    .enable_notifications(handle, service, characteristic)
                    .await
                {
                    self.report_failure(Some(handle), GattOp::EnableNotifications, e);
                }
            }
            Effect::WriteDescriptor {
                handle,
                service,
                characteristic,
                descriptor,
                value,
                mode,
            } => {
                if let Err(e) = self
                    .backend
                    .write_descriptor(handle, service, characteristic, descriptor, value, mode)
                    .await
                {
                    self.report_failure(Some(handle), GattOp::WriteDescriptor, e);
                }
            }
            Effect::Disconnect { handle } => {
                if let Err(e) = self.backend.disconnect(handle).await {
                    self.report_failure(Some(handle), GattOp::Disconnect, e);
                }
            }
            Effect::CloseHandle { handle } => self.backend.close(handle).await,
            Effect::PersistIdentity(identity) => {
                if let Err(e) = self.store.save(&identity) {
                    error!(error = %e, "Failed to persist peripheral identity");
                }
            }
            Effect::ClearIdentity => {
                if let Err(e) = self.store.clear() {
                    error!(error = %e, "Failed to clear peripheral identity");
                }
            }
            Effect::KeepAlive(KeepAlive::Start { text }) => {
                info!(%text, "Keep-alive started");
                self.keep_alive.send_replace(Some(text));
            }
            Effect::KeepAlive(KeepAlive::Stop) => {
                if self.keep_alive.send_replace(None).is_some() {
                    info!("Keep-alive stopped");
                }
            }
            Effect::DispatchNotification { handle, value } => self.dispatch(handle, value),
        }
    }

    /// Feed a failed backend call back to the controller.
    fn report_failure(&self, handle: Option<HandleId>, op: GattOp, error: Error) {
        warn!(%op, ?handle, %error, "Backend call failed");
        let event = BackendEvent::OperationFailed {
            handle,
            op,
            reason: error.to_string(),
        };
        // The receiver lives in `self`, so this only fails during teardown.
        let _ = self.inputs_tx.send(Input::Backend(event));
    }

    fn schedule_scan_timeout(&mut self, generation: u64, after: Duration) {
        self.cancel_scan_timer();
        let inputs = self.inputs_tx.clone();
        debug!(generation, after_secs = after.as_secs(), "Scheduling scan timeout");
        self.scan_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inputs.send(Input::Backend(BackendEvent::ScanTimeout { generation }));
        }));
    }

    fn cancel_scan_timer(&mut self) {
        if let Some(timer) = self.scan_timer.take() {
            timer.abort();
        }
    }

    /// Decode notifications off the loop, one at a time, in arrival order.
    fn spawn_decoder(&self) -> mpsc::UnboundedSender<(HandleId, Bytes)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(HandleId, Bytes)>();
        let bus = self.bus.clone();
        self.tracker.spawn(async move {
            while let Some((handle, value)) = rx.recv().await {
                match DomainEvent::decode(&value) {
                    Ok(event) => {
                        debug!(%handle, ?event, "Notification decoded");
                        bus.publish_action(event);
                    }
                    Err(e) => {
                        warn!(%handle, error = %e, bytes = value.len(), "Dropping malformed notification");
                    }
                }
            }
            debug!("Notification decoder stopped");
        });
        tx
    }

    fn dispatch(&self, handle: HandleId, value: Bytes) {
        let sent = match &self.notifications {
            Some(decoder) => decoder.send((handle, value)).is_ok(),
            None => false,
        };
        if !sent {
            debug!(%handle, "Decoder stopped, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentityStore;
    use crate::mock::MockBackend;

    #[tokio::test]
    async fn test_handle_reports_stopped_service() {
        let backend = Arc::new(MockBackend::new());
        let (service, handle) = BleService::new(
            backend,
            Arc::new(MemoryIdentityStore::new()),
            ServiceConfig::default(),
        )
        .unwrap();
        assert!(handle.is_running());
        drop(service);
        assert!(matches!(handle.start_scan(), Err(Error::ServiceStopped)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = BleService::new(
            Arc::new(MockBackend::new()),
            Arc::new(MemoryIdentityStore::new()),
            ServiceConfig::default().action_capacity(0),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_shutdown_ends_run() {
        let (service, handle) = BleService::new(
            Arc::new(MockBackend::new()),
            Arc::new(MemoryIdentityStore::new()),
            ServiceConfig::default(),
        )
        .unwrap();
        let task = tokio::spawn(service.run());
        handle.shutdown();
        assert!(task.await.unwrap().is_ok());
        assert!(!handle.is_running());
    }
}
