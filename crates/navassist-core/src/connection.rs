//! GATT session lifecycle for the single active peripheral.
//!
//! A session walks through
//!
//! ```text
//! Idle -> Connecting -> MtuNegotiating -> ServicesDiscovering
//!      -> NotificationEnabling -> Connected -> Disconnecting -> Idle
//! ```
//!
//! and any fatal failure drops it straight back to `Idle`. Each state names
//! the platform callback the session is waiting for; events that arrive in
//! the wrong state or for an old handle are logged and ignored.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use navassist_types::uuid::{
    ACTION_CHARACTERISTIC, CCCD, DEFAULT_MTU, ENABLE_NOTIFICATION_VALUE, NAVASSIST_SERVICE,
    REQUESTED_MTU,
};
use navassist_types::{PeripheralAddress, PersistedPeripheralIdentity};

use crate::effect::{Effect, KeepAlive};
use crate::error::ConnectionFailureReason;
use crate::gatt::{
    ConnectOptions, DescriptorWriteMode, GattOp, GattService, GattStatus, HandleId, LinkState,
    find_service,
};
use crate::name::DeviceNameResolver;
use crate::permissions::{DIRECT_DESCRIPTOR_WRITE_API_LEVEL, Environment};
use crate::scan::ScanManager;
use crate::status::{ConnectionStatus, PeripheralRef};

/// Name used when a failure cannot be tied to any known peripheral.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

/// Where a session is in the connect protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    MtuNegotiating,
    ServicesDiscovering,
    NotificationEnabling,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::MtuNegotiating => "negotiating MTU",
            SessionState::ServicesDiscovering => "discovering services",
            SessionState::NotificationEnabling => "enabling notifications",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// How a connect was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// User asked to connect.
    Manual,
    /// Reconnecting to the persisted peripheral on service start.
    Restore,
}

/// The single active or pending session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    address: PeripheralAddress,
    name: String,
    state: SessionState,
    handle: HandleId,
    auto_reconnect: bool,
    link_up: bool,
    mtu: u16,
}

impl ConnectionSession {
    pub fn address(&self) -> PeripheralAddress {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Whether this session is an auto-reconnect attempt that has not yet
    /// completed negotiation.
    pub fn auto_reconnect_pending(&self) -> bool {
        self.auto_reconnect
    }

    /// Negotiated MTU, or the default until negotiation completes.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    fn peripheral(&self) -> PeripheralRef {
        PeripheralRef {
            address: self.address,
            handle: self.handle,
        }
    }
}

/// State the session logic reads and updates outside the session itself.
pub(crate) struct SessionContext<'a> {
    pub env: &'a Environment,
    pub identity: &'a mut PersistedPeripheralIdentity,
    pub hardware_names: &'a HashMap<PeripheralAddress, String>,
}

impl SessionContext<'_> {
    /// Hardware name for `address`, if known and readable.
    fn hardware_name(&self, address: &PeripheralAddress) -> Option<String> {
        if !self.env.can_read_name() {
            return None;
        }
        self.hardware_names.get(address).cloned()
    }

    fn descriptor_write_mode(&self) -> DescriptorWriteMode {
        if self.env.api_level >= DIRECT_DESCRIPTOR_WRITE_API_LEVEL {
            DescriptorWriteMode::Direct
        } else {
            DescriptorWriteMode::Legacy
        }
    }
}

/// Owns the session and drives it through the connect protocol.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    session: Option<ConnectionSession>,
    next_handle: u64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.session.as_ref().map_or(SessionState::Idle, |s| s.state)
    }

    fn current(&self, handle: HandleId) -> Option<&ConnectionSession> {
        self.session.as_ref().filter(|s| s.handle == handle)
    }

    fn current_mut(&mut self, handle: HandleId) -> Option<&mut ConnectionSession> {
        self.session.as_mut().filter(|s| s.handle == handle)
    }

    fn allocate_handle(&mut self) -> HandleId {
        self.next_handle += 1;
        HandleId(self.next_handle)
    }

    /// Begin a session with `address`.
    pub(crate) fn connect(
        &mut self,
        ctx: &mut SessionContext<'_>,
        scan: &mut ScanManager,
        address: PeripheralAddress,
        mode: ConnectMode,
        effects: &mut Vec<Effect>,
    ) {
        let hardware = ctx.hardware_name(&address);
        let name = DeviceNameResolver::resolve(&address, hardware.as_deref(), ctx.identity);

        if !ctx.env.can_connect() {
            warn!(%address, api_level = ctx.env.api_level, "Connect permission not granted");
            effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed {
                name,
                reason: ConnectionFailureReason::PermissionDenied,
            }));
            return;
        }
        if !ctx.env.radio_enabled {
            warn!(%address, "Bluetooth is off, cannot connect");
            effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed {
                name,
                reason: ConnectionFailureReason::RadioOff,
            }));
            return;
        }

        if let Some(existing) = &self.session
            && existing.address == address
            && existing.state != SessionState::Disconnecting
        {
            debug!(%address, state = %existing.state, "Session already active for this peripheral");
            return;
        }

        self.supersede(effects);
        scan.stop(ctx.env, effects);

        let handle = self.allocate_handle();
        info!(%address, %handle, ?mode, %name, "Opening link");

        if mode == ConnectMode::Manual {
            effects.push(Effect::Broadcast(ConnectionStatus::AttemptingConnection {
                name: name.clone(),
            }));
        }
        effects.push(Effect::OpenLink {
            handle,
            address,
            options: ConnectOptions::session(),
        });

        self.session = Some(ConnectionSession {
            address,
            name,
            state: SessionState::Connecting,
            handle,
            auto_reconnect: mode == ConnectMode::Restore,
            link_up: false,
            mtu: DEFAULT_MTU,
        });
    }

    /// Reconnect to the persisted peripheral when no session exists.
    pub(crate) fn restore(
        &mut self,
        ctx: &mut SessionContext<'_>,
        scan: &mut ScanManager,
        effects: &mut Vec<Effect>,
    ) {
        if self.session.is_some() {
            debug!("Session active, skipping restore");
            return;
        }
        let Some(raw) = ctx
            .identity
            .address
            .clone()
            .filter(|a| !a.trim().is_empty())
        else {
            debug!("No persisted peripheral to restore");
            return;
        };

        let name = ctx
            .identity
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| raw.clone());
        info!(address = %raw, %name, "Restoring connection to last peripheral");
        effects.push(Effect::Broadcast(ConnectionStatus::AttemptingConnection {
            name: name.clone(),
        }));

        match raw.parse::<PeripheralAddress>() {
            Ok(address) => self.connect(ctx, scan, address, ConnectMode::Restore, effects),
            Err(e) => {
                warn!(error = %e, "Persisted peripheral address is invalid, clearing it");
                effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed {
                    name,
                    reason: ConnectionFailureReason::InvalidAddress,
                }));
                effects.push(Effect::ClearIdentity);
                *ctx.identity = PersistedPeripheralIdentity::default();
            }
        }
    }

    /// User-requested disconnect.
    pub(crate) fn disconnect(&mut self, ctx: &mut SessionContext<'_>, effects: &mut Vec<Effect>) {
        let Some(session) = self.session.as_mut() else {
            debug!("No session to disconnect");
            return;
        };

        if !ctx.env.can_connect() {
            warn!("Connect permission revoked, closing handle without protocol disconnect");
            if let Some(session) = self.session.take() {
                Self::release(&session, effects);
                effects.push(Effect::Broadcast(ConnectionStatus::Disconnected {
                    name: session.name,
                }));
            }
            return;
        }

        if session.state == SessionState::Disconnecting {
            debug!(handle = %session.handle, "Disconnect already in progress");
            return;
        }

        info!(address = %session.address, handle = %session.handle, "Disconnecting");
        session.state = SessionState::Disconnecting;
        effects.push(Effect::Disconnect {
            handle: session.handle,
        });
    }

    pub(crate) fn on_link_state(
        &mut self,
        ctx: &mut SessionContext<'_>,
        handle: HandleId,
        status: GattStatus,
        state: LinkState,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.current_mut(handle) else {
            debug!(%handle, ?state, "Ignoring link event for stale handle");
            return;
        };

        match (status.is_success(), state) {
            (true, LinkState::Connected) => {
                if session.state != SessionState::Connecting {
                    debug!(%handle, state = %session.state, "Ignoring repeated link-up");
                    return;
                }
                info!(address = %session.address, %handle, "Link established");
                session.state = SessionState::MtuNegotiating;
                session.link_up = true;
                effects.push(Effect::RequestMtu {
                    handle,
                    mtu: REQUESTED_MTU,
                });
                refresh_name(session, ctx, false, effects);
                effects.push(Effect::Broadcast(ConnectionStatus::Connected {
                    name: session.name.clone(),
                    peripheral: session.peripheral(),
                }));
                effects.push(Effect::KeepAlive(KeepAlive::Start {
                    text: format!("Connected to {}", session.name),
                }));
            }
            (true, LinkState::Disconnected) => {
                if let Some(session) = self.session.take() {
                    info!(address = %session.address, %handle, "Link closed");
                    effects.push(Effect::CloseHandle { handle });
                    effects.push(Effect::Broadcast(ConnectionStatus::Disconnected {
                        name: session.name,
                    }));
                    effects.push(Effect::KeepAlive(KeepAlive::Stop));
                }
            }
            (false, _) => {
                if let Some(session) = self.session.take() {
                    warn!(address = %session.address, %handle, %status, "Link error");
                    effects.push(Effect::CloseHandle { handle });
                    effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed {
                        name: session.name,
                        reason: ConnectionFailureReason::Gatt { status },
                    }));
                    effects.push(Effect::KeepAlive(KeepAlive::Stop));
                }
            }
        }
    }

    pub(crate) fn on_mtu_changed(
        &mut self,
        handle: HandleId,
        mtu: u16,
        status: GattStatus,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.current_mut(handle) else {
            debug!(%handle, "Ignoring MTU change for stale handle");
            return;
        };
        if session.state != SessionState::MtuNegotiating {
            debug!(%handle, state = %session.state, "Ignoring unexpected MTU change");
            return;
        }

        if status.is_success() {
            info!(%handle, mtu, "MTU negotiated");
            session.mtu = mtu;
        } else {
            warn!(%handle, %status, requested = REQUESTED_MTU, "MTU negotiation failed, using default");
            session.mtu = DEFAULT_MTU;
        }
        session.state = SessionState::ServicesDiscovering;
        effects.push(Effect::DiscoverServices { handle });
    }

    pub(crate) fn on_services_discovered(
        &mut self,
        ctx: &mut SessionContext<'_>,
        handle: HandleId,
        status: GattStatus,
        services: &[GattService],
        effects: &mut Vec<Effect>,
    ) {
        match self.current(handle).map(|s| s.state) {
            Some(SessionState::ServicesDiscovering) => {}
            Some(state) => {
                debug!(%handle, %state, "Ignoring unexpected service discovery result");
                return;
            }
            None => {
                debug!(%handle, "Ignoring service discovery for stale handle");
                return;
            }
        }

        if !status.is_success() {
            self.fail(
                ctx,
                ConnectionFailureReason::ServiceDiscoveryFailed { status },
                effects,
            );
            return;
        }

        let found = find_service(services, NAVASSIST_SERVICE)
            .ok_or(ConnectionFailureReason::ServiceNotFound)
            .and_then(|service| {
                service
                    .characteristic(ACTION_CHARACTERISTIC)
                    .ok_or(ConnectionFailureReason::CharacteristicNotFound)
            })
            .and_then(|characteristic| {
                if characteristic.has_descriptor(CCCD) {
                    Ok(())
                } else {
                    Err(ConnectionFailureReason::DescriptorNotFound)
                }
            });
        if let Err(reason) = found {
            debug!(%handle, services = services.len(), "Service tree incomplete");
            self.fail(ctx, reason, effects);
            return;
        }

        let mode = ctx.descriptor_write_mode();
        if let Some(session) = self.current_mut(handle) {
            info!(%handle, ?mode, "Services found, enabling notifications");
            session.state = SessionState::NotificationEnabling;
        }
        effects.push(Effect::EnableNotifications {
            handle,
            service: NAVASSIST_SERVICE,
            characteristic: ACTION_CHARACTERISTIC,
        });
        effects.push(Effect::WriteDescriptor {
            handle,
            service: NAVASSIST_SERVICE,
            characteristic: ACTION_CHARACTERISTIC,
            descriptor: CCCD,
            value: Bytes::from_static(&ENABLE_NOTIFICATION_VALUE),
            mode,
        });
    }

    pub(crate) fn on_descriptor_written(
        &mut self,
        ctx: &mut SessionContext<'_>,
        handle: Option<HandleId>,
        descriptor: Uuid,
        status: GattStatus,
        effects: &mut Vec<Effect>,
    ) {
        let Some(handle) = handle else {
            if status.is_success() {
                debug!(%descriptor, "Descriptor write without link reference");
                return;
            }
            warn!(%descriptor, %status, "Descriptor write failed without link reference");
            if self.session.is_some() {
                self.fail(
                    ctx,
                    ConnectionFailureReason::DescriptorWriteFailed { status },
                    effects,
                );
            } else {
                let identity = &*ctx.identity;
                let name = [&identity.name, &identity.address]
                    .into_iter()
                    .flatten()
                    .find(|n| !n.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
                effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed {
                    name,
                    reason: ConnectionFailureReason::DescriptorWriteFailed { status },
                }));
            }
            return;
        };

        if self.current(handle).is_none() {
            debug!(%handle, %descriptor, "Ignoring descriptor write for stale handle");
            return;
        }

        if !status.is_success() {
            self.fail(
                ctx,
                ConnectionFailureReason::DescriptorWriteFailed { status },
                effects,
            );
            return;
        }

        if descriptor != CCCD {
            debug!(%handle, %descriptor, "Descriptor written (not CCCD)");
            return;
        }

        let Some(session) = self.current_mut(handle) else {
            return;
        };
        if session.state != SessionState::NotificationEnabling {
            debug!(%handle, state = %session.state, "Ignoring repeated CCCD confirmation");
            return;
        }

        session.state = SessionState::Connected;
        refresh_name(session, ctx, true, effects);
        info!(address = %session.address, %handle, name = %session.name, "Notifications enabled, session ready");
        effects.push(Effect::Broadcast(ConnectionStatus::Connected {
            name: session.name.clone(),
            peripheral: session.peripheral(),
        }));
        if session.auto_reconnect {
            session.auto_reconnect = false;
            info!(address = %session.address, "Auto-reconnect complete");
        }
    }

    pub(crate) fn on_notification(
        &self,
        handle: HandleId,
        characteristic: Uuid,
        value: Bytes,
        effects: &mut Vec<Effect>,
    ) {
        if self.current(handle).is_none() {
            debug!(%handle, "Ignoring notification for stale handle");
            return;
        }
        if characteristic != ACTION_CHARACTERISTIC {
            debug!(%handle, %characteristic, "Ignoring notification from other characteristic");
            return;
        }
        effects.push(Effect::DispatchNotification { handle, value });
    }

    pub(crate) fn on_operation_failed(
        &mut self,
        ctx: &mut SessionContext<'_>,
        handle: Option<HandleId>,
        op: GattOp,
        reason: &str,
        effects: &mut Vec<Effect>,
    ) {
        let Some(handle) = handle.filter(|h| self.current(*h).is_some()) else {
            debug!(%op, ?handle, %reason, "Ignoring failure for stale or missing handle");
            return;
        };
        warn!(%op, %handle, %reason, "Backend operation failed");

        match op {
            GattOp::Connect => {
                if let Some(session) = self.session.take() {
                    Self::release(&session, effects);
                    effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed {
                        name: session.name,
                        reason: ConnectionFailureReason::transport(reason),
                    }));
                }
            }
            GattOp::RequestMtu => {
                self.on_mtu_changed(handle, DEFAULT_MTU, GattStatus::FAILURE, effects);
            }
            GattOp::DiscoverServices => {
                self.fail(ctx, ConnectionFailureReason::DiscoveryNotStarted, effects);
            }
            GattOp::EnableNotifications | GattOp::WriteDescriptor => {
                self.fail(ctx, ConnectionFailureReason::NotificationSetupFailed, effects);
            }
            GattOp::Disconnect => {
                if let Some(session) = self.session.take() {
                    Self::release(&session, effects);
                    effects.push(Effect::Broadcast(ConnectionStatus::Disconnected {
                        name: session.name,
                    }));
                }
            }
            GattOp::StartScan | GattOp::StopScan => {}
        }
    }

    /// The radio went off; the link cannot survive it.
    pub(crate) fn on_radio_off(&mut self, effects: &mut Vec<Effect>) {
        let Some(session) = self.session.take() else {
            return;
        };
        warn!(address = %session.address, "Bluetooth turned off, dropping session");
        Self::release(&session, effects);
        let status = if session.link_up {
            ConnectionStatus::Disconnected { name: session.name }
        } else {
            ConnectionStatus::ConnectionFailed {
                name: session.name,
                reason: ConnectionFailureReason::RadioOff,
            }
        };
        effects.push(Effect::Broadcast(status));
    }

    /// A hardware name for the session's peripheral became known.
    pub(crate) fn on_hardware_name(
        &mut self,
        ctx: &mut SessionContext<'_>,
        address: &PeripheralAddress,
        effects: &mut Vec<Effect>,
    ) {
        if let Some(session) = self.session.as_mut()
            && session.address == *address
            && session.link_up
        {
            refresh_name(session, ctx, false, effects);
        }
    }

    /// Fatal negotiation failure: tear down and report.
    fn fail(
        &mut self,
        ctx: &mut SessionContext<'_>,
        reason: ConnectionFailureReason,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.session.take() else {
            return;
        };
        let hardware = ctx.hardware_name(&session.address);
        let name =
            DeviceNameResolver::failure_name(&session.address, hardware.as_deref(), ctx.identity);
        warn!(
            address = %session.address,
            handle = %session.handle,
            state = %session.state,
            %reason,
            auto_reconnect = session.auto_reconnect,
            "Session failed"
        );
        Self::release(&session, effects);
        effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed { name, reason }));
    }

    /// Tear down the current session before starting another.
    fn supersede(&mut self, effects: &mut Vec<Effect>) {
        if let Some(old) = self.session.take() {
            info!(address = %old.address, handle = %old.handle, "Superseding previous session");
            Self::release(&old, effects);
            effects.push(Effect::Broadcast(ConnectionStatus::Disconnected { name: old.name }));
        }
    }

    /// Close the handle and, if the link had come up, stop keep-alive.
    fn release(session: &ConnectionSession, effects: &mut Vec<Effect>) {
        effects.push(Effect::CloseHandle {
            handle: session.handle,
        });
        if session.link_up {
            effects.push(Effect::KeepAlive(KeepAlive::Stop));
        }
    }
}

/// Re-resolve the session name and persist a changed hardware name.
fn refresh_name(
    session: &mut ConnectionSession,
    ctx: &mut SessionContext<'_>,
    remember_address: bool,
    effects: &mut Vec<Effect>,
) {
    let hardware = ctx.hardware_name(&session.address);
    session.name = DeviceNameResolver::resolve(&session.address, hardware.as_deref(), ctx.identity);

    if let Some(update) = DeviceNameResolver::reconcile(
        ctx.identity,
        &session.address,
        hardware.as_deref(),
        remember_address,
    ) {
        debug!(address = %session.address, name = ?update.name, "Persisting peripheral identity");
        *ctx.identity = update.clone();
        effects.push(Effect::PersistIdentity(update));
    }
}
