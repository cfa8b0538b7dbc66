//! The single mutation entry point of the BLE core.
//!
//! [`Controller::handle`] takes one [`Input`] and returns the effects to
//! perform, in order. It owns scan state, the session, the permission
//! environment and the cached peripheral identity, and performs no I/O, so
//! every transition can be tested by feeding inputs and inspecting effects.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use navassist_types::{PeripheralAddress, PeripheralDescriptor, PersistedPeripheralIdentity};

use crate::config::ServiceConfig;
use crate::connection::{ConnectMode, ConnectionManager, ConnectionSession, SessionContext, SessionState};
use crate::effect::Effect;
use crate::error::ConnectionFailureReason;
use crate::gatt::GattOp;
use crate::input::{BackendEvent, Command, Input};
use crate::permissions::Environment;
use crate::scan::ScanManager;
use crate::status::ConnectionStatus;

/// Owned state machine for scanning and the single session.
#[derive(Debug)]
pub struct Controller {
    env: Environment,
    identity: PersistedPeripheralIdentity,
    /// Hardware names seen during scans, by address.
    hardware_names: HashMap<PeripheralAddress, String>,
    scan: ScanManager,
    connection: ConnectionManager,
}

impl Controller {
    /// Create a controller with the identity loaded from storage.
    pub fn new(config: &ServiceConfig, identity: PersistedPeripheralIdentity) -> Self {
        Self {
            env: config.environment,
            identity,
            hardware_names: HashMap::new(),
            scan: ScanManager::new(config.scan_filter, config.scan_timeout),
            connection: ConnectionManager::new(),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Identity as last persisted by this controller.
    pub fn identity(&self) -> &PersistedPeripheralIdentity {
        &self.identity
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    pub fn scan_results(&self) -> &[PeripheralDescriptor] {
        self.scan.results()
    }

    pub fn session_state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Whether a restored session is still negotiating.
    pub fn auto_reconnect_pending(&self) -> bool {
        self.connection
            .session()
            .is_some_and(|s| s.auto_reconnect_pending())
    }

    /// Apply one input.
    pub fn handle(&mut self, input: impl Into<Input>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input.into() {
            Input::Command(command) => self.on_command(command, &mut effects),
            Input::Backend(event) => self.on_backend(event, &mut effects),
        }
        effects
    }

    fn on_command(&mut self, command: Command, effects: &mut Vec<Effect>) {
        debug!(%command, "Command");
        let Self {
            env,
            identity,
            hardware_names,
            scan,
            connection,
        } = self;
        let env: &Environment = env;
        let mut ctx = SessionContext {
            env,
            identity,
            hardware_names,
        };

        match command {
            Command::StartScan => {
                let was_scanning = scan.is_scanning();
                scan.start(env, effects);
                if !was_scanning && scan.is_scanning() {
                    // A fresh cycle rebuilds the cache; only the session's name survives.
                    let keep = connection.session().map(ConnectionSession::address);
                    hardware_names.retain(|address, _| Some(*address) == keep);
                }
            }
            Command::StopScan => scan.stop(env, effects),
            Command::Connect { address } => match address.parse::<PeripheralAddress>() {
                Ok(parsed) => {
                    connection.connect(&mut ctx, scan, parsed, ConnectMode::Manual, effects)
                }
                Err(e) => {
                    warn!(%address, error = %e, "Rejecting connect to malformed address");
                    effects.push(Effect::Broadcast(ConnectionStatus::ConnectionFailed {
                        name: address,
                        reason: ConnectionFailureReason::InvalidAddress,
                    }));
                }
            },
            Command::Disconnect => connection.disconnect(&mut ctx, effects),
            Command::RequestCurrentStatus => {
                debug!("Current status request is reserved, ignoring");
            }
            Command::Restore => connection.restore(&mut ctx, scan, effects),
        }
    }

    fn on_backend(&mut self, event: BackendEvent, effects: &mut Vec<Effect>) {
        // Permission and radio changes update the environment before any
        // borrowed context is built from it.
        match event {
            BackendEvent::PermissionsChanged { granted } => {
                info!(?granted, "Permissions changed");
                self.env.granted = granted;
                return;
            }
            BackendEvent::RadioStateChanged { enabled } => {
                if self.env.radio_enabled == enabled {
                    return;
                }
                info!(enabled, "Bluetooth radio state changed");
                self.env.radio_enabled = enabled;
                if !enabled {
                    self.scan.on_radio_off(effects);
                    self.connection.on_radio_off(effects);
                }
                return;
            }
            _ => {}
        }

        let Self {
            env,
            identity,
            hardware_names,
            scan,
            connection,
        } = self;
        let env: &Environment = env;

        match event {
            BackendEvent::ScanResult {
                address,
                hardware_name,
                advertised_name,
                rssi,
            } => {
                let hardware_name = hardware_name
                    .filter(|n| !n.trim().is_empty())
                    .filter(|_| env.can_read_name());
                let mut name_changed = false;
                if let Some(name) = &hardware_name
                    && hardware_names.get(&address) != Some(name)
                {
                    hardware_names.insert(address, name.clone());
                    name_changed = true;
                }

                let display = hardware_name
                    .or(advertised_name)
                    .filter(|n| !n.trim().is_empty());
                scan.on_result(address, display, rssi, effects);

                if name_changed {
                    let mut ctx = SessionContext {
                        env,
                        identity,
                        hardware_names,
                    };
                    connection.on_hardware_name(&mut ctx, &address, effects);
                }
            }
            BackendEvent::ScanTimeout { generation } => scan.on_timeout(generation, env, effects),
            BackendEvent::LinkStateChanged {
                handle,
                status,
                state,
            } => {
                let mut ctx = SessionContext {
                    env,
                    identity,
                    hardware_names,
                };
                connection.on_link_state(&mut ctx, handle, status, state, effects);
            }
            BackendEvent::MtuChanged {
                handle,
                mtu,
                status,
            } => connection.on_mtu_changed(handle, mtu, status, effects),
            BackendEvent::ServicesDiscovered {
                handle,
                status,
                services,
            } => {
                let mut ctx = SessionContext {
                    env,
                    identity,
                    hardware_names,
                };
                connection.on_services_discovered(&mut ctx, handle, status, &services, effects);
            }
            BackendEvent::DescriptorWritten {
                handle,
                descriptor,
                status,
            } => {
                let mut ctx = SessionContext {
                    env,
                    identity,
                    hardware_names,
                };
                connection.on_descriptor_written(&mut ctx, handle, descriptor, status, effects);
            }
            BackendEvent::CharacteristicChanged {
                handle,
                characteristic,
                value,
            } => connection.on_notification(handle, characteristic, value, effects),
            BackendEvent::OperationFailed { handle, op, reason } => match op {
                GattOp::StartScan => scan.on_start_failed(&reason, effects),
                GattOp::StopScan => scan.on_stop_failed(&reason, effects),
                _ => {
                    let mut ctx = SessionContext {
                        env,
                        identity,
                        hardware_names,
                    };
                    connection.on_operation_failed(&mut ctx, handle, op, &reason, effects);
                }
            },
            BackendEvent::PermissionsChanged { .. } | BackendEvent::RadioStateChanged { .. } => {}
        }
    }
}
