//! Scan state: discovery start/stop, deduplication and the auto-stop timer.
//!
//! [`ScanManager`] is plain state. Every operation appends the effects it
//! needs to an output vector; nothing here touches the radio directly.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use navassist_types::{PeripheralAddress, PeripheralDescriptor};

use crate::effect::Effect;
use crate::permissions::Environment;
use crate::status::{ConnectionStatus, ScanFailure};

/// Default time after which a scan stops on its own.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// Discovery state for one scan cycle at a time.
#[derive(Debug, Clone)]
pub struct ScanManager {
    filter: Uuid,
    timeout: Duration,
    scanning: bool,
    /// Incremented per started scan; timers carry it so stale ones are ignored.
    generation: u64,
    /// First-seen order.
    results: Vec<PeripheralDescriptor>,
}

impl ScanManager {
    pub fn new(filter: Uuid, timeout: Duration) -> Self {
        Self {
            filter,
            timeout,
            scanning: false,
            generation: 0,
            results: Vec::new(),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn results(&self) -> &[PeripheralDescriptor] {
        &self.results
    }

    pub fn filter(&self) -> Uuid {
        self.filter
    }

    /// Start a scan cycle. A no-op while a scan is running.
    pub fn start(&mut self, env: &Environment, effects: &mut Vec<Effect>) {
        if self.scanning {
            debug!("Scan already in progress");
            return;
        }
        if !env.can_scan() {
            warn!(api_level = env.api_level, "Scan permission not granted");
            effects.push(Effect::Broadcast(ConnectionStatus::ScanFailed {
                code: ScanFailure::PermissionDenied,
            }));
            return;
        }
        if !env.radio_enabled {
            warn!("Bluetooth is off, cannot scan");
            effects.push(Effect::Broadcast(ConnectionStatus::ScanFailed {
                code: ScanFailure::RadioOff,
            }));
            return;
        }

        self.generation += 1;
        self.scanning = true;
        self.results.clear();
        info!(generation = self.generation, service = %self.filter, "Starting BLE scan");

        effects.push(Effect::PublishScanResults(Vec::new()));
        effects.push(Effect::Broadcast(ConnectionStatus::ScanStarted));
        effects.push(Effect::StartDiscovery {
            service: self.filter,
        });
        effects.push(Effect::ScheduleScanTimeout {
            generation: self.generation,
            after: self.timeout,
        });
    }

    /// Stop the current scan. Safe to call with no scan running.
    pub fn stop(&mut self, env: &Environment, effects: &mut Vec<Effect>) {
        effects.push(Effect::CancelScanTimeout);

        if !env.can_scan() {
            // Cannot touch the scanner; mark it stopped so results are dropped
            if self.scanning {
                warn!("Scan permission revoked, marking scan stopped");
                self.scanning = false;
                effects.push(Effect::Broadcast(ConnectionStatus::ScanFailed {
                    code: ScanFailure::PermissionDenied,
                }));
                effects.push(Effect::Broadcast(ConnectionStatus::ScanStopped));
            }
            return;
        }

        if self.scanning {
            info!(generation = self.generation, found = self.results.len(), "Stopping BLE scan");
            self.scanning = false;
            effects.push(Effect::StopDiscovery);
            effects.push(Effect::Broadcast(ConnectionStatus::ScanStopped));
        }
    }

    /// Auto-stop timer fired.
    pub fn on_timeout(&mut self, generation: u64, env: &Environment, effects: &mut Vec<Effect>) {
        if !self.scanning || generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale scan timeout");
            return;
        }
        info!(timeout_secs = self.timeout.as_secs(), "Scan timed out");
        self.stop(env, effects);
    }

    /// A peripheral was seen. `name` is the already-resolved display name.
    pub fn on_result(
        &mut self,
        address: PeripheralAddress,
        name: Option<String>,
        rssi: Option<i16>,
        effects: &mut Vec<Effect>,
    ) {
        if !self.scanning {
            debug!(%address, "Ignoring scan result while not scanning");
            return;
        }

        let changed = match self.results.iter_mut().find(|d| d.address == address) {
            Some(existing) => {
                let mut changed = false;
                if name.is_some() && existing.name != name {
                    existing.name = name;
                    changed = true;
                }
                if rssi.is_some() && existing.rssi != rssi {
                    existing.rssi = rssi;
                    changed = true;
                }
                changed
            }
            None => {
                debug!(%address, ?name, ?rssi, "New peripheral");
                self.results.push(PeripheralDescriptor {
                    address,
                    name,
                    rssi,
                });
                true
            }
        };

        if changed {
            effects.push(Effect::PublishScanResults(self.results.clone()));
        }
    }

    /// The backend could not start discovery.
    pub fn on_start_failed(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        warn!(%reason, "Failed to start scan");
        self.scanning = false;
        effects.push(Effect::CancelScanTimeout);
        effects.push(Effect::Broadcast(ConnectionStatus::ScanFailed {
            code: ScanFailure::InternalError,
        }));
    }

    /// The backend could not stop discovery. Scanning is already marked off.
    pub fn on_stop_failed(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        warn!(%reason, "Failed to stop scan");
        self.scanning = false;
        effects.push(Effect::Broadcast(ConnectionStatus::ScanFailed {
            code: ScanFailure::InternalError,
        }));
    }

    /// The radio went off. Ends a running scan.
    pub fn on_radio_off(&mut self, effects: &mut Vec<Effect>) {
        if self.scanning {
            warn!("Bluetooth turned off during scan");
            self.scanning = false;
            effects.push(Effect::CancelScanTimeout);
            effects.push(Effect::Broadcast(ConnectionStatus::ScanFailed {
                code: ScanFailure::RadioOff,
            }));
        }
    }
}
