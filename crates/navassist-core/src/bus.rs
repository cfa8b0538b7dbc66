//! Process-wide fan-out of connection, scan and data events.
//!
//! Each status category has its own latest-value channel: a new subscriber
//! sees the most recent value immediately and every update after it, and
//! nothing older. The aggregate [`ConnectionStateBus::status`] channel carries
//! the latest [`ConnectionStatus`] of any category.
//!
//! Decoded actions go to both the `data_received` latest-value channel and a
//! broadcast stream. The broadcast stream is what action handlers consume, so
//! each decoded event reaches each subscriber exactly once.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};

use navassist_types::{DomainEvent, PeripheralDescriptor};

use crate::error::ConnectionFailureReason;
use crate::status::{ConnectionStatus, PeripheralRef, ScanFailure};

/// Default capacity of the action broadcast stream.
pub const DEFAULT_ACTION_CAPACITY: usize = 64;

/// A successful connection as seen on the `connection_successful` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedPeripheral {
    pub name: String,
    pub peripheral: PeripheralRef,
}

/// A failed connection as seen on the `connection_failed` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionFailure {
    pub name: String,
    pub reason: ConnectionFailureReason,
}

struct Channels {
    scan_started: watch::Sender<Option<OffsetDateTime>>,
    scan_results: watch::Sender<Vec<PeripheralDescriptor>>,
    scan_failed: watch::Sender<Option<ScanFailure>>,
    scan_stopped: watch::Sender<Option<OffsetDateTime>>,
    attempting_connection: watch::Sender<Option<String>>,
    connection_successful: watch::Sender<Option<ConnectedPeripheral>>,
    connection_failed: watch::Sender<Option<ConnectionFailure>>,
    device_disconnected: watch::Sender<Option<String>>,
    data_received: watch::Sender<Option<DomainEvent>>,
    status: watch::Sender<ConnectionStatus>,
    actions: broadcast::Sender<DomainEvent>,
}

/// Latest-value channels shared between the BLE core and its consumers.
///
/// Cloning is cheap; all clones publish to and subscribe from the same
/// channels.
#[derive(Clone)]
pub struct ConnectionStateBus {
    channels: Arc<Channels>,
}

impl std::fmt::Debug for ConnectionStateBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateBus")
            .field("status", &*self.channels.status.borrow())
            .field("action_receivers", &self.channels.actions.receiver_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionStateBus {
    pub fn new() -> Self {
        Self::with_action_capacity(DEFAULT_ACTION_CAPACITY)
    }

    /// Create a bus whose action stream buffers up to `capacity` events per
    /// slow subscriber before it starts lagging.
    pub fn with_action_capacity(capacity: usize) -> Self {
        let (actions, _) = broadcast::channel(capacity.max(1));
        Self {
            channels: Arc::new(Channels {
                scan_started: watch::Sender::new(None),
                scan_results: watch::Sender::new(Vec::new()),
                scan_failed: watch::Sender::new(None),
                scan_stopped: watch::Sender::new(None),
                attempting_connection: watch::Sender::new(None),
                connection_successful: watch::Sender::new(None),
                connection_failed: watch::Sender::new(None),
                device_disconnected: watch::Sender::new(None),
                data_received: watch::Sender::new(None),
                status: watch::Sender::new(ConnectionStatus::Idle),
                actions,
            }),
        }
    }

    /// Publish a status to its category channel and the aggregate channel.
    pub fn publish(&self, status: ConnectionStatus) {
        let c = &self.channels;
        match &status {
            ConnectionStatus::Idle => {}
            ConnectionStatus::ScanStarted => {
                c.scan_started.send_replace(Some(OffsetDateTime::now_utc()));
            }
            ConnectionStatus::ScanStopped => {
                c.scan_stopped.send_replace(Some(OffsetDateTime::now_utc()));
            }
            ConnectionStatus::ScanFailed { code } => {
                c.scan_failed.send_replace(Some(*code));
            }
            ConnectionStatus::AttemptingConnection { name } => {
                c.attempting_connection.send_replace(Some(name.clone()));
            }
            ConnectionStatus::Connected { name, peripheral } => {
                c.connection_successful
                    .send_replace(Some(ConnectedPeripheral {
                        name: name.clone(),
                        peripheral: *peripheral,
                    }));
            }
            ConnectionStatus::ConnectionFailed { name, reason } => {
                c.connection_failed.send_replace(Some(ConnectionFailure {
                    name: name.clone(),
                    reason: reason.clone(),
                }));
            }
            ConnectionStatus::Disconnected { name } => {
                c.device_disconnected.send_replace(Some(name.clone()));
            }
        }
        c.status.send_replace(status);
    }

    /// Publish the full, ordered scan result list.
    pub fn publish_scan_results(&self, results: Vec<PeripheralDescriptor>) {
        self.channels.scan_results.send_replace(results);
    }

    /// Publish a decoded action.
    pub fn publish_action(&self, event: DomainEvent) {
        self.channels.data_received.send_replace(Some(event.clone()));
        // No receivers is fine
        let _ = self.channels.actions.send(event);
    }

    // --- Subscriptions ---

    pub fn scan_started(&self) -> watch::Receiver<Option<OffsetDateTime>> {
        self.channels.scan_started.subscribe()
    }

    pub fn scan_results(&self) -> watch::Receiver<Vec<PeripheralDescriptor>> {
        self.channels.scan_results.subscribe()
    }

    pub fn scan_failed(&self) -> watch::Receiver<Option<ScanFailure>> {
        self.channels.scan_failed.subscribe()
    }

    pub fn scan_stopped(&self) -> watch::Receiver<Option<OffsetDateTime>> {
        self.channels.scan_stopped.subscribe()
    }

    pub fn attempting_connection(&self) -> watch::Receiver<Option<String>> {
        self.channels.attempting_connection.subscribe()
    }

    pub fn connection_successful(&self) -> watch::Receiver<Option<ConnectedPeripheral>> {
        self.channels.connection_successful.subscribe()
    }

    pub fn connection_failed(&self) -> watch::Receiver<Option<ConnectionFailure>> {
        self.channels.connection_failed.subscribe()
    }

    pub fn device_disconnected(&self) -> watch::Receiver<Option<String>> {
        self.channels.device_disconnected.subscribe()
    }

    pub fn data_received(&self) -> watch::Receiver<Option<DomainEvent>> {
        self.channels.data_received.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.channels.status.subscribe()
    }

    /// Subscribe to decoded actions. Each event is delivered once per receiver.
    pub fn actions(&self) -> broadcast::Receiver<DomainEvent> {
        self.channels.actions.subscribe()
    }

    /// The most recent status of any category.
    pub fn current_status(&self) -> ConnectionStatus {
        self.channels.status.borrow().clone()
    }

    /// The most recent scan result list.
    pub fn current_scan_results(&self) -> Vec<PeripheralDescriptor> {
        self.channels.scan_results.borrow().clone()
    }
}

impl Default for ConnectionStateBus {
    fn default() -> Self {
        Self::new()
    }
}
