//! Runtime configuration for the BLE service and its backend.

use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use navassist_types::uuid::NAVASSIST_SERVICE;

use crate::bus::DEFAULT_ACTION_CAPACITY;
use crate::error::{Error, Result};
use crate::permissions::Environment;
use crate::scan::DEFAULT_SCAN_TIMEOUT;

/// Default timeout for establishing a link.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for descriptor writes and subscriptions.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time spent looking for a peripheral the adapter has not seen yet.
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts the btleplug backend applies to each platform call.
///
/// The controller has no connect timeout of its own; these bound how long a
/// single platform operation may take before it is reported as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for establishing a link.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after the link is up.
    pub discovery_timeout: Duration,
    /// Timeout for descriptor writes.
    pub write_timeout: Duration,
    /// How long to scan for a peripheral that is not yet known to the adapter.
    pub lookup_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts for tests and fast-failing tools.
    pub fn quick() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            lookup_timeout: Duration::from_secs(3),
        }
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connection_timeout", self.connection_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("write_timeout", self.write_timeout),
            ("lookup_timeout", self.lookup_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Backoff used when the platform is asked to keep a link alive.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Maximum number of attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomised either way, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl ReconnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry until cancelled.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            ..Default::default()
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another retry is allowed after `attempt` retries.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Backoff delay for `attempt` (zero-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let max = self.max_delay.as_millis() as f64;
        Duration::from_millis(millis.min(max) as u64)
    }

    /// Backoff delay for `attempt` with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::rng().random::<f64>() * 2.0 - 1.0;
        let scaled = base.as_secs_f64() * (1.0 + spread * self.jitter);
        Duration::from_secs_f64(scaled.max(0.0)).min(self.max_delay)
    }

    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    /// - `jitter` is within `0.0..=1.0`
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::invalid_config("jitter must be between 0.0 and 1.0"));
        }
        Ok(())
    }
}

/// Configuration for [`BleService`](crate::service::BleService).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service UUID discovery is restricted to.
    pub scan_filter: Uuid,
    /// Time after which a scan stops on its own.
    pub scan_timeout: Duration,
    /// Capacity of the decoded action stream.
    pub action_capacity: usize,
    /// Platform facts at start-up. Permission and radio changes arrive as
    /// backend events afterwards.
    pub environment: Environment,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scan_filter: NAVASSIST_SERVICE,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            action_capacity: DEFAULT_ACTION_CAPACITY,
            environment: Environment::unrestricted(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    #[must_use]
    pub fn scan_filter(mut self, service: Uuid) -> Self {
        self.scan_filter = service;
        self
    }

    #[must_use]
    pub fn action_capacity(mut self, capacity: usize) -> Self {
        self.action_capacity = capacity;
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_timeout.is_zero() {
            return Err(Error::invalid_config("scan_timeout must be > 0"));
        }
        if self.action_capacity == 0 {
            return Err(Error::invalid_config("action_capacity must be > 0"));
        }
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn options() -> impl Strategy<Value = ReconnectOptions> {
        (1u64..5_000, 0u64..60_000, 1.0f64..4.0, 0.0f64..=1.0).prop_map(
            |(initial, extra, multiplier, jitter)| {
                ReconnectOptions::new()
                    .initial_delay(Duration::from_millis(initial))
                    .max_delay(Duration::from_millis(initial + extra))
                    .backoff_multiplier(multiplier)
                    .jitter(jitter)
            },
        )
    }

    proptest! {
        /// Backoff never shrinks between attempts and never exceeds the cap.
        #[test]
        fn backoff_is_monotonic_and_capped(opts in options(), attempt in 0u32..64) {
            prop_assert!(opts.validate().is_ok());
            let current = opts.base_delay(attempt);
            prop_assert!(current <= opts.base_delay(attempt + 1));
            prop_assert!(current <= opts.max_delay);
        }

        /// Jitter keeps the delay within the cap.
        #[test]
        fn jittered_delay_is_capped(opts in options(), attempt in 0u32..64) {
            prop_assert!(opts.delay_for_attempt(attempt) <= opts.max_delay);
        }
    }
}
