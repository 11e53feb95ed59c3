//! Configuration types for the dlna-renderer crate
//!
//! This module defines the settings that control a [`MediaRenderer`]:
//! subscription leases, the callback server address, duration polling and
//! the volume step size.
//!
//! [`MediaRenderer`]: crate::MediaRenderer

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::RendererError;

/// How `get_duration` keeps polling while the renderer reports `0:00:00`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    /// Default: 1 second
    pub interval: Duration,

    /// Maximum number of attempts, the first one included. `None` is unbounded.
    /// Default: 30
    pub max_attempts: Option<u32>,

    /// Wall-clock budget measured from the first attempt. `None` is unbounded.
    /// Default: None
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: Some(30),
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Keep polling forever. Renderers that never report a duration will
    /// hold the request open indefinitely.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            max_elapsed: None,
            ..Default::default()
        }
    }

    /// Report the first answer, even the `0:00:00` placeholder.
    pub fn none() -> Self {
        Self {
            max_attempts: Some(1),
            ..Default::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    /// after `elapsed` time.
    pub fn allows_retry(&self, attempt: u32, elapsed: Duration) -> bool {
        let attempts_left = self.max_attempts.map_or(true, |max| attempt < max);
        let time_left = self
            .max_elapsed
            .map_or(true, |max| elapsed + self.interval <= max);
        attempts_left && time_left
    }
}

/// Configuration for a [`MediaRenderer`](crate::MediaRenderer)
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Lease requested in `TIMEOUT: Second-n`; renewals fire every half lease
    /// Default: 300 seconds
    pub subscription_timeout: Duration,

    /// Address the callback server binds to
    /// Default: 0.0.0.0
    pub callback_bind_addr: IpAddr,

    /// Port the callback server binds to; 0 picks an ephemeral port
    /// Default: 0
    pub callback_port: u16,

    /// Address advertised in CALLBACK headers. Detected toward the device
    /// when unset.
    /// Default: None
    pub callback_host: Option<IpAddr>,

    /// Polling policy for `get_duration`
    pub duration_retry: RetryPolicy,

    /// Step applied by `volume_up`/`volume_down`
    /// Default: 0.01
    pub volume_step: f32,

    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Default: 10 seconds
    pub read_timeout: Duration,

    /// Worker threads of the runtime a renderer creates when it is not built
    /// inside one
    /// Default: 2
    pub worker_threads: usize,

    /// `USER-AGENT` for GENA requests. Defaults to the crate name and version.
    pub user_agent: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            subscription_timeout: Duration::from_secs(300),
            callback_bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            callback_port: 0,
            callback_host: None,
            duration_retry: RetryPolicy::default(),
            volume_step: 0.01,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            worker_threads: 2,
            user_agent: None,
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse volume steps of 0.05, for renderers whose volume scale is
    /// too fine to notice a single percent.
    pub fn coarse_volume() -> Self {
        Self {
            volume_step: 0.05,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), RendererError> {
        if self.subscription_timeout.as_secs() < 2 {
            return Err(RendererError::Configuration(
                "Subscription timeout must be at least 2 seconds".to_string(),
            ));
        }

        if !(self.volume_step > 0.0 && self.volume_step <= 1.0) {
            return Err(RendererError::Configuration(
                "Volume step must be in (0, 1]".to_string(),
            ));
        }

        if self.duration_retry.interval.is_zero() {
            return Err(RendererError::Configuration(
                "Duration retry interval must be greater than 0".to_string(),
            ));
        }

        if self.duration_retry.max_attempts == Some(0) {
            return Err(RendererError::Configuration(
                "Duration retry needs at least one attempt".to_string(),
            ));
        }

        if self.worker_threads == 0 {
            return Err(RendererError::Configuration(
                "Worker threads must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    pub fn with_callback_host(mut self, host: IpAddr) -> Self {
        self.callback_host = Some(host);
        self
    }

    pub fn with_callback_bind(mut self, addr: IpAddr, port: u16) -> Self {
        self.callback_bind_addr = addr;
        self.callback_port = port;
        self
    }

    pub fn with_duration_retry(mut self, policy: RetryPolicy) -> Self {
        self.duration_retry = policy;
        self
    }

    pub fn with_volume_step(mut self, step: f32) -> Self {
        self.volume_step = step;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Lease in whole seconds, as sent on the wire.
    pub(crate) fn lease_seconds(&self) -> u32 {
        u32::try_from(self.subscription_timeout.as_secs()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.subscription_timeout, Duration::from_secs(300));
        assert_eq!(config.callback_port, 0);
        assert_eq!(config.volume_step, 0.01);
        assert_eq!(config.duration_retry.interval, Duration::from_secs(1));
        assert_eq!(config.lease_seconds(), 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let zero_step = RendererConfig::default().with_volume_step(0.0);
        assert!(zero_step.validate().is_err());

        let big_step = RendererConfig::default().with_volume_step(1.5);
        assert!(big_step.validate().is_err());

        let nan_step = RendererConfig::default().with_volume_step(f32::NAN);
        assert!(nan_step.validate().is_err());

        let short_lease = RendererConfig::default().with_subscription_timeout(Duration::from_secs(1));
        assert!(short_lease.validate().is_err());

        let no_workers = RendererConfig {
            worker_threads: 0,
            ..Default::default()
        };
        assert!(no_workers.validate().is_err());

        let no_attempts = RendererConfig::default()
            .with_duration_retry(RetryPolicy::default().with_max_attempts(Some(0)));
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn test_config_presets() {
        let coarse = RendererConfig::coarse_volume();
        assert_eq!(coarse.volume_step, 0.05);
        assert!(coarse.validate().is_ok());

        let unbounded = RetryPolicy::unbounded();
        assert!(unbounded.allows_retry(10_000, Duration::from_secs(86_400)));

        let none = RetryPolicy::none();
        assert!(!none.allows_retry(1, Duration::ZERO));
    }

    #[test]
    fn test_retry_policy_limits() {
        let policy = RetryPolicy::default().with_max_attempts(Some(3));
        assert!(policy.allows_retry(1, Duration::ZERO));
        assert!(policy.allows_retry(2, Duration::ZERO));
        assert!(!policy.allows_retry(3, Duration::ZERO));

        let budget = RetryPolicy::default()
            .with_max_attempts(None)
            .with_max_elapsed(Some(Duration::from_secs(5)));
        assert!(budget.allows_retry(1, Duration::from_secs(4)));
        assert!(!budget.allows_retry(1, Duration::from_millis(4_500)));
    }
}
