//! Pool configuration.
//!
//! # Environment Variables
//!
//! - `FORKPOOL_CONCURRENCY` - Maximum simultaneous processes
//! - `FORKPOOL_TIMEOUT` - Seconds before a running process is killed (fractions allowed)
//! - `FORKPOOL_POLL_INTERVAL` - Microseconds between liveness checks
//! - `FORKPOOL_BOOTSTRAP` - Bootstrap file loaded by every child
//! - `FORKPOOL_BINARY` - Executable spawned for every child
//! - `FORKPOOL_SYNC` - Run every task in-process (`1`/`true`)

use crate::error::{PoolError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default maximum number of simultaneous processes.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Default wall-clock budget per process.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between liveness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(50_000);

/// Configuration for a [`Pool`](crate::Pool).
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of processes running at once.
    pub concurrency: usize,
    /// Wall-clock budget after which a running process is killed.
    pub timeout: Duration,
    /// Interval between liveness and timeout checks in [`Pool::wait`](crate::Pool::wait).
    pub poll_interval: Duration,
    /// Bootstrap file override (None = search the default candidates).
    pub bootstrap: Option<PathBuf>,
    /// Child executable override (None = the current executable).
    pub binary: Option<PathBuf>,
    /// Run every task inline in the calling process.
    pub force_synchronous: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            bootstrap: None,
            binary: None,
            force_synchronous: false,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the timeout in (possibly fractional) seconds.
    ///
    /// Negative or non-finite values are ignored.
    pub fn with_timeout_secs(self, secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => self.with_timeout(timeout),
            Err(_) => self,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_bootstrap(mut self, path: impl Into<PathBuf>) -> Self {
        self.bootstrap = Some(path.into());
        self
    }

    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    pub fn with_force_synchronous(mut self, enabled: bool) -> Self {
        self.force_synchronous = enabled;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(concurrency) = env_parse::<usize>("FORKPOOL_CONCURRENCY") {
            self.concurrency = concurrency;
        }
        if let Some(secs) = env_parse::<f64>("FORKPOOL_TIMEOUT") {
            self = self.with_timeout_secs(secs);
        }
        if let Some(micros) = env_parse::<u64>("FORKPOOL_POLL_INTERVAL") {
            self.poll_interval = Duration::from_micros(micros);
        }
        if let Ok(path) = std::env::var("FORKPOOL_BOOTSTRAP") {
            self.bootstrap = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("FORKPOOL_BINARY") {
            self.binary = Some(PathBuf::from(path));
        }
        if let Ok(value) = std::env::var("FORKPOOL_SYNC") {
            self.force_synchronous = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    /// Reject settings the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PoolError::InvalidInput(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PoolError::InvalidInput(
                "poll interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Whether tasks run in child processes.
    pub fn is_out_of_process(&self) -> bool {
        cfg!(unix) && !self.force_synchronous
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_micros(50_000));
        assert!(config.bootstrap.is_none());
        assert!(config.binary.is_none());
        assert!(!config.force_synchronous);
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new()
            .with_concurrency(2)
            .with_timeout_secs(1.5)
            .with_poll_interval(Duration::from_millis(5))
            .with_bootstrap("/tmp/forkpool.env")
            .with_binary("/usr/bin/true")
            .with_force_synchronous(true);

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.bootstrap, Some(PathBuf::from("/tmp/forkpool.env")));
        assert_eq!(config.binary, Some(PathBuf::from("/usr/bin/true")));
        assert!(!config.is_out_of_process());
    }

    #[test]
    fn test_negative_timeout_ignored() {
        let config = PoolConfig::new().with_timeout_secs(-1.0);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_validate() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(matches!(
            PoolConfig::new().with_concurrency(0).validate(),
            Err(PoolError::InvalidInput(_))
        ));
        assert!(matches!(
            PoolConfig::new().with_poll_interval(Duration::ZERO).validate(),
            Err(PoolError::InvalidInput(_))
        ));
    }
}
