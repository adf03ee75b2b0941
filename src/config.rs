//! Configuration read from the environment once at startup

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

fn default_worker_host() -> String {
    "0.0.0.0".into()
}

fn default_worker_port() -> u16 {
    5556
}

fn default_manager_host() -> String {
    "0.0.0.0".into()
}

fn default_manager_port() -> u16 {
    5555
}

const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 15;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 15;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;

/// Main configuration
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Worker role settings
    pub worker: WorkerConfiguration,

    /// Manager role settings
    pub manager: ManagerConfiguration,

    /// Background loop cadences
    pub intervals: IntervalConfiguration,
}

/// Worker bind settings
#[derive(Debug, Clone)]
pub struct WorkerConfiguration {
    pub host: String,
    pub port: u16,
}

impl WorkerConfiguration {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid worker bind address {}:{}", self.host, self.port))
    }

    /// Address the local manager can reach this worker on
    pub fn local_addr(&self) -> String {
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.host
        };
        format!("{}:{}", host, self.port)
    }
}

/// Manager bind settings and the worker fleet it places onto
#[derive(Debug, Clone)]
pub struct ManagerConfiguration {
    pub host: String,
    pub port: u16,

    /// Worker addresses as host:port, in placement order
    pub workers: Vec<String>,
}

impl ManagerConfiguration {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid manager bind address {}:{}", self.host, self.port))
    }
}

/// Sleep intervals for the worker drain, stats sampling, and manager
/// reconciliation loops
#[derive(Debug, Clone)]
pub struct IntervalConfiguration {
    pub drain: Duration,
    pub stats: Duration,
    pub reconcile: Duration,
}

impl Configuration {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an injectable variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let worker = WorkerConfiguration {
            host: lookup("FLOTILLA_WORKER_HOST").unwrap_or_else(default_worker_host),
            port: parse_or("FLOTILLA_WORKER_PORT", &lookup, default_worker_port())?,
        };

        let manager = ManagerConfiguration {
            host: lookup("FLOTILLA_MANAGER_HOST").unwrap_or_else(default_manager_host),
            port: parse_or("FLOTILLA_MANAGER_PORT", &lookup, default_manager_port())?,
            workers: lookup("FLOTILLA_WORKERS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let intervals = IntervalConfiguration {
            drain: Duration::from_secs(parse_or(
                "FLOTILLA_DRAIN_INTERVAL",
                &lookup,
                DEFAULT_DRAIN_INTERVAL_SECS,
            )?),
            stats: Duration::from_secs(parse_or(
                "FLOTILLA_STATS_INTERVAL",
                &lookup,
                DEFAULT_STATS_INTERVAL_SECS,
            )?),
            reconcile: Duration::from_secs(parse_or(
                "FLOTILLA_RECONCILE_INTERVAL",
                &lookup,
                DEFAULT_RECONCILE_INTERVAL_SECS,
            )?),
        };

        Ok(Self {
            worker,
            manager,
            intervals,
        })
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {}: {}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::from_lookup(|_| None).unwrap();

        assert_eq!(config.worker.port, 5556);
        assert_eq!(config.manager.port, 5555);
        assert!(config.manager.workers.is_empty());
        assert_eq!(config.intervals.drain, Duration::from_secs(15));
        assert_eq!(config.intervals.stats, Duration::from_secs(15));
        assert_eq!(config.intervals.reconcile, Duration::from_secs(10));
    }

    #[test]
    fn test_worker_list_parsing() {
        let lookup = lookup_from(&[("FLOTILLA_WORKERS", "w1:5556, w2:5556 ,,w3:5556")]);
        let config = Configuration::from_lookup(lookup).unwrap();

        assert_eq!(
            config.manager.workers,
            vec!["w1:5556", "w2:5556", "w3:5556"]
        );
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let lookup = lookup_from(&[("FLOTILLA_WORKER_PORT", "not-a-port")]);
        assert!(Configuration::from_lookup(lookup).is_err());
    }

    #[test]
    fn test_bind_and_local_addresses() {
        let lookup = lookup_from(&[
            ("FLOTILLA_WORKER_HOST", "0.0.0.0"),
            ("FLOTILLA_WORKER_PORT", "6001"),
        ]);
        let config = Configuration::from_lookup(lookup).unwrap();

        assert_eq!(
            config.worker.bind_addr().unwrap().to_string(),
            "0.0.0.0:6001"
        );
        assert_eq!(config.worker.local_addr(), "127.0.0.1:6001");
    }

    #[test]
    fn test_interval_override() {
        let lookup = lookup_from(&[("FLOTILLA_RECONCILE_INTERVAL", "2")]);
        let config = Configuration::from_lookup(lookup).unwrap();
        assert_eq!(config.intervals.reconcile, Duration::from_secs(2));
    }
}
