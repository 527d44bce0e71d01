//! Runtime configuration (spec §6's option table), loaded from a JSON file
//! found via the `RMQ_PROXY_HOME` environment variable, falling back to the
//! `rmq.proxy.home` system property equivalent (a second environment
//! variable, since Rust has no JVM-style system properties).

use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Local bypasses the network for a co-located broker; Cluster dials out
/// through a pluggable endpoint converter. See [`crate::transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyMode {
    Local,
    Cluster,
}

/// The proxy's full configuration surface, field-for-field with spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub proxy_mode: ProxyMode,
    pub grpc_server_port: u16,
    pub namesrv_addr: String,
    #[serde(default = "default_route_cache_ttl_millis")]
    pub route_cache_ttl_millis: u32,
    #[serde(default = "default_long_polling_reserve_time_in_millis")]
    pub long_polling_reserve_time_in_millis: u32,
    #[serde(default = "default_transaction_heartbeat_period_second")]
    pub transaction_heartbeat_period_second: u32,
    #[serde(default = "default_transaction_heartbeat_batch_num")]
    pub transaction_heartbeat_batch_num: u32,
    #[serde(default = "default_transaction_heartbeat_thread_pool_nums")]
    pub transaction_heartbeat_thread_pool_nums: u32,
    #[serde(default = "default_transaction_heartbeat_thread_pool_queue_capacity")]
    pub transaction_heartbeat_thread_pool_queue_capacity: u32,
    #[serde(default = "default_grpc_proxy_relay_request_timeout_in_seconds")]
    pub grpc_proxy_relay_request_timeout_in_seconds: u32,
    #[serde(default = "default_grpc_client_channel_expire_seconds")]
    pub grpc_client_channel_expire_seconds: u32,
    #[serde(default = "default_message_delay_level")]
    pub message_delay_level: String,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
}

fn default_route_cache_ttl_millis() -> u32 {
    30_000
}
fn default_long_polling_reserve_time_in_millis() -> u32 {
    100
}
fn default_transaction_heartbeat_period_second() -> u32 {
    30
}
fn default_transaction_heartbeat_batch_num() -> u32 {
    50
}
fn default_transaction_heartbeat_thread_pool_nums() -> u32 {
    4
}
fn default_transaction_heartbeat_thread_pool_queue_capacity() -> u32 {
    10_000
}
fn default_grpc_proxy_relay_request_timeout_in_seconds() -> u32 {
    3
}
fn default_grpc_client_channel_expire_seconds() -> u32 {
    120
}
fn default_message_delay_level() -> String {
    "1s 5s 10s 30s 1m 2m 3m 4m 5m 6m 7m 8m 9m 10m 20m 30m 1h 2h".to_string()
}
fn default_max_delivery_attempts() -> u32 {
    16
}

impl ProxyConfig {
    /// Parses the retry-level ladder in `messageDelayLevel` into durations,
    /// index 0 being level 1. Used by [`crate::retry_policy`].
    pub fn delay_levels(&self) -> Result<Vec<std::time::Duration>, ProxyError> {
        self.message_delay_level
            .split_whitespace()
            .map(parse_delay_level)
            .collect()
    }

    /// Resolve the config file path: `$RMQ_PROXY_HOME/conf/rmq-proxy.json`,
    /// falling back to `$RMQ_PROXY_HOME_PROPERTY` for environments that set
    /// a property rather than an environment variable.
    pub fn resolve_path() -> Result<PathBuf, ProxyError> {
        let home = std::env::var("RMQ_PROXY_HOME")
            .or_else(|_| std::env::var("RMQ_PROXY_HOME_PROPERTY"))
            .map_err(|_| {
                ProxyError::client_input(
                    "RMQ_PROXY_HOME is not set and no rmq.proxy.home property fallback was found",
                )
            })?;
        Ok(Path::new(&home).join("conf").join("rmq-proxy.json"))
    }

    /// Load and parse the config file at the resolved path.
    pub fn load() -> Result<Self, ProxyError> {
        let path = Self::resolve_path()?;
        Self::load_from(&path)
    }

    /// Load and parse a config file at an explicit path, bypassing
    /// `RMQ_PROXY_HOME` resolution. Used by tests and the `--config` CLI
    /// override.
    pub fn load_from(path: &Path) -> Result<Self, ProxyError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::internal(format!("reading config file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ProxyError::internal(format!("parsing config file {}: {e}", path.display())))
    }
}

fn parse_delay_level(level: &str) -> Result<std::time::Duration, ProxyError> {
    let (num, unit) = level.split_at(level.len().saturating_sub(1));
    let num: u64 = num
        .parse()
        .map_err(|_| ProxyError::internal(format!("invalid delay level: {level}")))?;
    let secs = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        _ => {
            return Err(ProxyError::internal(format!(
                "unrecognized delay level unit in: {level}"
            )))
        }
    };
    Ok(std::time::Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "proxyMode": "CLUSTER",
            "grpcServerPort": 8081,
            "namesrvAddr": "10.0.0.1:9876"
        }"#
    }

    #[test]
    fn defaults_fill_in_unspecified_fields() {
        let cfg: ProxyConfig = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(cfg.proxy_mode, ProxyMode::Cluster);
        assert_eq!(cfg.grpc_server_port, 8081);
        assert_eq!(cfg.route_cache_ttl_millis, 30_000);
        assert_eq!(cfg.max_delivery_attempts, 16);
    }

    #[test]
    fn delay_levels_parse_mixed_units() {
        let cfg: ProxyConfig = serde_json::from_str(sample_json()).unwrap();
        let levels = cfg.delay_levels().unwrap();
        assert_eq!(levels[0], std::time::Duration::from_secs(1));
        assert_eq!(levels[4], std::time::Duration::from_secs(60));
        assert_eq!(levels.last().copied().unwrap(), std::time::Duration::from_secs(2 * 3600));
    }

    #[test]
    fn resolve_path_requires_env_var() {
        std::env::remove_var("RMQ_PROXY_HOME");
        std::env::remove_var("RMQ_PROXY_HOME_PROPERTY");
        assert!(ProxyConfig::resolve_path().is_err());
    }
}
