//! Configuration for the tracker server, loaded from CLI/env in `bin/trackerd.rs`.
//!
//! Mirrors the teacher's per-component `Default`-impl config structs
//! (`NetworkConfig`/`ConnectionConfig` in `network/config.rs`, `ServerConfig`
//! in `service/config.rs`): plain data, no magic, one struct per concern,
//! composed into a single top-level config the binary entrypoint builds from
//! `clap`.

use std::time::Duration;

use tracker_core::ClusterConfig;

/// Bind address and per-RPC timeout for the `Cache.ContentTracker` transport.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub remote_construction_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7420,
            remote_construction_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Batching queue tuning (§5): events accumulate into batches of
/// `event_batch_size`, or flush after `event_nagle_interval`, whichever
/// comes first.
#[derive(Debug, Clone, Copy)]
pub struct BatchingConfig {
    pub event_batch_size: usize,
    pub event_nagle_interval: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            event_batch_size: 256,
            event_nagle_interval: Duration::from_millis(100),
        }
    }
}

/// Distributed tracker routing policy (§4.6): minimum reachable-location
/// threshold before escalating past the ring leader, and retry/backoff for
/// transient hop failures.
#[derive(Debug, Clone, Copy)]
pub struct DistributedTrackerConfig {
    pub k: usize,
    pub max_retry_attempts: u32,
    pub initial_backoff: Duration,
    pub max_remote_wait: Duration,
}

impl Default for DistributedTrackerConfig {
    fn default() -> Self {
        Self {
            k: 1,
            max_retry_attempts: 4,
            initial_backoff: Duration::from_millis(50),
            max_remote_wait: Duration::from_secs(5),
        }
    }
}

/// Number of stripes in the local content tracker's mutex-striped map.
pub const DEFAULT_LOCAL_TRACKER_STRIPES: usize = 64;

/// The full tracker server configuration, one field group per component.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub node_id: String,
    pub cluster: ClusterConfig,
    pub network: NetworkConfig,
    pub batching: BatchingConfig,
    pub distributed: DistributedTrackerConfig,
    pub heartbeat_interval: Duration,
    pub local_tracker_stripes: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            cluster: ClusterConfig::default(),
            network: NetworkConfig::default(),
            batching: BatchingConfig::default(),
            distributed: DistributedTrackerConfig::default(),
            heartbeat_interval: Duration::from_millis(10_000),
            local_tracker_stripes: DEFAULT_LOCAL_TRACKER_STRIPES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.port, 7420);
        assert_eq!(config.remote_construction_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn tracker_config_defaults_compose_subconfigs() {
        let config = TrackerConfig::default();
        assert_eq!(config.local_tracker_stripes, DEFAULT_LOCAL_TRACKER_STRIPES);
        assert_eq!(config.distributed.k, 1);
        assert_eq!(config.batching.event_batch_size, 256);
    }
}
