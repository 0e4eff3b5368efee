use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SurgeError};
use crate::protocol::Endpoint;

/// Everything the source role needs for one run. Loaded from a JSON file
/// when given one, otherwise the defaults below apply.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Single fixed target of the feeding stage.
    pub feed_target: Endpoint,
    /// How many fire-and-forget messages the feeding stage emits.
    pub feed_message_count: usize,
    /// Messages emitted per validation cycle.
    pub max_considered_messages_expected: usize,
    /// Spacing between consecutive emissions, in milliseconds.
    pub arrival_delay_ms: u64,
    /// One validation cycle per entry: the active service count to request.
    pub service_counts: Vec<usize>,
    /// Balancers the validation stage round-robins across.
    pub balancers: Vec<Endpoint>,
    /// Bound on one emission's round trip, in milliseconds.
    pub round_trip_timeout_ms: u64,
    /// Bound on joining each emission at the end of a cycle, in milliseconds.
    pub join_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> SourceConfig {
        SourceConfig {
            feed_target: Endpoint::new("loadbalance1", 2000),
            feed_message_count: 10,
            max_considered_messages_expected: 10,
            arrival_delay_ms: 1000,
            service_counts: vec![1, 2],
            balancers: vec![
                Endpoint::new("loadbalance1", 2000),
                Endpoint::new("loadbalance2", 3000),
            ],
            round_trip_timeout_ms: crate::protocol::ROUND_TRIP_TIMEOUT.as_millis() as u64,
            join_timeout_ms: crate::protocol::JOIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SourceConfig {
    pub fn load(path: &Path) -> Result<SourceConfig> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| SurgeError::Config(format!("{}: {err}", path.display())))?;
        let config: SourceConfig = serde_json::from_str(&raw)
            .map_err(|err| SurgeError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.balancers.is_empty() {
            return Err(SurgeError::Config("no balancer addresses given".into()));
        }
        if self.service_counts.is_empty() {
            return Err(SurgeError::Config("no service counts given".into()));
        }
        Ok(())
    }
}
