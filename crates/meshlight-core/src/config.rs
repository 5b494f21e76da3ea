//! Per-node configuration

use serde::{Deserialize, Serialize};

use crate::color::{ColorLimits, TemperatureEncoding, MAX_MIRED, MIN_MIRED};
use crate::model::UnicastAddress;

/// Configuration of a single light node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// Unicast address of the node's primary element
    pub unicast: UnicastAddress,
    /// Lower bound of the supported color temperature range, in mireds
    #[serde(default = "default_mireds_min")]
    pub mireds_min: u32,
    /// Upper bound of the supported color temperature range, in mireds
    #[serde(default = "default_mireds_max")]
    pub mireds_max: u32,
    /// Consecutive failed polls before the node is reported offline
    #[serde(default = "default_availability_failures")]
    pub availability_failures: u32,
    /// Seconds between availability polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Timeout for the composition data fetch, in seconds
    #[serde(default = "default_composition_timeout")]
    pub composition_timeout_secs: u64,
    /// Bind models without verification when composition data is unavailable
    #[serde(default = "default_true")]
    pub permissive_binding: bool,
    /// Encoding used for temperatures set from mireds
    #[serde(default)]
    pub temperature_encoding: TemperatureEncoding,
}

fn default_mireds_min() -> u32 {
    MIN_MIRED
}

fn default_mireds_max() -> u32 {
    MAX_MIRED
}

fn default_availability_failures() -> u32 {
    3
}

fn default_poll_interval() -> u64 {
    60
}

fn default_composition_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl NodeConfig {
    /// Configuration with defaults for everything but the address
    pub fn new(unicast: UnicastAddress) -> Self {
        Self {
            name: None,
            unicast,
            mireds_min: default_mireds_min(),
            mireds_max: default_mireds_max(),
            availability_failures: default_availability_failures(),
            poll_interval_secs: default_poll_interval(),
            composition_timeout_secs: default_composition_timeout(),
            permissive_binding: true,
            temperature_encoding: TemperatureEncoding::default(),
        }
    }

    /// Display name, falling back to the address
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("light-{}", self.unicast))
    }

    pub fn color_limits(&self) -> ColorLimits {
        ColorLimits::new(self.mireds_min, self.mireds_max)
    }

    pub fn availability_threshold(&self) -> u32 {
        self.availability_failures.max(1)
    }
}
