//! Configuration for the pipeline and the socket player.
//!
//! Both configs are plain serde structs with sensible defaults; they can be
//! built in code or loaded from YAML text.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

fn default_message_rate() -> f64 {
    60.0
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_suppression_window_ms() -> u64 {
    2_000
}

fn default_max_frame_bytes() -> usize {
    // Bounds frame growth when consumers stall for extended periods.
    1_500_000_000
}

/// Pipeline-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum snapshot delivery rate in frames per second. The frame
    /// budget paced by the pipeline listener is `1 / message_rate`.
    pub message_rate: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig { message_rate: default_message_rate() }
    }
}

impl PipelineConfig {
    /// Target wall-clock budget for processing one frame.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.message_rate.max(1.0))
    }

    /// Load a config from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| PipelineError::Config { details: e.to_string() })
    }
}

/// Socket player configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketPlayerConfig {
    /// Display name for the source, typically its URL.
    pub name: String,

    /// Delay before a reconnection attempt after the transport closes.
    pub reconnect_delay_ms: u64,

    /// How long a connection attempt may hang before it is abandoned and
    /// retried.
    pub connect_timeout_ms: u64,

    /// How long a canceled subscription id keeps suppressing
    /// unknown-subscription problems for messages already in flight.
    pub suppression_window_ms: u64,

    /// Upper bound on bytes buffered in the not-yet-emitted frame.
    pub max_frame_bytes: usize,
}

impl Default for SocketPlayerConfig {
    fn default() -> Self {
        SocketPlayerConfig {
            name: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            suppression_window_ms: default_suppression_window_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl SocketPlayerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }

    /// Load a config from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| PipelineError::Config { details: e.to_string() })
    }
}
