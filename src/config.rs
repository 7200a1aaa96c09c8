//! Driver configuration parameters
//!
//! All tunable parameters for the host-side link driver. Values can be
//! overridden at construction time or loaded from JSON (e.g. a board
//! bring-up profile).

use serde::{Deserialize, Serialize};

/// Core driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    // --- Buffer pool ---
    /// Number of buffers in the fixed-capacity pool
    pub pool_capacity: usize,
    /// Byte capacity of each pool buffer
    pub buffer_size: usize,
    /// Default wait for a free buffer (milliseconds)
    pub alloc_timeout_ms: u64,

    // --- Command timing ---
    /// Default command response deadline (milliseconds)
    pub command_timeout_ms: u64,
    /// Bus thread poll tick when no deadline is nearer (milliseconds)
    pub bus_tick_ms: u64,

    // --- Fault tolerance ---
    /// Consecutive malformed frames tolerated before the link is
    /// declared down
    pub malformed_frame_limit: u32,

    // --- Boot handshake ---
    /// Interval between handshake register polls (milliseconds)
    pub handshake_poll_ms: u64,
    /// Maximum handshake register polls before giving up
    pub handshake_poll_limit: u32,
    /// Firmware image chunk size for `push_image` (bytes)
    pub image_chunk_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            // Buffer pool
            pool_capacity: 8,
            buffer_size: 1600, // one full MTU-sized frame plus header
            alloc_timeout_ms: 500,

            // Command timing
            command_timeout_ms: 5000,
            bus_tick_ms: 1, // matches the transport poll cadence
            // Fault tolerance
            malformed_frame_limit: 8,

            // Boot handshake
            handshake_poll_ms: 10,
            handshake_poll_limit: 500, // 5 s worst case
            image_chunk_size: 1024,
        }
    }
}

impl DriverConfig {
    /// Load a configuration from a JSON document.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        serde_json::from_str(json).map_err(|_| crate::error::Error::InvalidState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = DriverConfig::default();
        assert!(c.pool_capacity > 0);
        assert!(c.buffer_size >= 64);
        assert!(c.command_timeout_ms > c.bus_tick_ms);
        assert!(c.handshake_poll_limit > 0);
        assert!(c.image_chunk_size > 0 && c.image_chunk_size <= c.buffer_size);
    }

    #[test]
    fn serde_roundtrip() {
        let c = DriverConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2 = DriverConfig::from_json(&json).unwrap();
        assert_eq!(c.pool_capacity, c2.pool_capacity);
        assert_eq!(c.command_timeout_ms, c2.command_timeout_ms);
        assert_eq!(c.image_chunk_size, c2.image_chunk_size);
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(DriverConfig::from_json("not json").is_err());
        assert!(DriverConfig::from_json("{}").is_err());
    }

    #[test]
    fn timing_ratios_make_sense() {
        let c = DriverConfig::default();
        assert!(
            c.bus_tick_ms < c.alloc_timeout_ms,
            "bus tick must resolve deadlines well inside the alloc wait"
        );
        assert!(
            u64::from(c.handshake_poll_limit) * c.handshake_poll_ms >= 1000,
            "handshake bound should allow at least a second of boot time"
        );
    }
}
