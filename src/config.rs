// Timing, physical constants and per-node runtime configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Control loop frequency; bytes are timestamped per tick so this must stay
// well under the inter-byte gap
pub const LOOP_HZ: u64 = 1000;

// Bytes further apart than this belong to different transmissions
pub const INTER_BYTE_GAP_MS: u64 = 3;

// Serial link defaults
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD: u32 = 19_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(10);

// Distance between an edge colour sensor and the center sensor (mm)
pub const SENSOR_SPACING_MM: u16 = 61;

// Angles at or above this need a steering correction instead of a re-approach
pub const HIGH_ANGLE_DEG: i16 = 45;

// Angles at or below this are treated as square to the line
pub const SQUARE_ANGLE_DEG: i16 = 5;

// Background drift tolerance before differential steering kicks in
pub const STRAIGHT_ANGLE_DEG: i16 = 2;

// Rotation used for steering corrections
pub const STEERING_CORRECTION_DEG: u16 = 5;

// Colour readings older than this are stale
pub const COLOR_FRESHNESS_MS: u64 = 2_000;

// Wall-follow step must advance within this window
pub const WALL_FOLLOW_TIMEOUT_MS: u64 = 5_000;

// An edge latch with no commit is dropped after this long
pub const LATCH_TIMEOUT_MS: u64 = 3_000;

// Minimum spacing between repeated SOS packets
pub const SOS_RESEND_MS: u64 = 500;

// Periodic status summary
pub const STATUS_INTERVAL: Duration = Duration::from_secs(10);

// Default motor calibration broadcast (mm/s)
pub const DEFAULT_BASE_SPEED: u8 = 10;

/// Tunable settings, loaded from JSON with every field optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub inter_byte_gap_ms: u64,
    pub sensor_spacing_mm: u16,
    pub high_angle_deg: i16,
    pub color_freshness_ms: u64,
    pub wall_follow_timeout_ms: u64,
    pub latch_timeout_ms: u64,
    pub sos_resend_ms: u64,
    /// Reject out-of-order packets instead of only logging them
    pub strict_sequence: bool,
    /// Transmit as soon as it is this node's turn (no manual trigger)
    pub auto_send: bool,
    /// Speed the motor node advertises during calibration
    pub base_speed: u8,
    /// 0 means half the base speed
    pub correction_speed: u8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inter_byte_gap_ms: INTER_BYTE_GAP_MS,
            sensor_spacing_mm: SENSOR_SPACING_MM,
            high_angle_deg: HIGH_ANGLE_DEG,
            color_freshness_ms: COLOR_FRESHNESS_MS,
            wall_follow_timeout_ms: WALL_FOLLOW_TIMEOUT_MS,
            latch_timeout_ms: LATCH_TIMEOUT_MS,
            sos_resend_ms: SOS_RESEND_MS,
            strict_sequence: false,
            auto_send: true,
            base_speed: DEFAULT_BASE_SPEED,
            correction_speed: 0,
        }
    }
}

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor_spacing_mm == 0 {
            return Err(ConfigError::Invalid("sensor_spacing_mm must be > 0".into()));
        }
        if !(SQUARE_ANGLE_DEG..90).contains(&self.high_angle_deg) {
            return Err(ConfigError::Invalid(format!(
                "high_angle_deg must be in {}..90",
                SQUARE_ANGLE_DEG
            )));
        }
        if self.base_speed == 0 {
            return Err(ConfigError::Invalid("base_speed must be > 0".into()));
        }
        Ok(())
    }

    /// Angle reported when an edge detection is committed without a measurement
    pub fn inferred_angle_deg(&self) -> i16 {
        self.high_angle_deg + 1
    }
}
