//! Utility module for codec-pump
//!
//! This module provides common utilities used throughout the crate:
//! - Error handling with a custom error type
//! - Configuration management
//! - The monotonic clock used for pacing

pub mod clock;
pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{Config, GeneralConfig, PumpConfig};
pub use error::{IntoPumpError, PumpError, Result};

/// Load the application configuration
///
/// Loads configuration from:
/// 1. Default values
/// 2. System configuration file
/// 3. User configuration file
/// 4. Environment variables
pub fn load_config() -> Result<Config> {
    Config::load()
}

/// Format a microsecond timestamp for display as "MM:SS.mmm"
pub fn format_pts(pts_us: i64) -> String {
    let sign = if pts_us < 0 { "-" } else { "" };
    let total_ms = pts_us.unsigned_abs() / 1_000;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let millis = total_ms % 1_000;

    format!("{}{:02}:{:02}.{:03}", sign, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pts() {
        assert_eq!(format_pts(0), "00:00.000");
        assert_eq!(format_pts(33_333), "00:00.033");
        assert_eq!(format_pts(61_500_000), "01:01.500");
        assert_eq!(format_pts(-40_000), "-00:00.040");
    }
}
