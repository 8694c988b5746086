//! Transfer configuration.

use crate::error::{TransferError, TransferResult};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_HIGH_WATER, MAX_CHUNK_SIZE};
use std::time::Duration;

/// Transfer protocol configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Maximum bytes per chunk frame
    pub chunk_size: usize,
    /// Pause sending while more than this many bytes are buffered
    pub high_water: usize,
    /// Buffered-amount-low threshold that wakes a paused sender
    pub low_water: usize,
    /// Resume sending anyway after waiting this long
    pub drain_timeout: Duration,
    /// Re-check the buffered amount this often while paused
    pub drain_poll_interval: Duration,
    /// Accepted `file-meta` messages per window
    pub max_meta_per_window: usize,
    /// Rolling window for metadata rate limiting
    pub meta_window: Duration,
    /// Minimum spacing of progress events per direction
    pub progress_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water: DEFAULT_HIGH_WATER,
            low_water: DEFAULT_HIGH_WATER / 2,
            drain_timeout: Duration::from_secs(5),
            drain_poll_interval: Duration::from_millis(50),
            max_meta_per_window: 10,
            meta_window: Duration::from_secs(60),
            progress_interval: Duration::from_millis(16),
        }
    }
}

impl TransferConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` naming the first invalid field.
    pub fn validate(&self) -> TransferResult<()> {
        let invalid =
            |msg: String| -> TransferResult<()> { Err(TransferError::InvalidConfig(msg.into())) };

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return invalid(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE} bytes, got {}",
                self.chunk_size
            ));
        }
        if self.high_water < self.chunk_size {
            return invalid(format!(
                "high_water ({}) must be at least chunk_size ({})",
                self.high_water, self.chunk_size
            ));
        }
        if self.low_water > self.high_water {
            return invalid(format!(
                "low_water ({}) must not exceed high_water ({})",
                self.low_water, self.high_water
            ));
        }
        if self.max_meta_per_window == 0 {
            return invalid("max_meta_per_window must be non-zero".to_string());
        }
        for (name, value) in [
            ("drain_timeout", self.drain_timeout),
            ("drain_poll_interval", self.drain_poll_interval),
            ("meta_window", self.meta_window),
        ] {
            if value.is_zero() {
                return invalid(format!("{name} must be non-zero"));
            }
        }
        Ok(())
    }

    /// Configuration with a custom chunk size and the other defaults
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 16 * 1024);
        assert_eq!(config.high_water, 1024 * 1024);
        assert_eq!(config.low_water, 512 * 1024);
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert_eq!(config.max_meta_per_window, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(TransferConfig::with_chunk_size(0).validate().is_err());
        assert!(TransferConfig::with_chunk_size(MAX_CHUNK_SIZE + 1).validate().is_err());
        assert!(TransferConfig::with_chunk_size(MAX_CHUNK_SIZE).validate().is_ok());

        let config = TransferConfig {
            low_water: 2 * 1024 * 1024,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("low_water"));

        let config = TransferConfig {
            high_water: 1024,
            low_water: 512,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("high_water"));

        let config = TransferConfig {
            max_meta_per_window: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TransferError::InvalidConfig(_))));

        let config = TransferConfig {
            drain_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("drain_timeout"));
    }
}
