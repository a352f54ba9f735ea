//! Session timing and transfer configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-chunk write timeout
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default finalize timeout, covering manifestation and device reboot
pub const DEFAULT_FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Transfer size used when a device publishes no DFU functional descriptor
pub const DEFAULT_FALLBACK_TRANSFER_SIZE: u16 = 1024;

/// Configuration for a [`DeviceSession`](crate::DeviceSession)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound for a single chunk write, including status polling
    #[serde(with = "duration_ms")]
    pub chunk_timeout: Duration,

    /// Upper bound for the finalize handshake
    #[serde(with = "duration_ms")]
    pub finalize_timeout: Duration,

    /// Chunk size when the device does not report `wTransferSize`
    pub fallback_transfer_size: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            finalize_timeout: DEFAULT_FINALIZE_TIMEOUT,
            fallback_transfer_size: DEFAULT_FALLBACK_TRANSFER_SIZE,
        }
    }
}

impl SessionConfig {
    /// Set the per-chunk timeout
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Set the finalize timeout
    pub fn with_finalize_timeout(mut self, timeout: Duration) -> Self {
        self.finalize_timeout = timeout;
        self
    }

    /// Set the fallback transfer size
    pub fn with_fallback_transfer_size(mut self, size: u16) -> Self {
        self.fallback_transfer_size = size;
        self
    }

    /// Check that the configuration can drive a session
    ///
    /// # Errors
    ///
    /// Returns a description of the first unusable field.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_timeout.is_zero() {
            return Err("chunk_timeout must be greater than zero".to_string());
        }
        if self.finalize_timeout.is_zero() {
            return Err("finalize_timeout must be greater than zero".to_string());
        }
        if self.fallback_transfer_size == 0 {
            return Err("fallback_transfer_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::millis(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = SessionConfig::default().with_chunk_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SessionConfig::default().with_finalize_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SessionConfig::default().with_fallback_transfer_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_uses_milliseconds() -> Result<(), serde_json::Error> {
        let config = SessionConfig::default().with_chunk_timeout(Duration::from_millis(250));
        let json = serde_json::to_value(&config)?;
        assert_eq!(json["chunk_timeout"], 250);
        assert_eq!(json["finalize_timeout"], 60_000);

        let partial: SessionConfig = serde_json::from_str(r#"{"finalize_timeout": 1500}"#)?;
        assert_eq!(partial.finalize_timeout, Duration::from_millis(1500));
        assert_eq!(partial.chunk_timeout, DEFAULT_CHUNK_TIMEOUT);
        Ok(())
    }
}
