use crate::core::{RemotingError, Result};
use crate::protocol::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::remoting::reaper::ReaperSchedule;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remoting service configuration
///
/// Durations serialize as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotingConfig {
    /// Longest wait for a processor's admission slot
    #[serde(with = "millis")]
    pub admission_timeout: Duration,

    /// Delay before the first reaper scan
    #[serde(with = "millis")]
    pub reaper_initial_delay: Duration,

    /// Interval between reaper scans
    #[serde(with = "millis")]
    pub reaper_period: Duration,

    /// Extra age beyond a request's timeout before the reaper evicts it
    #[serde(with = "millis")]
    pub reaper_guard: Duration,

    /// Timeout for callers that do not pick their own
    #[serde(with = "millis")]
    pub default_timeout: Duration,

    /// Largest accepted frame on stream transports
    pub max_frame_size: usize,
}

impl RemotingConfig {
    pub fn new() -> Self {
        Self {
            admission_timeout: Duration::from_millis(3000),
            reaper_initial_delay: Duration::from_secs(5),
            reaper_period: Duration::from_secs(1),
            reaper_guard: Duration::from_millis(1000),
            default_timeout: Duration::from_millis(3000),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set admission timeout
    pub fn admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }

    /// Set reaper initial delay
    pub fn reaper_initial_delay(mut self, delay: Duration) -> Self {
        self.reaper_initial_delay = delay;
        self
    }

    /// Set reaper scan period
    pub fn reaper_period(mut self, period: Duration) -> Self {
        self.reaper_period = period;
        self
    }

    /// Set reaper guard window
    pub fn reaper_guard(mut self, guard: Duration) -> Self {
        self.reaper_guard = guard;
        self
    }

    /// Set default request timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Parse from JSON; missing fields keep their defaults
    ///
    /// # Examples
    ///
    /// ```
    /// use rpcmux::RemotingConfig;
    /// use std::time::Duration;
    ///
    /// let config = RemotingConfig::from_json(r#"{ "reaper_guard": 250 }"#).unwrap();
    /// assert_eq!(config.reaper_guard, Duration::from_millis(250));
    /// assert_eq!(config.reaper_period, Duration::from_secs(1));
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RemotingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RemotingError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.admission_timeout.is_zero() {
            return Err(RemotingError::Config(
                "admission_timeout must be > 0".to_string(),
            ));
        }

        if self.reaper_period.is_zero() {
            return Err(RemotingError::Config("reaper_period must be > 0".to_string()));
        }

        if self.default_timeout.is_zero() {
            return Err(RemotingError::Config(
                "default_timeout must be > 0".to_string(),
            ));
        }

        if self.max_frame_size == 0 {
            return Err(RemotingError::Config("max_frame_size must be > 0".to_string()));
        }

        Ok(())
    }

    pub(crate) fn reaper_schedule(&self) -> ReaperSchedule {
        ReaperSchedule {
            initial_delay: self.reaper_initial_delay,
            period: self.reaper_period,
            guard: self.reaper_guard,
        }
    }
}

impl Default for RemotingConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemotingConfig::default();
        assert_eq!(config.admission_timeout, Duration::from_millis(3000));
        assert_eq!(config.reaper_period, Duration::from_secs(1));
        assert_eq!(config.reaper_guard, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = RemotingConfig::new()
            .admission_timeout(Duration::from_millis(50))
            .reaper_initial_delay(Duration::ZERO)
            .reaper_period(Duration::from_millis(20))
            .reaper_guard(Duration::from_millis(100))
            .max_frame_size(1024);

        assert_eq!(config.admission_timeout, Duration::from_millis(50));
        assert_eq!(config.reaper_initial_delay, Duration::ZERO);
        assert_eq!(config.reaper_period, Duration::from_millis(20));
        assert_eq!(config.max_frame_size, 1024);
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let config = RemotingConfig::new().reaper_guard(Duration::from_millis(250));
        let json = config.to_json().unwrap();
        assert!(json.contains("\"reaper_guard\": 250"));
        assert_eq!(RemotingConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_huge_duration_saturates_in_json() {
        let config = RemotingConfig::new().default_timeout(Duration::MAX);
        let json = config.to_json().unwrap();
        assert!(json.contains(&format!("\"default_timeout\": {}", u64::MAX)));

        let loaded = RemotingConfig::from_json(&json).unwrap();
        assert_eq!(loaded.default_timeout, Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(RemotingConfig::from_json("{ \"reaper_period\": 0 }").is_err());
        assert!(RemotingConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_validate() {
        let invalid = RemotingConfig::new().admission_timeout(Duration::ZERO);
        assert!(invalid.validate().is_err());

        let invalid = RemotingConfig::new().max_frame_size(0);
        assert!(invalid.validate().is_err());

        let invalid = RemotingConfig::new().default_timeout(Duration::ZERO);
        assert!(invalid.validate().is_err());
    }
}
