//! Command interface settings.

use std::time::Duration;

use recorder_core::constants::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_COMMAND_SIZE, DEFAULT_POLL_INTERVAL, SERIAL_READ_POLL,
};
use serde::{Deserialize, Serialize};

/// Timing and validation knobs for one [`CommandInterface`](crate::CommandInterface).
///
/// Durations are (de)serialized as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Response deadline when the caller does not pass one.
    #[serde(with = "millis")]
    pub timeout: Duration,

    /// Delay between RESPONSE file polls.
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// Longest single serial read inside the wait loop.
    #[serde(with = "millis")]
    pub read_poll: Duration,

    /// Largest encoded command sent to the device; `None` disables the check.
    pub max_command_size: Option<usize>,

    /// Strip frame checksums without verifying them.
    pub ignore_crc: bool,

    /// Device lock acquisition limit; `None` waits forever.
    #[serde(with = "opt_millis")]
    pub lock_timeout: Option<Duration>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_poll: SERIAL_READ_POLL,
            max_command_size: Some(DEFAULT_MAX_COMMAND_SIZE),
            ignore_crc: false,
            lock_timeout: None,
        }
    }
}

impl CommandConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_read_poll(mut self, interval: Duration) -> Self {
        self.read_poll = interval;
        self
    }

    #[must_use]
    pub fn with_max_command_size(mut self, size: Option<usize>) -> Self {
        self.max_command_size = size;
        self
    }

    #[must_use]
    pub fn with_ignore_crc(mut self, ignore: bool) -> Self {
        self.ignore_crc = ignore;
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommandConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_command_size, Some(128));
        assert!(!config.ignore_crc);
        assert_eq!(config.lock_timeout, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: CommandConfig =
            serde_json::from_str(r#"{"timeout": 1500, "lock_timeout": 200}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(200)));
        assert_eq!(config.read_poll, SERIAL_READ_POLL);
    }

    #[test]
    fn test_json_round_trip() {
        let config = CommandConfig::default()
            .with_ignore_crc(true)
            .with_max_command_size(None);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<CommandConfig>(&json).unwrap(), config);
    }
}
