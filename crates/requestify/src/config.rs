//! Correlator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CorrelatorError;

/// Request deadline applied when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Tunables for one [`crate::Correlator`] instance.
///
/// On the wire (config files, environment-derived JSON) the timeout is
/// expressed in whole milliseconds as `request_timeout_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// How long a request waits for its response before failing with
    /// [`crate::RequestError::Timeout`].
    #[serde(rename = "request_timeout_ms", with = "millis", default = "default_timeout")]
    pub request_timeout: Duration,
}

impl CorrelatorConfig {
    /// Returns a copy with the given request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// The request timeout must be strictly positive.
    pub fn validate(&self) -> Result<(), CorrelatorError> {
        if self.request_timeout.is_zero() {
            return Err(CorrelatorError::InvalidConfig {
                message: "request_timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::saturating_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
