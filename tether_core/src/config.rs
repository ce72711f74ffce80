//! Session configuration.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    backoff::RetryPolicy,
    registry::{DEFAULT_MAX_PENDING, DEFAULT_MAX_TOMBSTONES},
};

/// Tunables for a [`Session`](crate::session::Session).
///
/// Every field has a default, so a host can deserialize a partial document:
///
/// ```
/// use core::time::Duration;
/// use tether_core::config::SessionConfig;
///
/// let config: SessionConfig =
///     serde_json::from_str(r#"{"max_pending": 64, "default_deadline": 30000}"#).unwrap();
/// assert_eq!(config.max_pending, 64);
/// assert_eq!(config.default_deadline, Some(Duration::from_secs(30)));
/// assert!(config.surface_exhaustion);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Retry schedule for outbound sends.
    pub retry: RetryPolicy,

    /// Bound on outstanding calls and streams before the oldest is evicted.
    pub max_pending: usize,

    /// How many finished identifiers are remembered to recognize late envelopes.
    pub max_tombstones: usize,

    /// Fail a waiting call or stream when its request could not be sent.
    ///
    /// When `false` the waiter is left registered, as if the host were slow.
    pub surface_exhaustion: bool,

    /// Deadline applied to every unary call. `None` waits indefinitely.
    #[serde(with = "millis_opt")]
    pub default_deadline: Option<Duration>,
}

impl SessionConfig {
    /// Replace the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the registry capacity.
    #[must_use]
    pub const fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Replace the tombstone capacity.
    #[must_use]
    pub const fn with_max_tombstones(mut self, max_tombstones: usize) -> Self {
        self.max_tombstones = max_tombstones;
        self
    }

    /// Whether exhausted sends fail their waiter.
    #[must_use]
    pub const fn with_surface_exhaustion(mut self, surface: bool) -> Self {
        self.surface_exhaustion = surface;
        self
    }

    /// Apply a deadline to every unary call.
    #[must_use]
    pub const fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_pending: DEFAULT_MAX_PENDING,
            max_tombstones: DEFAULT_MAX_TOMBSTONES,
            surface_exhaustion: true,
            default_deadline: None,
        }
    }
}

mod millis_opt {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(dur: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        dur.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(s)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
