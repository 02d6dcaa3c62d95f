use std::time::Duration;

/// Tunables for an [`AdapterSession`][crate::AdapterSession]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// How long to wait for the answer to one request before treating it as timed out
    pub request_timeout: Duration,
    /// How many times a request failing with a transient error is sent again before giving up
    pub max_retries: u32,
    /// How many [`SessionEvent`][crate::SessionEvent]s are buffered before the oldest is dropped
    pub event_capacity: usize,
}

impl SessionConfig {
    /// The per-request timeout used unless configured otherwise.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    /// The retry bound used unless configured otherwise.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// The event buffer size used unless configured otherwise.
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the number of retries after a transient failure.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the event buffer size. Values below 1 are raised to 1.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}
