use std::time::Duration;

/// Default interval between metric flushes.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Controls how often the publisher flushes coalesced updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Updates posted within one interval are coalesced per metric.
    pub interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }
}
