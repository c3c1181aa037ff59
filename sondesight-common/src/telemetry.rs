use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single opaque payload emitted by a bridge.
///
/// The payload itself is already encoded by the producer (for the sonde
/// bridge: zlib + base64 of the decoded record list); the envelope only adds
/// the acquisition timestamp and routing information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    /// Unix epoch nanoseconds when the data was acquired.
    pub timestamp: i64,

    /// Instrument identifier (e.g., "exosonde3").
    pub source: String,

    /// Payload name (e.g., "rawzb64.data").
    pub name: String,

    /// The encoded payload.
    pub value: String,
}

impl TelemetryEnvelope {
    /// Create a new envelope stamped with the current time.
    pub fn new(
        source: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: current_timestamp_nanos(),
            source: source.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Replace the timestamp, e.g. with the moment a register snapshot completed.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Get the current timestamp in nanoseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
