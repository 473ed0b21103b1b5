//! Progress records for uploads and downloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fractional completion of one tracked transfer
///
/// The `rate` is always within `[0, 1]`; setters clamp out-of-range and
/// non-finite input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    id: String,
    rate: f64,
    start_time: DateTime<Utc>,
}

impl ProgressRecord {
    /// Creates a record at rate 0 started now
    pub fn started(id: impl Into<String>) -> Self {
        Self::started_at(id, Utc::now())
    }

    pub fn started_at(id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            rate: 0.0,
            start_time,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = clamp_rate(rate);
    }

    pub fn is_complete(&self) -> bool {
        self.rate >= 1.0
    }

    /// Re-establishes the rate invariant after deserialization
    pub fn normalized(mut self) -> Self {
        self.rate = clamp_rate(self.rate);
        self
    }
}

/// Clamps a rate into `[0, 1]`; NaN becomes 0
pub fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}
