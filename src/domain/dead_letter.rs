use chrono::{DateTime, Utc};

use super::envelope::Delivery;

/// A message whose handler kept failing after every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The original delivery, position included, for later replay.
    pub delivery: Delivery,
    /// Error message from the last failed attempt.
    pub error: String,
    pub attempts: u32,
    pub worker: String,
    pub failed_at: DateTime<Utc>,
}
