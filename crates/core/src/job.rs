//! The job record: the unit of schedulable work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DomainError;
use crate::id::{EventId, JobId};

/// Longest accepted recurrence period (100 years).
pub const MAX_INTERVAL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Recurrence period of a recurring job.
///
/// Always strictly positive, a whole number of milliseconds, and at most
/// [`MAX_INTERVAL`]. Serialized as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u64", try_from = "u64")]
pub struct Interval(Duration);

impl Interval {
    pub fn new(period: Duration) -> Result<Self, DomainError> {
        if period.is_zero() {
            return Err(DomainError::validation("interval must be positive"));
        }
        if period.subsec_nanos() % 1_000_000 != 0 {
            return Err(DomainError::validation(
                "interval must be a whole number of milliseconds",
            ));
        }
        if period > MAX_INTERVAL {
            return Err(DomainError::validation("interval must not exceed 100 years"));
        }
        Ok(Self(period))
    }

    pub fn from_millis(ms: u64) -> Result<Self, DomainError> {
        Self::new(Duration::from_millis(ms))
    }

    pub fn from_secs(secs: u64) -> Result<Self, DomainError> {
        Self::new(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        // Bounded by MAX_INTERVAL.
        self.0.as_millis() as u64
    }
}

impl TryFrom<Duration> for Interval {
    type Error = DomainError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<u64> for Interval {
    type Error = DomainError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_millis(value)
    }
}

impl From<Interval> for u64 {
    fn from(value: Interval) -> Self {
        value.as_millis()
    }
}

impl core::fmt::Display for Interval {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

/// A job submitted to the work queue.
///
/// `job_id` is assigned once when the record is built and never changes. The
/// presence of `interval` marks the job as recurring; its absence marks it
/// one-shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub event_id: EventId,
    /// Opaque handler input; never interpreted by the scheduler.
    #[serde(default)]
    pub context: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    /// Earliest dispatch time for delayed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a one-shot job with a fresh identity.
    pub fn new(event_id: EventId, context: JsonValue) -> Self {
        Self {
            job_id: JobId::new(),
            event_id,
            context,
            interval: None,
            run_at: None,
            created_at: Utc::now(),
        }
    }

    /// Mark the job as recurring.
    pub fn recurring(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Hold the job back until `at`.
    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    /// Hold the job back for `delay` from now.
    ///
    /// Fails when `now + delay` is not a representable timestamp.
    pub fn delayed(mut self, delay: Duration) -> Result<Self, DomainError> {
        self.run_at = Some(offset(Utc::now(), delay)?);
        Ok(self)
    }

    pub fn is_recurring(&self) -> bool {
        self.interval.is_some()
    }

    /// Whether the job may be dispatched at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.run_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// The follow-up submission of a recurring job: same event, context and
    /// interval, a fresh identity, held back for one period.
    ///
    /// Returns `None` for one-shot jobs.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Result<Option<Self>, DomainError> {
        let Some(interval) = self.interval else {
            return Ok(None);
        };
        Ok(Some(Self {
            job_id: JobId::new(),
            event_id: self.event_id.clone(),
            context: self.context.clone(),
            interval: Some(interval),
            run_at: Some(offset(now, interval.as_duration())?),
            created_at: now,
        }))
    }
}

/// `from + by`, or a validation error when the result is out of range.
fn offset(from: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, DomainError> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| from.checked_add_signed(by))
        .ok_or_else(|| DomainError::validation(format!("delay of {by:?} is out of range")))
}
