//! Scheduler units of work and handler
//! outputs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// The outcome of a single protocol handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub protocol: String,
    pub devices: Vec<Device>,
    pub duration_s: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DiscoveryResult {
    pub fn ok(protocol: impl Into<String>, devices: Vec<Device>, duration_s: f64) -> Self {
        DiscoveryResult {
            protocol: protocol.into(),
            devices,
            duration_s,
            success: true,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failed(protocol: impl Into<String>, duration_s: f64, error: impl Into<String>) -> Self {
        DiscoveryResult {
            protocol: protocol.into(),
            devices: Vec::new(),
            duration_s,
            success: false,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }
}

/// The aggregate result of an Engine `DiscoverAll` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub devices: Vec<Device>,
    pub duration_s: f64,
    pub protocols_succeeded: usize,
    pub protocols_total: usize,
    pub per_protocol: Vec<DiscoveryResult>,
}

/// A scheduled unit of work requesting discovery over a named protocol set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJob {
    pub job_id: Uuid,
    pub name: String,
    pub protocols: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    pub priority: JobPriority,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub timeout_s: f64,
    pub max_retries: u32,
    pub retry_delay_s: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_backoff_s")]
    pub max_backoff_s: f64,
    #[serde(default)]
    pub retry_count: u32,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregatedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoveryJob {
    pub fn new(name: impl Into<String>, protocols: Vec<String>, priority: JobPriority) -> Self {
        let now = Utc::now();
        DiscoveryJob {
            job_id: Uuid::new_v4(),
            name: name.into(),
            protocols,
            params: HashMap::new(),
            priority,
            scheduled_at: now,
            created_at: now,
            timeout_s: 30.0,
            max_retries: 0,
            retry_delay_s: 1.0,
            backoff_factor: default_backoff_factor(),
            max_backoff_s: default_max_backoff_s(),
            retry_count: 0,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// `retry_delay_s · backoff_factor ^ retry_count`, capped at
    /// `max_backoff_s` (§7 retry/backoff propagation policy).
    pub fn next_retry_delay_s(&self) -> f64 {
        let raw = self.retry_delay_s * self.backoff_factor.powi(self.retry_count as i32);
        raw.min(self.max_backoff_s)
    }

    /// `(priority_value, scheduled_at)` sort key used by the Scheduler's
    /// queue: lower priority value sorts first... but the queue
    /// wants *higher* priority dispatched first, so callers invert the
    /// numeric value, not the tuple order (see `discovery-runtime`'s
    /// `JobQueue`).
    pub fn queue_key(&self) -> (i64, DateTime<Utc>) {
        (-(self.priority as i64), self.scheduled_at)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_backoff_s() -> f64 {
    60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_at_and_started_at_ordering() {
        let job = DiscoveryJob::new("periodic_discovery", vec!["mdns".into()], JobPriority::Normal);
        assert!(job.created_at <= job.scheduled_at || job.created_at == job.scheduled_at);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.can_retry());
    }

    #[test]
    fn queue_key_orders_higher_priority_first_after_negation() {
        let low = DiscoveryJob::new("a", vec![], JobPriority::Low);
        let critical = DiscoveryJob::new("b", vec![], JobPriority::Critical);
        assert!(critical.queue_key().0 < low.queue_key().0);
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        let mut job = DiscoveryJob::new("a", vec![], JobPriority::Normal);
        job.retry_delay_s = 1.0;
        job.backoff_factor = 2.0;
        job.max_backoff_s = 5.0;

        assert_eq!(job.next_retry_delay_s(), 1.0);
        job.retry_count = 1;
        assert_eq!(job.next_retry_delay_s(), 2.0);
        job.retry_count = 2;
        assert_eq!(job.next_retry_delay_s(), 4.0);
        job.retry_count = 3;
        assert_eq!(job.next_retry_delay_s(), 5.0, "must cap at max_backoff_s");
    }
}
