//! The Event Bus's wire format.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// The discovery-related facts the bus carries, one variant per kind of
/// lifecycle fact a subscriber might care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    DeviceDiscovered {
        device: Device,
        protocol: String,
        is_new: bool,
    },
    DeviceLost {
        device_id: String,
        last_seen: DateTime<Utc>,
        reason: String,
    },
    DeviceUpdated {
        device: Device,
        changed_fields: Vec<String>,
        previous: Box<Device>,
    },
    DiscoveryStarted {
        protocols: Vec<String>,
        params: HashMap<String, serde_json::Value>,
    },
    DiscoveryCompleted {
        protocols_succeeded: usize,
        protocols_total: usize,
        duration_s: f64,
        devices_found: usize,
    },
    DiscoveryError {
        message: String,
        kind: String,
        protocol: Option<String>,
        recoverable: bool,
    },
    PluginLoaded {
        name: String,
        version: String,
    },
    PluginUnloaded {
        name: String,
    },
}

impl EventKind {
    /// Stable type name used by [`crate::filter::Filter`] and history queries
    /// (e.g. `"device.discovered"`).
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::DeviceDiscovered { .. } => "device.discovered",
            EventKind::DeviceLost { .. } => "device.lost",
            EventKind::DeviceUpdated { .. } => "device.updated",
            EventKind::DiscoveryStarted { .. } => "discovery.started",
            EventKind::DiscoveryCompleted { .. } => "discovery.completed",
            EventKind::DiscoveryError { .. } => "discovery.error",
            EventKind::PluginLoaded { .. } => "plugin.loaded",
            EventKind::PluginUnloaded { .. } => "plugin.unloaded",
        }
    }
}

/// An immutable, published fact plus its delivery envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(source: impl Into<String>, priority: Priority, kind: EventKind) -> Self {
        Event {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            priority,
            source: source.into(),
            metadata: HashMap::new(),
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_match_dotted_convention() {
        let e = Event::new(
            "engine",
            Priority::High,
            EventKind::DeviceLost {
                device_id: "id".into(),
                last_seen: Utc::now(),
                reason: "stale".into(),
            },
        );
        assert_eq!(e.type_name(), "device.lost");
    }

    #[test]
    fn priority_ordering_matches_spec_levels() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
