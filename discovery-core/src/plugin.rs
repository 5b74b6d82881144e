//! Plugin records and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Unloaded,
    Loading,
    Loaded,
    Active,
    Inactive,
    Error,
    Unloading,
}

/// Declarative metadata a plugin attaches to itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub supported_protocols: Vec<String>,
}

/// The runtime-tracked record for one loaded plugin instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub metadata: PluginMetadata,
    pub status: PluginStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discovery_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

impl PluginRecord {
    pub fn new(metadata: PluginMetadata) -> Self {
        PluginRecord {
            metadata,
            status: PluginStatus::Unloaded,
            last_error: None,
            load_time: None,
            discovery_count: 0,
            error_count: 0,
        }
    }
}
