//! Shared data model, configuration shapes, and handler/plugin contracts
//! for the edge device discovery service.
//!
//! This crate carries no tokio dependency of its own — it is the
//! foundation every other crate in the workspace builds on.

pub mod case_insensitive;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod handler;
pub mod job;
pub mod plugin;

pub use case_insensitive::CaseInsensitiveMap;
pub use device::{Device, DeviceStatus, DeviceType};
pub use error::{DiscoveryError, Result};
pub use event::{Event, EventKind, Priority};
pub use handler::{DiscoveryHandler, Plugin};
pub use job::{AggregatedResult, DiscoveryJob, DiscoveryResult, JobPriority, JobStatus};
pub use plugin::{PluginMetadata, PluginRecord, PluginStatus};
