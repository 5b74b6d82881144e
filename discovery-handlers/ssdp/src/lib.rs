//! SSDP/UPnP discovery handler.

pub mod handler;
pub mod ssdp;
pub mod xml;

pub use handler::{SsdpConfig, SsdpHandler};
