//! Active network scan discovery handler: ICMP ping,
//! bounded TCP port scan and banner-grab service identification.

pub mod handler;
pub mod interfaces;
pub mod ping;
pub mod ports;

pub use handler::{NetworkScanConfig, NetworkScanHandler};
