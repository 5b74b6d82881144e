//! mDNS discovery handler: DNS-SD over multicast UDP.

pub mod dns;
pub mod handler;

pub use handler::{MdnsConfig, MdnsHandler, MULTICAST_ADDR, MULTICAST_PORT};
