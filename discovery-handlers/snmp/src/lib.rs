//! SNMP discovery handler: hand-rolled BER encoding of
//! SNMPv1/v2c GET requests against a fixed system OID set, with an optional
//! interface-table walk.

pub mod ber;
pub mod handler;

pub use handler::{InterfaceInfo, SnmpConfig, SnmpHandler, SNMP_PORT};
