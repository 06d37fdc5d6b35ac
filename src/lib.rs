//! zone53: an authoritative DNS server with DNSSEC signing and
//! NOTIFY/AXFR replication between a primary and its secondaries.

pub mod config;
pub mod dnssec;
pub mod errors;
pub mod replication;
pub mod server;
pub mod storage;
pub mod tsig;
pub mod util;
pub mod wire;
pub mod zone;

pub use errors::DnsError;
