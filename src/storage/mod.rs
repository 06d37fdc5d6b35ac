//! Durable key/value storage behind the zone store and named tables.
//!
//! Two logical namespaces: whole-zone snapshots keyed by zone name, and
//! named tables (`config`, `tsig-keys`, `dnssec_keys`) holding JSON-encoded
//! entries. All operations are single-key atomic; the core never needs
//! multi-key transactions.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BaseConfig;
use crate::errors::DnsError;

/// Reserved table holding TSIG shared secrets.
pub const TSIG_TABLE: &str = "tsig-keys";
/// Reserved table holding DNSSEC key material.
pub const DNSSEC_KEY_TABLE: &str = "dnssec_keys";

/// Backend contract. Implementations must be cheap to clone behind an
/// `Arc` and safe to call from concurrent tasks.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_zone(&self, name: &str, data: &[u8]) -> Result<(), DnsError>;
    async fn load_zone(&self, name: &str) -> Result<Vec<u8>, DnsError>;
    async fn delete_zone(&self, name: &str) -> Result<(), DnsError>;
    async fn list_zones(&self) -> Result<Vec<String>, DnsError>;
    async fn load_all_zones(&self) -> Result<HashMap<String, Vec<u8>>, DnsError>;

    async fn save_table(&self, table: &str, key: &str, data: &[u8]) -> Result<(), DnsError>;
    async fn load_table(&self, table: &str) -> Result<HashMap<String, Vec<u8>>, DnsError>;
    async fn delete_from_table(&self, table: &str, key: &str) -> Result<(), DnsError>;
}

/// Open the backend selected by `STORAGE_BACKEND`.
pub fn open_backend(base: &BaseConfig) -> Result<Arc<dyn Storage>, DnsError> {
    match base.storage_backend.as_str() {
        "sqlite" => Ok(Arc::new(sqlite::SqliteStorage::open(&base.sqlite_path)?)),
        "memory" => Ok(Arc::new(memory::MemoryStorage::new())),
        other => Err(DnsError::InvalidInput(format!(
            "unsupported storage backend {other:?}"
        ))),
    }
}
