//! In-memory storage backend.
//!
//! Used by tests and by `STORAGE_BACKEND=memory` for throwaway instances;
//! contents vanish on shutdown.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Storage;
use crate::errors::DnsError;

#[derive(Default)]
pub struct MemoryStorage {
    zones: RwLock<HashMap<String, Vec<u8>>>,
    tables: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_zone(&self, name: &str, data: &[u8]) -> Result<(), DnsError> {
        self.zones
            .write()
            .await
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn load_zone(&self, name: &str) -> Result<Vec<u8>, DnsError> {
        self.zones
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DnsError::NotFound(format!("zone {name}")))
    }

    async fn delete_zone(&self, name: &str) -> Result<(), DnsError> {
        self.zones.write().await.remove(name);
        Ok(())
    }

    async fn list_zones(&self) -> Result<Vec<String>, DnsError> {
        Ok(self.zones.read().await.keys().cloned().collect())
    }

    async fn load_all_zones(&self) -> Result<HashMap<String, Vec<u8>>, DnsError> {
        Ok(self.zones.read().await.clone())
    }

    async fn save_table(&self, table: &str, key: &str, data: &[u8]) -> Result<(), DnsError> {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn load_table(&self, table: &str) -> Result<HashMap<String, Vec<u8>>, DnsError> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_from_table(&self, table: &str, key: &str) -> Result<(), DnsError> {
        if let Some(entries) = self.tables.write().await.get_mut(table) {
            entries.remove(key);
        }
        Ok(())
    }
}
