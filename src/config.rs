//! Server configuration.
//!
//! Two layers: `BaseConfig` is read once from the environment at startup
//! (ports, bind host, storage backend), while `LiveConfig` is a JSON
//! document persisted in the `config` table and mutable at runtime through
//! the management API.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::DnsError;
use crate::storage::Storage;

/// Table and key under which the live configuration is persisted.
pub const CONFIG_TABLE: &str = "config";
pub const CONFIG_KEY: &str = "live";

/// Process-level configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    /// DNS listen port, `":53"` form.
    pub dns_port: String,
    /// Management API port, `":8053"` form.
    pub api_port: String,
    /// Address both listeners bind to.
    pub bind_host: String,
    /// Storage backend selector (`sqlite` or `memory`).
    pub storage_backend: String,
    /// Database path for the sqlite backend.
    pub sqlite_path: String,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            dns_port: ":53".to_string(),
            api_port: ":8053".to_string(),
            bind_host: "0.0.0.0".to_string(),
            storage_backend: "sqlite".to_string(),
            sqlite_path: "./zone53.db".to_string(),
        }
    }
}

impl BaseConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dns_port: std::env::var("DNS_PORT").unwrap_or(defaults.dns_port),
            api_port: std::env::var("API_PORT").unwrap_or(defaults.api_port),
            bind_host: std::env::var("BIND_HOST").unwrap_or(defaults.bind_host),
            storage_backend: std::env::var("STORAGE_BACKEND").unwrap_or(defaults.storage_backend),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(defaults.sqlite_path),
        }
    }

    /// Socket address for the DNS listeners.
    pub fn dns_addr(&self) -> String {
        format!("{}{}", self.bind_host, self.dns_port)
    }
}

/// Server role. Dual-mode (both roles at once) is a dev override, see
/// [`DevConfig::dual_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Primary,
    Secondary,
    Replication,
}

impl Default for ServerMode {
    fn default() -> Self {
        ServerMode::Primary
    }
}

/// NOTIFY sender settings plus the primary address secondaries fetch from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrimaryConfig {
    pub notify_debounce_ms: u64,
    pub ip: String,
    pub port: u16,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            notify_debounce_ms: 2000,
            ip: "127.0.0.1".to_string(),
            port: 53,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecondaryConfig {
    pub fetch_debounce_ms: u64,
    pub min_fetch_interval_sec: u64,
    pub max_parallel_fetches: usize,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            fetch_debounce_ms: 3000,
            min_fetch_interval_sec: 10,
            max_parallel_fetches: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevConfig {
    /// Treat the node as both primary and secondary; forces AXFR fetches
    /// even on equal or lesser serials.
    pub dual_mode: bool,
}

/// Runtime-mutable configuration, persisted as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    pub log_level: String,
    pub mode: ServerMode,
    /// Comma-separated peers that receive NOTIFY and may request AXFR.
    pub allow_transfer: String,
    pub allow_recursion: bool,
    pub dnssec_enabled: bool,
    pub enforce_tsig: bool,
    pub default_ttl: u32,
    /// Answer for CHAOS `version.bind`.
    pub version: String,
    pub max_udp_size: u16,
    /// 0 disables rate limiting.
    pub rate_limit_qps: u32,
    pub allow_axfr: bool,
    /// Default NS used when synthesizing SOA/NS defaults.
    pub default_ns: String,
    pub primary: PrimaryConfig,
    pub secondary: SecondaryConfig,
    pub dev: DevConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            mode: ServerMode::Primary,
            allow_transfer: "127.0.0.1".to_string(),
            allow_recursion: false,
            dnssec_enabled: true,
            enforce_tsig: false,
            default_ttl: 3600,
            version: format!("zone53 {}", env!("CARGO_PKG_VERSION")),
            max_udp_size: 1232,
            rate_limit_qps: 0,
            allow_axfr: false,
            default_ns: "ns1.zone53.local.".to_string(),
            primary: PrimaryConfig::default(),
            secondary: SecondaryConfig::default(),
            dev: DevConfig::default(),
        }
    }
}

impl LiveConfig {
    /// Peers from `allow_transfer`, trimmed, empty entries dropped.
    pub fn transfer_peers(&self) -> Vec<String> {
        self.allow_transfer
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// True when the node acts as a primary (sends NOTIFY, serves AXFR).
    pub fn acts_as_primary(&self) -> bool {
        self.mode != ServerMode::Secondary || self.dev.dual_mode
    }

    /// True when the node acts as a secondary (accepts NOTIFY, fetches).
    pub fn acts_as_secondary(&self) -> bool {
        self.mode == ServerMode::Secondary || self.dev.dual_mode
    }
}

/// Shared handle to the live configuration with write-through persistence.
pub struct ConfigHandle {
    live: RwLock<LiveConfig>,
    storage: Arc<dyn Storage>,
}

impl ConfigHandle {
    /// Load the persisted configuration, or install defaults on first run.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Arc<Self>, DnsError> {
        let table = storage.load_table(CONFIG_TABLE).await?;
        let live = match table.get(CONFIG_KEY) {
            Some(raw) => serde_json::from_slice(raw)
                .map_err(|e| DnsError::StorageFailure(format!("decode live config: {e}")))?,
            None => {
                let defaults = LiveConfig::default();
                let encoded = serde_json::to_vec(&defaults)
                    .map_err(|e| DnsError::Internal(format!("encode live config: {e}")))?;
                storage.save_table(CONFIG_TABLE, CONFIG_KEY, &encoded).await?;
                info!("installed default live configuration");
                defaults
            }
        };
        Ok(Arc::new(Self {
            live: RwLock::new(live),
            storage,
        }))
    }

    /// Handle seeded with an explicit configuration, used by tests.
    pub fn ephemeral(storage: Arc<dyn Storage>, live: LiveConfig) -> Arc<Self> {
        Arc::new(Self {
            live: RwLock::new(live),
            storage,
        })
    }

    /// Snapshot of the current configuration.
    pub async fn live(&self) -> LiveConfig {
        self.live.read().await.clone()
    }

    /// Merge a partial JSON document into the live configuration and
    /// persist the result.
    pub async fn merge(&self, patch: serde_json::Value) -> Result<LiveConfig, DnsError> {
        let mut guard = self.live.write().await;
        let mut doc = serde_json::to_value(&*guard)
            .map_err(|e| DnsError::Internal(format!("encode live config: {e}")))?;
        merge_json(&mut doc, patch);
        let merged: LiveConfig = serde_json::from_value(doc)
            .map_err(|e| DnsError::InvalidInput(format!("bad config patch: {e}")))?;
        let encoded = serde_json::to_vec(&merged)
            .map_err(|e| DnsError::Internal(format!("encode live config: {e}")))?;
        self.storage
            .save_table(CONFIG_TABLE, CONFIG_KEY, &encoded)
            .await?;
        *guard = merged.clone();
        Ok(merged)
    }
}

fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
