//! In-memory authoritative dataset with write-through persistence.
//!
//! The tree is `zone -> ZoneData` behind one readers-writer lock. Every
//! mutation persists the zone snapshot before returning; successful record
//! adds additionally queue a background signing task for the touched RRset
//! so cryptographic work never happens under the lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::errors::DnsError;
use crate::storage::Storage;
use crate::zone::types::{RrsigRecord, ZoneData};

/// A changed RRset awaiting a signing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignTask {
    pub zone: String,
    pub rtype: String,
    pub name: String,
}

pub struct ZoneStore {
    zones: RwLock<HashMap<String, ZoneData>>,
    storage: Arc<dyn Storage>,
    sign_tx: mpsc::UnboundedSender<SignTask>,
}

impl ZoneStore {
    /// Load all persisted zones and hand back the store plus the signing
    /// queue consumed by the DNSSEC worker.
    pub async fn load(
        storage: Arc<dyn Storage>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SignTask>), DnsError> {
        let (sign_tx, sign_rx) = mpsc::unbounded_channel();
        let mut zones = HashMap::new();
        for (name, raw) in storage.load_all_zones().await? {
            match serde_json::from_slice::<ZoneData>(&raw) {
                Ok(data) => {
                    zones.insert(name, data);
                }
                Err(e) => warn!(zone = %name, error = %e, "skipping undecodable zone snapshot"),
            }
        }
        debug!(count = zones.len(), "zone store loaded");
        Ok((
            Arc::new(Self {
                zones: RwLock::new(zones),
                storage,
                sign_tx,
            }),
            sign_rx,
        ))
    }

    /// Mutate one zone under the write lock and persist the result.
    ///
    /// The closure returns `Ok(true)` when it changed anything; unchanged
    /// zones are neither persisted nor re-signed. The zone entry is created
    /// implicitly (zones exist from their first record insertion). With
    /// `sign` set, a changed RRset is queued for the signing pipeline.
    pub async fn modify<F>(
        &self,
        zone: &str,
        rtype: &str,
        name: &str,
        sign: bool,
        f: F,
    ) -> Result<bool, DnsError>
    where
        F: FnOnce(&mut ZoneData) -> Result<bool, DnsError>,
    {
        let mut zones = self.zones.write().await;
        let created = !zones.contains_key(zone);
        let data = zones.entry(zone.to_string()).or_default();
        let changed = match f(data) {
            Ok(changed) => changed,
            Err(e) => {
                // A rejected first write must not leave an empty zone
                // behind.
                if created {
                    zones.remove(zone);
                }
                return Err(e);
            }
        };
        if changed {
            let encoded = serde_json::to_vec(data)
                .map_err(|e| DnsError::Internal(format!("encode zone {zone}: {e}")))?;
            self.storage.save_zone(zone, &encoded).await?;
            if sign {
                let _ = self.sign_tx.send(SignTask {
                    zone: zone.to_string(),
                    rtype: rtype.to_string(),
                    name: name.to_string(),
                });
            }
        } else if created {
            zones.remove(zone);
        }
        Ok(changed)
    }

    /// Snapshot of one zone.
    pub async fn get(&self, zone: &str) -> Option<ZoneData> {
        self.zones.read().await.get(zone).cloned()
    }

    /// Read access without cloning the whole zone.
    pub async fn with_zone<R>(&self, zone: &str, f: impl FnOnce(&ZoneData) -> R) -> Option<R> {
        self.zones.read().await.get(zone).map(f)
    }

    pub async fn zone_exists(&self, zone: &str) -> bool {
        self.zones.read().await.contains_key(zone)
    }

    pub async fn list_zones(&self) -> Vec<String> {
        self.zones.read().await.keys().cloned().collect()
    }

    /// Current SOA serial of a zone.
    pub async fn zone_serial(&self, zone: &str) -> Option<u32> {
        self.with_zone(zone, |zd| zd.soa().map(|soa| soa.serial))
            .await
            .flatten()
    }

    /// Materialize every stored entry as canonical wire RRs (SOA first).
    pub async fn get_zone_records(
        &self,
        zone: &str,
    ) -> Option<Vec<hickory_proto::rr::Record>> {
        self.with_zone(zone, |zd| zd.all_records(zone)).await
    }

    /// Longest-suffix match of a query name against hosted zones.
    ///
    /// Returns the zone and the owner name relative to it (`@` for the
    /// apex).
    pub async fn find_zone(&self, fqdn: &str) -> Option<(String, String)> {
        let zones = self.zones.read().await;
        let mut candidate = fqdn.to_string();
        loop {
            if zones.contains_key(&candidate) {
                let relative = crate::util::relativize(fqdn, &candidate)?;
                return Some((candidate, relative));
            }
            match candidate.split_once('.') {
                Some((_, rest)) if !rest.is_empty() => candidate = rest.to_string(),
                _ => return None,
            }
        }
    }

    /// Remove a zone from memory and durable storage.
    pub async fn delete_zone(&self, zone: &str) -> Result<(), DnsError> {
        let mut zones = self.zones.write().await;
        if zones.remove(zone).is_none() {
            return Err(DnsError::NotFound(format!("zone {zone}")));
        }
        self.storage.delete_zone(zone).await
    }

    /// Replace a zone wholesale (AXFR import). No signing pass is queued;
    /// transferred zones carry their RRSIGs with them.
    pub async fn replace_zone(&self, zone: &str, data: ZoneData) -> Result<(), DnsError> {
        let mut zones = self.zones.write().await;
        let encoded = serde_json::to_vec(&data)
            .map_err(|e| DnsError::Internal(format!("encode zone {zone}: {e}")))?;
        zones.insert(zone.to_string(), data);
        self.storage.save_zone(zone, &encoded).await
    }

    /// Store a freshly produced RRSIG under `RRSIG -> covered -> owner`.
    ///
    /// Duplicates (same key tag, covered type, expiration and signature)
    /// are dropped. Persists on change; never queues further signing.
    pub async fn insert_rrsig(
        &self,
        zone: &str,
        covered: &str,
        owner: &str,
        sig: RrsigRecord,
    ) -> Result<(), DnsError> {
        self.modify(zone, "RRSIG", owner, false, |zd| {
            let sigs = zd
                .rrsig
                .entry(covered.to_string())
                .or_default()
                .entry(owner.to_string())
                .or_default();
            let duplicate = sigs.iter().any(|existing| {
                existing.key_tag == sig.key_tag
                    && existing.type_covered == sig.type_covered
                    && existing.expiration == sig.expiration
                    && existing.signature == sig.signature
            });
            if duplicate {
                return Ok(false);
            }
            // One signature per key: a re-sign with the same key replaces
            // the previous signature instead of accumulating.
            sigs.retain(|existing| existing.key_tag != sig.key_tag);
            sigs.push(sig);
            Ok(true)
        })
        .await
        .map(|_| ())
    }

    /// Covering RRSIGs for (owner, covered type), if any.
    pub async fn rrsigs_for(
        &self,
        zone: &str,
        covered: &str,
        owner: &str,
    ) -> Vec<RrsigRecord> {
        self.with_zone(zone, |zd| {
            zd.rrsig
                .get(covered)
                .and_then(|by_owner| by_owner.get(owner))
                .cloned()
                .unwrap_or_default()
        })
        .await
        .unwrap_or_default()
    }
}
