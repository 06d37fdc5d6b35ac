//! Record mutation façade.
//!
//! The management API funnels every write through here: type dispatch via
//! the registry, SOA serial bumps after each effective non-SOA mutation,
//! and NOTIFY scheduling when the node is not a pure secondary. DNSSEC
//! key provisioning (generate + publish DNSKEYs, derive DS) also lives on
//! this façade since it composes the key store with record storage.

use std::sync::Arc;

use hickory_proto::rr::Record;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ConfigHandle;
use crate::dnssec::keys::{ds_for_dnskey, KeyStore};
use crate::errors::DnsError;
use crate::replication::NotifyEngine;
use crate::util::sanitize_fqdn;
use crate::zone::rtypes::{update_soa_serial, HandlerCtx, Registry};
use crate::zone::store::ZoneStore;
use crate::zone::types::DsRecord;

pub struct RecordApi {
    store: Arc<ZoneStore>,
    registry: Arc<Registry>,
    config: Arc<ConfigHandle>,
    notify: Arc<NotifyEngine>,
    keys: Arc<KeyStore>,
}

impl RecordApi {
    pub fn new(
        store: Arc<ZoneStore>,
        registry: Arc<Registry>,
        config: Arc<ConfigHandle>,
        notify: Arc<NotifyEngine>,
        keys: Arc<KeyStore>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            notify,
            keys,
        }
    }

    fn ctx(&self) -> HandlerCtx {
        HandlerCtx {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }

    /// Add a record of `rtype` to `zone`. Effective non-SOA writes bump
    /// the zone serial and, outside secondary mode, schedule a NOTIFY.
    pub async fn add_record(
        &self,
        rtype: &str,
        zone: &str,
        name: &str,
        value: Value,
        ttl: Option<u32>,
    ) -> Result<(), DnsError> {
        let handler = self
            .registry
            .get_by_label(rtype)
            .ok_or_else(|| DnsError::InvalidInput(format!("unknown RR type {rtype:?}")))?;
        let zone = sanitize_fqdn(zone)?;

        let changed = handler.add(&self.ctx(), &zone, name, value, ttl).await?;
        if changed && !rtype.eq_ignore_ascii_case("SOA") {
            self.after_mutation(&zone).await;
        }
        Ok(())
    }

    /// Delete records of `rtype` at `fqdn`, filtered by `value` when
    /// given.
    pub async fn delete_record(
        &self,
        rtype: &str,
        fqdn: &str,
        value: Option<Value>,
    ) -> Result<(), DnsError> {
        let handler = self
            .registry
            .get_by_label(rtype)
            .ok_or_else(|| DnsError::InvalidInput(format!("unknown RR type {rtype:?}")))?;

        // Resolve the owning zone before the delete; removing the last
        // record must still bump that zone's serial.
        let fqdn_canonical = sanitize_fqdn(fqdn)?;
        let zone = self
            .store
            .find_zone(&fqdn_canonical)
            .await
            .map(|(zone, _)| zone);

        let changed = handler.delete(&self.ctx(), fqdn, value).await?;
        if changed && !rtype.eq_ignore_ascii_case("SOA") {
            if let Some(zone) = zone {
                self.after_mutation(&zone).await;
            }
        }
        Ok(())
    }

    pub async fn lookup_record(&self, rtype: &str, fqdn: &str) -> Option<Vec<Record>> {
        let handler = self.registry.get_by_label(rtype)?;
        handler.lookup(&self.ctx(), fqdn).await
    }

    pub async fn delete_zone(&self, zone: &str) -> Result<(), DnsError> {
        let zone = sanitize_fqdn(zone)?;
        self.store.delete_zone(&zone).await?;
        info!(%zone, "zone deleted");
        Ok(())
    }

    async fn after_mutation(&self, zone: &str) {
        let live = self.config.live().await;
        match update_soa_serial(&self.store, zone, &live.default_ns, live.default_ttl).await {
            Ok(serial) => {
                if live.acts_as_primary() {
                    self.notify.schedule_notify(zone).await;
                }
                info!(zone, serial, "zone serial advanced");
            }
            Err(e) => warn!(zone, error = %e, "failed to update SOA serial"),
        }
    }

    /// Generate any missing DNSSEC keys for the zone and publish their
    /// DNSKEY records, which in turn triggers the signing pipeline.
    pub async fn generate_dnssec_keys(&self, zone: &str) -> Result<usize, DnsError> {
        let zone = sanitize_fqdn(zone)?;
        let created = self.keys.generate_zone_keys(&zone).await?.len();

        let handler = self
            .registry
            .get_by_label("DNSKEY")
            .ok_or_else(|| DnsError::Internal("DNSKEY handler missing".into()))?;
        let live = self.config.live().await;
        for (_, key) in self.keys.keys_for_zone(&zone).await {
            let record = key.dnskey_record(live.default_ttl)?;
            let value = serde_json::to_value(&record)
                .map_err(|e| DnsError::Internal(format!("encode DNSKEY: {e}")))?;
            handler
                .add(&self.ctx(), &zone, "@", value, Some(record.ttl))
                .await?;
        }
        Ok(created)
    }

    /// DS records derived from the zone's published KSK DNSKEYs.
    pub async fn ds_records(&self, zone: &str) -> Result<Vec<DsRecord>, DnsError> {
        let zone = sanitize_fqdn(zone)?;
        let dnskeys = self
            .store
            .with_zone(&zone, |zd| zd.dnskey.get("@").cloned().unwrap_or_default())
            .await
            .ok_or_else(|| DnsError::NotFound(format!("zone {zone}")))?;

        let mut out = Vec::new();
        for dnskey in dnskeys.iter().filter(|k| k.flags == 257) {
            out.extend(ds_for_dnskey(&zone, dnskey)?);
        }
        if out.is_empty() {
            return Err(DnsError::NotFound(format!("no KSK DNSKEYs in {zone}")));
        }
        Ok(out)
    }
}
