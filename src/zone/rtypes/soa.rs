//! SOA record handler.
//!
//! Singleton at the apex. Adds merge into the existing record (absent
//! fields keep their values, a missing record gets defaults from live
//! config) and always advance the serial through the date-counter rule.

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{canonical_pair, parse_value, resolve_owner, HandlerCtx, RecordHandler};
use crate::errors::DnsError;
use crate::util::{next_serial, sanitize_fqdn};
use crate::zone::store::ZoneStore;
use crate::zone::types::SoaRecord;

pub struct SoaRecordHandler;

#[derive(Deserialize)]
struct SoaValue {
    ns: Option<String>,
    mbox: Option<String>,
    refresh: Option<u32>,
    retry: Option<u32>,
    expire: Option<u32>,
    minimum: Option<u32>,
}

/// Default SOA for a zone that has none yet.
fn default_soa(zone: &str, default_ns: &str, ttl: u32) -> SoaRecord {
    SoaRecord {
        ns: default_ns.to_string(),
        mbox: format!("hostmaster.{zone}"),
        serial: next_serial(0),
        refresh: 3600,
        retry: 900,
        expire: 1209600,
        minimum: 300,
        ttl,
    }
}

#[async_trait]
impl RecordHandler for SoaRecordHandler {
    fn rtype(&self) -> u16 {
        6
    }

    fn label(&self) -> &'static str {
        "SOA"
    }

    async fn add(
        &self,
        ctx: &HandlerCtx,
        zone: &str,
        _name: &str,
        value: Value,
        ttl: Option<u32>,
    ) -> Result<bool, DnsError> {
        let (zone, _) = canonical_pair(zone, "@")?;
        let payload: SoaValue = parse_value(self.label(), value)?;
        let ns = payload.ns.map(|ns| sanitize_fqdn(&ns)).transpose()?;
        let mbox = payload.mbox.map(|mbox| sanitize_fqdn(&mbox)).transpose()?;
        let live = ctx.config.live().await;

        ctx.store
            .modify(&zone, self.label(), "@", true, |zd| {
                let mut rec = zd
                    .soa()
                    .cloned()
                    .unwrap_or_else(|| default_soa(&zone, &live.default_ns, live.default_ttl));
                let previous_serial = zd.soa().map(|soa| soa.serial).unwrap_or(0);

                if let Some(ns) = &ns {
                    rec.ns = ns.clone();
                }
                if let Some(mbox) = &mbox {
                    rec.mbox = mbox.clone();
                }
                if let Some(refresh) = payload.refresh {
                    rec.refresh = refresh;
                }
                if let Some(retry) = payload.retry {
                    rec.retry = retry;
                }
                if let Some(expire) = payload.expire {
                    rec.expire = expire;
                }
                if let Some(ttl) = ttl {
                    rec.ttl = ttl;
                }
                if let Some(minimum) = payload.minimum {
                    rec.minimum = minimum;
                }
                rec.serial = next_serial(previous_serial);

                zd.soa.insert("@".to_string(), rec);
                Ok(true)
            })
            .await
    }

    async fn delete(
        &self,
        ctx: &HandlerCtx,
        fqdn: &str,
        _value: Option<Value>,
    ) -> Result<bool, DnsError> {
        let (zone, _, _) = resolve_owner(ctx, fqdn)
            .await
            .ok_or_else(|| DnsError::NotFound(format!("no zone for {fqdn:?}")))?;
        ctx.store
            .modify(&zone, self.label(), "@", false, |zd| {
                Ok(zd.soa.remove("@").is_some())
            })
            .await
    }

    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>> {
        let (zone, _, _) = resolve_owner(ctx, fqdn).await?;
        ctx.store
            .with_zone(&zone, |zd| {
                zd.soa().and_then(|rec| rec.to_rr(&zone).ok()).map(|rr| vec![rr])
            })
            .await
            .flatten()
    }
}

/// Advance the zone's SOA serial, synthesizing a default SOA when the zone
/// has records but no SOA yet. Called for every authoritative mutation
/// that is not itself an SOA write.
pub async fn update_soa_serial(
    store: &ZoneStore,
    zone: &str,
    default_ns: &str,
    default_ttl: u32,
) -> Result<u32, DnsError> {
    let mut serial = 0;
    store
        .modify(zone, "SOA", "@", true, |zd| {
            match zd.soa_mut() {
                Some(soa) => {
                    soa.serial = next_serial(soa.serial);
                    serial = soa.serial;
                }
                None => {
                    let rec = default_soa(zone, default_ns, default_ttl);
                    serial = rec.serial;
                    zd.soa.insert("@".to_string(), rec);
                }
            }
            Ok(true)
        })
        .await?;
    Ok(serial)
}
