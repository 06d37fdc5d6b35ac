//! DNSKEY record handler.
//!
//! The key generator publishes DNSKEYs through this handler; operators may
//! also install keys managed elsewhere. Uniqueness is the (flags,
//! algorithm, public_key) triple.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, resolve_owner, HandlerCtx, RecordHandler,
};
use crate::errors::DnsError;
use crate::wire;
use crate::zone::types::DnskeyRecord;

pub struct DnskeyRecordHandler;

#[derive(Deserialize)]
struct DnskeyValue {
    flags: u16,
    #[serde(default = "default_protocol")]
    protocol: u8,
    algorithm: u8,
    public_key: String,
}

fn default_protocol() -> u8 {
    3
}

#[async_trait]
impl RecordHandler for DnskeyRecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_DNSKEY
    }

    fn label(&self) -> &'static str {
        "DNSKEY"
    }

    async fn add(
        &self,
        ctx: &HandlerCtx,
        zone: &str,
        name: &str,
        value: Value,
        ttl: Option<u32>,
    ) -> Result<bool, DnsError> {
        let (zone, name) = canonical_pair(zone, name)?;
        let payload: DnskeyValue = parse_value(self.label(), value)?;
        if BASE64.decode(&payload.public_key).is_err() {
            return Err(DnsError::InvalidInput(
                "DNSKEY public key is not base64".into(),
            ));
        }
        // Protocol is fixed at 3 (RFC 4034 §2.1.2).
        if payload.protocol != 3 {
            return Err(DnsError::InvalidInput("DNSKEY protocol must be 3".into()));
        }
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                let list = zd.dnskey.entry(name.clone()).or_default();
                if list.iter().any(|rec| {
                    rec.flags == payload.flags
                        && rec.algorithm == payload.algorithm
                        && rec.public_key == payload.public_key
                }) {
                    return Ok(false);
                }
                list.push(DnskeyRecord {
                    flags: payload.flags,
                    protocol: payload.protocol,
                    algorithm: payload.algorithm,
                    public_key: payload.public_key,
                    ttl,
                });
                Ok(true)
            })
            .await
    }

    async fn delete(
        &self,
        ctx: &HandlerCtx,
        fqdn: &str,
        value: Option<Value>,
    ) -> Result<bool, DnsError> {
        let (zone, name, _) = resolve_owner(ctx, fqdn)
            .await
            .ok_or_else(|| DnsError::NotFound(format!("no zone for {fqdn:?}")))?;
        let filter = value
            .map(|v| parse_value::<DnskeyValue>(self.label(), v))
            .transpose()?;

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.dnskey.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.dnskey.remove(&name);
                        Ok(true)
                    }
                    Some(f) => {
                        let before = list.len();
                        list.retain(|rec| {
                            !(rec.flags == f.flags
                                && rec.algorithm == f.algorithm
                                && rec.public_key == f.public_key)
                        });
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.dnskey.remove(&name);
                        }
                        Ok(changed)
                    }
                }
            })
            .await
    }

    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>> {
        let (zone, name, fqdn) = resolve_owner(ctx, fqdn).await?;
        let records = ctx
            .store
            .with_zone(&zone, |zd| {
                zd.dnskey
                    .get(&name)
                    .map(|list| {
                        list.iter()
                            .filter_map(|rec| rec.to_rr(&fqdn).ok())
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            })
            .await?;
        if records.is_empty() {
            None
        } else {
            Some(records)
        }
    }
}
