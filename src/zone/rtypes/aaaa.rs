//! AAAA record handler.

use std::net::Ipv6Addr;

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, reject_cname_collision, resolve_owner, HandlerCtx,
    RecordHandler,
};
use crate::errors::DnsError;
use crate::zone::types::AaaaRecord;

pub struct AaaaRecordHandler;

#[derive(Deserialize)]
struct AaaaValue {
    ip: String,
}

fn filter_ip(value: Value) -> Result<String, DnsError> {
    match value {
        Value::String(ip) => Ok(ip),
        other => parse_value::<AaaaValue>("AAAA", other).map(|v| v.ip),
    }
}

#[async_trait]
impl RecordHandler for AaaaRecordHandler {
    fn rtype(&self) -> u16 {
        28
    }

    fn label(&self) -> &'static str {
        "AAAA"
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
        let payload: AaaaValue = parse_value(self.label(), value)?;
        let ip: Ipv6Addr = payload
            .ip
            .parse()
            .map_err(|_| DnsError::InvalidInput(format!("invalid IPv6 address {:?}", payload.ip)))?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.aaaa.entry(name.clone()).or_default();
                if list.iter().any(|rec| rec.ip == ip.to_string()) {
                    return Ok(false);
                }
                list.push(AaaaRecord {
                    ip: ip.to_string(),
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
        // Normalize the filter so textual variants of one address match.
        let filter = match value.map(filter_ip).transpose()? {
            Some(raw) => Some(
                raw.parse::<Ipv6Addr>()
                    .map_err(|_| DnsError::InvalidInput(format!("invalid IPv6 address {raw:?}")))?
                    .to_string(),
            ),
            None => None,
        };

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.aaaa.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.aaaa.remove(&name);
                        Ok(true)
                    }
                    Some(ip) => {
                        let before = list.len();
                        list.retain(|rec| &rec.ip != ip);
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.aaaa.remove(&name);
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
                zd.aaaa
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
