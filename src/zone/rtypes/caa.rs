//! CAA record handler.

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, reject_cname_collision, resolve_owner, HandlerCtx,
    RecordHandler,
};
use crate::errors::DnsError;
use crate::wire;
use crate::zone::types::CaaRecord;

pub struct CaaRecordHandler;

#[derive(Deserialize)]
struct CaaValue {
    #[serde(default)]
    flags: u8,
    tag: String,
    value: String,
}

#[async_trait]
impl RecordHandler for CaaRecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_CAA
    }

    fn label(&self) -> &'static str {
        "CAA"
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
        let payload: CaaValue = parse_value(self.label(), value)?;
        if payload.tag.is_empty() || payload.tag.len() > 255 {
            return Err(DnsError::InvalidInput("CAA tag length out of range".into()));
        }
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.caa.entry(name.clone()).or_default();
                if list.iter().any(|rec| {
                    rec.flags == payload.flags && rec.tag == payload.tag && rec.value == payload.value
                }) {
                    return Ok(false);
                }
                list.push(CaaRecord {
                    flags: payload.flags,
                    tag: payload.tag,
                    value: payload.value,
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
            .map(|v| parse_value::<CaaValue>(self.label(), v))
            .transpose()?;

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.caa.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.caa.remove(&name);
                        Ok(true)
                    }
                    Some(f) => {
                        let before = list.len();
                        list.retain(|rec| {
                            !(rec.flags == f.flags && rec.tag == f.tag && rec.value == f.value)
                        });
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.caa.remove(&name);
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
                zd.caa
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
