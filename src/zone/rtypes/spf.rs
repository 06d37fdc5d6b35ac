//! SPF (type 99) record handler. Same storage shape as TXT; kept as a
//! distinct type so queries for SPF answer with type 99 (RFC 7208 §14.1).

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
use crate::zone::types::SpfRecord;

pub struct SpfRecordHandler;

#[derive(Deserialize)]
struct SpfValue {
    text: String,
}

#[async_trait]
impl RecordHandler for SpfRecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_SPF
    }

    fn label(&self) -> &'static str {
        "SPF"
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
        let payload: SpfValue = parse_value(self.label(), value)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.spf.entry(name.clone()).or_default();
                if list.iter().any(|rec| rec.text == payload.text) {
                    return Ok(false);
                }
                list.push(SpfRecord {
                    text: payload.text,
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
        let filter = match value {
            Some(Value::String(text)) => Some(text),
            Some(other) => Some(parse_value::<SpfValue>(self.label(), other)?.text),
            None => None,
        };

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.spf.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.spf.remove(&name);
                        Ok(true)
                    }
                    Some(text) => {
                        let before = list.len();
                        list.retain(|rec| &rec.text != text);
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.spf.remove(&name);
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
                zd.spf
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
