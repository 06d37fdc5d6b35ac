//! TXT record handler.

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, reject_cname_collision, resolve_owner, HandlerCtx,
    RecordHandler,
};
use crate::errors::DnsError;
use crate::zone::types::TxtRecord;

pub struct TxtRecordHandler;

#[derive(Deserialize)]
struct TxtValue {
    text: String,
}

fn filter_text(value: Value) -> Result<String, DnsError> {
    match value {
        Value::String(text) => Ok(text),
        other => parse_value::<TxtValue>("TXT", other).map(|v| v.text),
    }
}

#[async_trait]
impl RecordHandler for TxtRecordHandler {
    fn rtype(&self) -> u16 {
        16
    }

    fn label(&self) -> &'static str {
        "TXT"
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
        let payload: TxtValue = parse_value(self.label(), value)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.txt.entry(name.clone()).or_default();
                if list.iter().any(|rec| rec.text == payload.text) {
                    return Ok(false);
                }
                list.push(TxtRecord {
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
        let filter = value.map(filter_text).transpose()?;

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.txt.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.txt.remove(&name);
                        Ok(true)
                    }
                    Some(text) => {
                        let before = list.len();
                        list.retain(|rec| &rec.text != text);
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.txt.remove(&name);
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
                zd.txt
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
