//! PTR record handler.

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, reject_cname_collision, resolve_owner, HandlerCtx,
    RecordHandler,
};
use crate::errors::DnsError;
use crate::util::sanitize_fqdn;
use crate::zone::types::PtrRecord;

pub struct PtrRecordHandler;

#[derive(Deserialize)]
struct PtrValue {
    ptr: String,
}

#[async_trait]
impl RecordHandler for PtrRecordHandler {
    fn rtype(&self) -> u16 {
        12
    }

    fn label(&self) -> &'static str {
        "PTR"
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
        let payload: PtrValue = parse_value(self.label(), value)?;
        let ptr = sanitize_fqdn(&payload.ptr)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.ptr.entry(name.clone()).or_default();
                if list.iter().any(|rec| rec.ptr == ptr) {
                    return Ok(false);
                }
                list.push(PtrRecord { ptr, ttl });
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
            Some(Value::String(ptr)) => Some(sanitize_fqdn(&ptr)?),
            Some(other) => Some(sanitize_fqdn(
                &parse_value::<PtrValue>(self.label(), other)?.ptr,
            )?),
            None => None,
        };

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.ptr.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.ptr.remove(&name);
                        Ok(true)
                    }
                    Some(ptr) => {
                        let before = list.len();
                        list.retain(|rec| &rec.ptr != ptr);
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.ptr.remove(&name);
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
                zd.ptr
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
