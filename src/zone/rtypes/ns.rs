//! NS record handler.

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
use crate::zone::types::NsRecord;

pub struct NsRecordHandler;

#[derive(Deserialize)]
struct NsValue {
    ns: String,
}

fn filter_ns(value: Value) -> Result<String, DnsError> {
    let raw = match value {
        Value::String(ns) => ns,
        other => parse_value::<NsValue>("NS", other)?.ns,
    };
    sanitize_fqdn(&raw)
}

#[async_trait]
impl RecordHandler for NsRecordHandler {
    fn rtype(&self) -> u16 {
        2
    }

    fn label(&self) -> &'static str {
        "NS"
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
        let payload: NsValue = parse_value(self.label(), value)?;
        let ns = sanitize_fqdn(&payload.ns)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.ns.entry(name.clone()).or_default();
                if list.iter().any(|rec| rec.ns == ns) {
                    return Ok(false);
                }
                list.push(NsRecord { ns, ttl });
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
        let filter = value.map(filter_ns).transpose()?;

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.ns.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.ns.remove(&name);
                        Ok(true)
                    }
                    Some(ns) => {
                        let before = list.len();
                        list.retain(|rec| &rec.ns != ns);
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.ns.remove(&name);
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
                zd.ns
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

#[cfg(test)]
mod tests {
    use super::super::testutil::ctx;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_nameserver_is_canonicalized() {
        let (ctx, _rx) = ctx().await;
        let handler = NsRecordHandler;

        handler
            .add(&ctx, "go53.test.", "@", json!({"ns": "NS1.Go53.Test"}), None)
            .await
            .unwrap();
        // Canonical duplicate.
        let changed = handler
            .add(&ctx, "go53.test.", "@", json!({"ns": "ns1.go53.test."}), None)
            .await
            .unwrap();
        assert!(!changed);

        let records = handler.lookup(&ctx, "go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_two_nameservers_coexist() {
        let (ctx, _rx) = ctx().await;
        let handler = NsRecordHandler;
        for ns in ["ns1.go53.test.", "ns2.go53.test."] {
            handler
                .add(&ctx, "go53.test.", "@", json!({ "ns": ns }), None)
                .await
                .unwrap();
        }
        assert_eq!(handler.lookup(&ctx, "go53.test.").await.unwrap().len(), 2);
    }
}
