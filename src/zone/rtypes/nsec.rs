//! NSEC record handler. Stored and served verbatim; this server does not
//! synthesize denial-of-existence chains.

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, resolve_owner, HandlerCtx, RecordHandler,
};
use crate::errors::DnsError;
use crate::util::sanitize_fqdn;
use crate::wire;
use crate::zone::types::NsecRecord;

pub struct NsecRecordHandler;

#[derive(Deserialize)]
struct NsecValue {
    next_domain: String,
    types: Vec<String>,
}

#[async_trait]
impl RecordHandler for NsecRecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_NSEC
    }

    fn label(&self) -> &'static str {
        "NSEC"
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
        let payload: NsecValue = parse_value(self.label(), value)?;
        let next_domain = sanitize_fqdn(&payload.next_domain)?;
        for label in &payload.types {
            if wire::code_for(label).is_none() {
                return Err(DnsError::InvalidInput(format!(
                    "unknown type {label:?} in NSEC bitmap"
                )));
            }
        }
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                let rec = NsecRecord {
                    next_domain,
                    types: payload.types,
                    ttl,
                };
                match zd.nsec.get(&name) {
                    Some(existing) if *existing == rec => Ok(false),
                    _ => {
                        zd.nsec.insert(name.clone(), rec);
                        Ok(true)
                    }
                }
            })
            .await
    }

    async fn delete(
        &self,
        ctx: &HandlerCtx,
        fqdn: &str,
        _value: Option<Value>,
    ) -> Result<bool, DnsError> {
        let (zone, name, _) = resolve_owner(ctx, fqdn)
            .await
            .ok_or_else(|| DnsError::NotFound(format!("no zone for {fqdn:?}")))?;
        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                Ok(zd.nsec.remove(&name).is_some())
            })
            .await
    }

    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>> {
        let (zone, name, fqdn) = resolve_owner(ctx, fqdn).await?;
        ctx.store
            .with_zone(&zone, |zd| {
                zd.nsec
                    .get(&name)
                    .and_then(|rec| rec.to_rr(&fqdn).ok())
                    .map(|rr| vec![rr])
            })
            .await
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::ctx;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_and_lookup() {
        let (ctx, _rx) = ctx().await;
        let handler = NsecRecordHandler;

        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "api",
                json!({"next_domain": "WWW.Go53.Test", "types": ["A", "RRSIG", "NSEC"]}),
                Some(300),
            )
            .await
            .unwrap();
        assert!(changed);

        let records = handler.lookup(&ctx, "api.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(u16::from(records[0].record_type()), wire::TYPE_NSEC);

        // Next domain is stored in canonical form.
        let stored = ctx
            .store
            .with_zone("go53.test.", |zd| zd.nsec["api"].clone())
            .await
            .unwrap();
        assert_eq!(stored.next_domain, "www.go53.test.");

        // Singleton: an identical re-add is a no-op.
        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "api",
                json!({"next_domain": "www.go53.test.", "types": ["A", "RRSIG", "NSEC"]}),
                Some(300),
            )
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_bitmap_type() {
        let (ctx, _rx) = ctx().await;
        let handler = NsecRecordHandler;

        let result = handler
            .add(
                &ctx,
                "go53.test.",
                "api",
                json!({"next_domain": "www.go53.test.", "types": ["A", "BOGUS"]}),
                None,
            )
            .await;
        assert!(matches!(result, Err(DnsError::InvalidInput(_))));
        assert!(!ctx.store.zone_exists("go53.test.").await);
    }

    #[tokio::test]
    async fn test_delete() {
        let (ctx, _rx) = ctx().await;
        let handler = NsecRecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                "api",
                json!({"next_domain": "www.go53.test.", "types": ["A"]}),
                None,
            )
            .await
            .unwrap();
        assert!(handler.delete(&ctx, "api.go53.test.", None).await.unwrap());
        assert!(handler.lookup(&ctx, "api.go53.test.").await.is_none());
    }
}
