//! DNAME record handler. Singleton per owner, like CNAME, but without the
//! sibling-exclusion rule (RFC 6672 permits other types at the owner).

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
use crate::zone::types::DnameRecord;

pub struct DnameRecordHandler;

#[derive(Deserialize)]
struct DnameValue {
    target: String,
}

#[async_trait]
impl RecordHandler for DnameRecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_DNAME
    }

    fn label(&self) -> &'static str {
        "DNAME"
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
        let payload: DnameValue = parse_value(self.label(), value)?;
        let target = sanitize_fqdn(&payload.target)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                match zd.dname.get(&name) {
                    Some(existing) if existing.target == target && existing.ttl == ttl => Ok(false),
                    _ => {
                        zd.dname.insert(name.clone(), DnameRecord { target, ttl });
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
                Ok(zd.dname.remove(&name).is_some())
            })
            .await
    }

    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>> {
        let (zone, name, fqdn) = resolve_owner(ctx, fqdn).await?;
        ctx.store
            .with_zone(&zone, |zd| {
                zd.dname
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
    use super::super::a::ARecordHandler;
    use super::super::cname::CnameRecordHandler;
    use super::super::testutil::ctx;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_and_lookup() {
        let (ctx, _rx) = ctx().await;
        let handler = DnameRecordHandler;

        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "legacy",
                json!({"target": "Modern.Go53.Test"}),
                Some(300),
            )
            .await
            .unwrap();
        assert!(changed);

        let records = handler.lookup(&ctx, "legacy.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(u16::from(records[0].record_type()), wire::TYPE_DNAME);

        // Target lands in canonical form.
        let stored = ctx
            .store
            .with_zone("go53.test.", |zd| zd.dname["legacy"].clone())
            .await
            .unwrap();
        assert_eq!(stored.target, "modern.go53.test.");
    }

    #[tokio::test]
    async fn test_coexists_with_other_types_unlike_cname() {
        let (ctx, _rx) = ctx().await;

        ARecordHandler
            .add(&ctx, "go53.test.", "sub", json!({"ip": "192.0.2.1"}), None)
            .await
            .unwrap();

        // A CNAME at the same owner is refused...
        let result = CnameRecordHandler
            .add(
                &ctx,
                "go53.test.",
                "sub",
                json!({"target": "other.go53.test."}),
                None,
            )
            .await;
        assert!(matches!(result, Err(DnsError::Conflict(_))));

        // ...but a DNAME may sit next to the A RRset (RFC 6672 §2.4).
        let changed = DnameRecordHandler
            .add(
                &ctx,
                "go53.test.",
                "sub",
                json!({"target": "other.go53.test."}),
                None,
            )
            .await
            .unwrap();
        assert!(changed);

        // And further data adds at the owner still succeed.
        let changed = ARecordHandler
            .add(&ctx, "go53.test.", "sub", json!({"ip": "192.0.2.2"}), None)
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_singleton_replace_and_noop() {
        let (ctx, _rx) = ctx().await;
        let handler = DnameRecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                "legacy",
                json!({"target": "a.go53.test."}),
                Some(300),
            )
            .await
            .unwrap();
        // Identical record: no-op.
        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "legacy",
                json!({"target": "a.go53.test."}),
                Some(300),
            )
            .await
            .unwrap();
        assert!(!changed);
        // A new target replaces the singleton.
        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "legacy",
                json!({"target": "b.go53.test."}),
                Some(300),
            )
            .await
            .unwrap();
        assert!(changed);

        let stored = ctx
            .store
            .with_zone("go53.test.", |zd| zd.dname["legacy"].clone())
            .await
            .unwrap();
        assert_eq!(stored.target, "b.go53.test.");
    }

    #[tokio::test]
    async fn test_delete() {
        let (ctx, _rx) = ctx().await;
        let handler = DnameRecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                "legacy",
                json!({"target": "a.go53.test."}),
                None,
            )
            .await
            .unwrap();
        assert!(handler.delete(&ctx, "legacy.go53.test.", None).await.unwrap());
        assert!(handler.lookup(&ctx, "legacy.go53.test.").await.is_none());
    }
}
