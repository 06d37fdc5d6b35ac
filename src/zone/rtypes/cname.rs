//! CNAME record handler.
//!
//! CNAME is a singleton and excludes siblings: an add is refused whenever
//! any other type already holds records at the owner name, and the other
//! data handlers refuse to add under an existing CNAME (RFC 1034 §3.6.2).

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, resolve_owner, HandlerCtx, RecordHandler,
};
use crate::errors::DnsError;
use crate::util::sanitize_fqdn;
use crate::zone::types::CnameRecord;

pub struct CnameRecordHandler;

#[derive(Deserialize)]
struct CnameValue {
    target: String,
}

#[async_trait]
impl RecordHandler for CnameRecordHandler {
    fn rtype(&self) -> u16 {
        5
    }

    fn label(&self) -> &'static str {
        "CNAME"
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
        if name == "@" {
            return Err(DnsError::Conflict("CNAME at the zone apex".to_string()));
        }
        let payload: CnameValue = parse_value(self.label(), value)?;
        let target = sanitize_fqdn(&payload.target)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                let others = zd.types_at(&name, "CNAME");
                if !others.is_empty() {
                    return Err(DnsError::Conflict(format!(
                        "{} records already present at {name:?}",
                        others.join("/")
                    )));
                }
                match zd.cname.get(&name) {
                    Some(existing) if existing.target == target && existing.ttl == ttl => Ok(false),
                    _ => {
                        zd.cname.insert(name.clone(), CnameRecord { target, ttl });
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

        // Singleton type: any delete removes the record.
        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                Ok(zd.cname.remove(&name).is_some())
            })
            .await
    }

    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>> {
        let (zone, name, fqdn) = resolve_owner(ctx, fqdn).await?;
        ctx.store
            .with_zone(&zone, |zd| {
                zd.cname
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
    use super::super::testutil::ctx;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cname_refuses_existing_other_type() {
        let (ctx, _rx) = ctx().await;

        ARecordHandler
            .add(&ctx, "go53.test.", "www", json!({"ip": "192.0.2.1"}), None)
            .await
            .unwrap();

        let result = CnameRecordHandler
            .add(
                &ctx,
                "go53.test.",
                "www",
                json!({"target": "real.go53.test."}),
                None,
            )
            .await;
        assert!(matches!(result, Err(DnsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_other_type_refuses_existing_cname() {
        let (ctx, _rx) = ctx().await;

        CnameRecordHandler
            .add(
                &ctx,
                "go53.test.",
                "alias",
                json!({"target": "real.go53.test."}),
                None,
            )
            .await
            .unwrap();

        let result = ARecordHandler
            .add(&ctx, "go53.test.", "alias", json!({"ip": "192.0.2.1"}), None)
            .await;
        assert!(matches!(result, Err(DnsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_apex_cname_rejected() {
        let (ctx, _rx) = ctx().await;
        let result = CnameRecordHandler
            .add(
                &ctx,
                "go53.test.",
                "@",
                json!({"target": "real.go53.test."}),
                None,
            )
            .await;
        assert!(matches!(result, Err(DnsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_add_replaces_and_reports_noop() {
        let (ctx, _rx) = ctx().await;
        let handler = CnameRecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                "alias",
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
                "alias",
                json!({"target": "a.go53.test."}),
                Some(300),
            )
            .await
            .unwrap();
        assert!(!changed);
        // New target replaces the singleton.
        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "alias",
                json!({"target": "b.go53.test."}),
                Some(300),
            )
            .await
            .unwrap();
        assert!(changed);

        let records = handler.lookup(&ctx, "alias.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
        match records[0].data() {
            hickory_proto::rr::RData::CNAME(target) => {
                assert_eq!(target.0.to_string(), "b.go53.test.")
            }
            other => panic!("expected CNAME rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let (ctx, _rx) = ctx().await;
        let handler = CnameRecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                "alias",
                json!({"target": "real.go53.test."}),
                None,
            )
            .await
            .unwrap();
        assert!(handler.delete(&ctx, "alias.go53.test.", None).await.unwrap());
        assert!(handler.lookup(&ctx, "alias.go53.test.").await.is_none());
    }
}
