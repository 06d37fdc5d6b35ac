//! MX record handler. Uniqueness is the (priority, host) pair, so the same
//! exchange may appear at several preferences.

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
use crate::zone::types::MxRecord;

pub struct MxRecordHandler;

#[derive(Deserialize)]
struct MxValue {
    priority: u16,
    host: String,
}

#[async_trait]
impl RecordHandler for MxRecordHandler {
    fn rtype(&self) -> u16 {
        15
    }

    fn label(&self) -> &'static str {
        "MX"
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
        let payload: MxValue = parse_value(self.label(), value)?;
        let host = sanitize_fqdn(&payload.host)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.mx.entry(name.clone()).or_default();
                if list
                    .iter()
                    .any(|rec| rec.priority == payload.priority && rec.host == host)
                {
                    return Ok(false);
                }
                list.push(MxRecord {
                    priority: payload.priority,
                    host,
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
            Some(v) => {
                let parsed: MxValue = parse_value(self.label(), v)?;
                Some((parsed.priority, sanitize_fqdn(&parsed.host)?))
            }
            None => None,
        };

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.mx.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.mx.remove(&name);
                        Ok(true)
                    }
                    Some((priority, host)) => {
                        let before = list.len();
                        list.retain(|rec| !(rec.priority == *priority && &rec.host == host));
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.mx.remove(&name);
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
                zd.mx
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
    async fn test_uniqueness_is_priority_host_pair() {
        let (ctx, _rx) = ctx().await;
        let handler = MxRecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                "@",
                json!({"priority": 10, "host": "mail.go53.test."}),
                None,
            )
            .await
            .unwrap();
        // Same host at a different preference is a distinct member.
        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "@",
                json!({"priority": 20, "host": "mail.go53.test."}),
                None,
            )
            .await
            .unwrap();
        assert!(changed);
        // Exact pair repeats are dropped.
        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "@",
                json!({"priority": 10, "host": "mail.go53.test."}),
                None,
            )
            .await
            .unwrap();
        assert!(!changed);

        assert_eq!(handler.lookup(&ctx, "go53.test.").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_filtered_delete_matches_pair() {
        let (ctx, _rx) = ctx().await;
        let handler = MxRecordHandler;

        for priority in [10u16, 20] {
            handler
                .add(
                    &ctx,
                    "go53.test.",
                    "@",
                    json!({"priority": priority, "host": "mail.go53.test."}),
                    None,
                )
                .await
                .unwrap();
        }

        handler
            .delete(
                &ctx,
                "go53.test.",
                Some(json!({"priority": 10, "host": "mail.go53.test."})),
            )
            .await
            .unwrap();

        let records = handler.lookup(&ctx, "go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_invalid() {
        let (ctx, _rx) = ctx().await;
        let handler = MxRecordHandler;
        assert!(matches!(
            handler
                .add(&ctx, "go53.test.", "@", json!({"host": "mail.go53.test."}), None)
                .await,
            Err(DnsError::InvalidInput(_))
        ));
    }
}
