//! SRV record handler. Uniqueness is the (target, port) pair.

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
use crate::zone::types::SrvRecord;

pub struct SrvRecordHandler;

#[derive(Deserialize)]
struct SrvValue {
    #[serde(default)]
    priority: u16,
    #[serde(default)]
    weight: u16,
    port: u16,
    target: String,
}

#[async_trait]
impl RecordHandler for SrvRecordHandler {
    fn rtype(&self) -> u16 {
        33
    }

    fn label(&self) -> &'static str {
        "SRV"
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
        let payload: SrvValue = parse_value(self.label(), value)?;
        let target = sanitize_fqdn(&payload.target)?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.srv.entry(name.clone()).or_default();
                if list
                    .iter()
                    .any(|rec| rec.target == target && rec.port == payload.port)
                {
                    return Ok(false);
                }
                list.push(SrvRecord {
                    priority: payload.priority,
                    weight: payload.weight,
                    port: payload.port,
                    target,
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
                let parsed: SrvValue = parse_value(self.label(), v)?;
                Some((sanitize_fqdn(&parsed.target)?, parsed.port))
            }
            None => None,
        };

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.srv.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.srv.remove(&name);
                        Ok(true)
                    }
                    Some((target, port)) => {
                        let before = list.len();
                        list.retain(|rec| !(rec.target == *target && rec.port == *port));
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.srv.remove(&name);
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
                zd.srv
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
    async fn test_service_owner_names_are_accepted() {
        let (ctx, _rx) = ctx().await;
        let handler = SrvRecordHandler;

        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "_sip._tcp",
                json!({"priority": 0, "weight": 5, "port": 5060, "target": "sip.go53.test."}),
                None,
            )
            .await
            .unwrap();
        assert!(changed);

        let records = handler.lookup(&ctx, "_sip._tcp.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_uniqueness_is_target_port() {
        let (ctx, _rx) = ctx().await;
        let handler = SrvRecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                "_sip._tcp",
                json!({"port": 5060, "target": "sip.go53.test."}),
                None,
            )
            .await
            .unwrap();
        // Different weight, same (target, port): duplicate.
        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                "_sip._tcp",
                json!({"weight": 9, "port": 5060, "target": "sip.go53.test."}),
                None,
            )
            .await
            .unwrap();
        assert!(!changed);
    }
}
