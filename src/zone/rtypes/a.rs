//! A record handler.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, reject_cname_collision, resolve_owner, HandlerCtx,
    RecordHandler,
};
use crate::errors::DnsError;
use crate::zone::types::ARecord;

pub struct ARecordHandler;

#[derive(Deserialize)]
struct AValue {
    ip: String,
}

/// Delete filters accept either the add payload shape or a bare address.
fn filter_ip(value: Value) -> Result<String, DnsError> {
    match value {
        Value::String(ip) => Ok(ip),
        other => parse_value::<AValue>("A", other).map(|v| v.ip),
    }
}

#[async_trait]
impl RecordHandler for ARecordHandler {
    fn rtype(&self) -> u16 {
        1
    }

    fn label(&self) -> &'static str {
        "A"
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
        let payload: AValue = parse_value(self.label(), value)?;
        let ip: Ipv4Addr = payload
            .ip
            .parse()
            .map_err(|_| DnsError::InvalidInput(format!("invalid IPv4 address {:?}", payload.ip)))?;
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.a.entry(name.clone()).or_default();
                if list.iter().any(|rec| rec.ip == ip.to_string()) {
                    return Ok(false);
                }
                list.push(ARecord {
                    ip: ip.to_string(),
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
        let filter = value.map(filter_ip).transpose()?;

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.a.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.a.remove(&name);
                        Ok(true)
                    }
                    Some(ip) => {
                        let before = list.len();
                        list.retain(|rec| &rec.ip != ip);
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.a.remove(&name);
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
                zd.a.get(&name)
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
    use hickory_proto::rr::RecordType;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_and_lookup() {
        let (ctx, _rx) = ctx().await;
        let handler = ARecordHandler;

        let changed = handler
            .add(&ctx, "go53.test.", "api", json!({"ip": "192.0.2.1"}), Some(3600))
            .await
            .unwrap();
        assert!(changed);

        let records = handler.lookup(&ctx, "api.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type(), RecordType::A);
        assert_eq!(records[0].ttl(), 3600);
    }

    #[tokio::test]
    async fn test_duplicate_add_is_noop() {
        let (ctx, _rx) = ctx().await;
        let handler = ARecordHandler;

        handler
            .add(&ctx, "go53.test.", "api", json!({"ip": "192.0.2.1"}), None)
            .await
            .unwrap();
        let changed = handler
            .add(&ctx, "go53.test.", "api", json!({"ip": "192.0.2.1"}), None)
            .await
            .unwrap();
        assert!(!changed);

        let records = handler.lookup(&ctx, "api.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_input() {
        let (ctx, _rx) = ctx().await;
        let handler = ARecordHandler;

        assert!(matches!(
            handler
                .add(&ctx, "go53.test.", "api", json!({"ip": "not-an-ip"}), None)
                .await,
            Err(DnsError::InvalidInput(_))
        ));
        assert!(matches!(
            handler
                .add(&ctx, "go53.test.", "bad name", json!({"ip": "192.0.2.1"}), None)
                .await,
            Err(DnsError::InvalidInput(_))
        ));
        // The failed adds must not have created state.
        assert!(!ctx.store.zone_exists("go53.test.").await);
    }

    #[tokio::test]
    async fn test_delete_member_and_whole_rrset() {
        let (ctx, _rx) = ctx().await;
        let handler = ARecordHandler;

        for ip in ["192.0.2.1", "192.0.2.2"] {
            handler
                .add(&ctx, "go53.test.", "api", json!({ "ip": ip }), None)
                .await
                .unwrap();
        }

        // Filtered delete removes one member.
        let changed = handler
            .delete(&ctx, "api.go53.test.", Some(json!("192.0.2.1")))
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(handler.lookup(&ctx, "api.go53.test.").await.unwrap().len(), 1);

        // Null filter removes the rest.
        handler.delete(&ctx, "api.go53.test.", None).await.unwrap();
        assert!(handler.lookup(&ctx, "api.go53.test.").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_last_member_removes_rrset() {
        let (ctx, _rx) = ctx().await;
        let handler = ARecordHandler;

        handler
            .add(&ctx, "go53.test.", "api", json!({"ip": "192.0.2.1"}), None)
            .await
            .unwrap();
        handler
            .delete(&ctx, "api.go53.test.", Some(json!({"ip": "192.0.2.1"})))
            .await
            .unwrap();

        let empty = ctx
            .store
            .with_zone("go53.test.", |zd| zd.a.contains_key("api"))
            .await
            .unwrap();
        assert!(!empty);
    }
}
