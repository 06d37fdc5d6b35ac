//! DS record handler. Stored like any other data type; DS derivation from
//! hosted keys lives in the DNSSEC engine.

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
use crate::zone::types::DsRecord;

pub struct DsRecordHandler;

#[derive(Deserialize)]
struct DsValue {
    key_tag: u16,
    algorithm: u8,
    digest_type: u8,
    digest: String,
}

#[async_trait]
impl RecordHandler for DsRecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_DS
    }

    fn label(&self) -> &'static str {
        "DS"
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
        let payload: DsValue = parse_value(self.label(), value)?;
        let digest = payload.digest.to_lowercase();
        if hex::decode(&digest).is_err() {
            return Err(DnsError::InvalidInput("DS digest is not hex".into()));
        }
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                reject_cname_collision(zd, &name)?;
                let list = zd.ds.entry(name.clone()).or_default();
                if list.iter().any(|rec| {
                    rec.key_tag == payload.key_tag
                        && rec.algorithm == payload.algorithm
                        && rec.digest_type == payload.digest_type
                        && rec.digest == digest
                }) {
                    return Ok(false);
                }
                list.push(DsRecord {
                    key_tag: payload.key_tag,
                    algorithm: payload.algorithm,
                    digest_type: payload.digest_type,
                    digest,
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
        let filter = value
            .map(|v| parse_value::<DsValue>(self.label(), v))
            .transpose()?;

        ctx.store
            .modify(&zone, self.label(), &name, false, |zd| {
                let Some(list) = zd.ds.get_mut(&name) else {
                    return Ok(false);
                };
                match &filter {
                    None => {
                        zd.ds.remove(&name);
                        Ok(true)
                    }
                    Some(f) => {
                        let digest = f.digest.to_lowercase();
                        let before = list.len();
                        list.retain(|rec| {
                            !(rec.key_tag == f.key_tag
                                && rec.algorithm == f.algorithm
                                && rec.digest_type == f.digest_type
                                && rec.digest == digest)
                        });
                        let changed = list.len() != before;
                        if list.is_empty() {
                            zd.ds.remove(&name);
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
                zd.ds
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

    fn ds_value(key_tag: u16, digest: &str) -> serde_json::Value {
        json!({
            "key_tag": key_tag,
            "algorithm": 13,
            "digest_type": 2,
            "digest": digest,
        })
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let (ctx, _rx) = ctx().await;
        let handler = DsRecordHandler;

        let changed = handler
            .add(&ctx, "go53.test.", "child", ds_value(31337, "AB12CD"), Some(300))
            .await
            .unwrap();
        assert!(changed);

        let records = handler.lookup(&ctx, "child.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(u16::from(records[0].record_type()), wire::TYPE_DS);
        assert_eq!(records[0].ttl(), 300);

        // The digest is stored lowercased.
        let stored = ctx
            .store
            .with_zone("go53.test.", |zd| zd.ds["child"][0].clone())
            .await
            .unwrap();
        assert_eq!(stored.digest, "ab12cd");
    }

    #[tokio::test]
    async fn test_duplicate_add_is_noop() {
        let (ctx, _rx) = ctx().await;
        let handler = DsRecordHandler;

        handler
            .add(&ctx, "go53.test.", "child", ds_value(31337, "ab12cd"), None)
            .await
            .unwrap();
        // Case-insensitive duplicate of the same digest.
        let changed = handler
            .add(&ctx, "go53.test.", "child", ds_value(31337, "AB12CD"), None)
            .await
            .unwrap();
        assert!(!changed);

        // A different key tag is a distinct member.
        let changed = handler
            .add(&ctx, "go53.test.", "child", ds_value(31338, "ab12cd"), None)
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(handler.lookup(&ctx, "child.go53.test.").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_rejects_non_hex_digest() {
        let (ctx, _rx) = ctx().await;
        let handler = DsRecordHandler;
        assert!(matches!(
            handler
                .add(&ctx, "go53.test.", "child", ds_value(31337, "not-hex"), None)
                .await,
            Err(DnsError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_filtered_delete_removes_only_match() {
        let (ctx, _rx) = ctx().await;
        let handler = DsRecordHandler;

        for key_tag in [31337u16, 31338] {
            handler
                .add(&ctx, "go53.test.", "child", ds_value(key_tag, "ab12cd"), None)
                .await
                .unwrap();
        }

        let changed = handler
            .delete(&ctx, "child.go53.test.", Some(ds_value(31337, "AB12CD")))
            .await
            .unwrap();
        assert!(changed);

        let records = handler.lookup(&ctx, "child.go53.test.").await.unwrap();
        assert_eq!(records.len(), 1);
        let remaining = ctx
            .store
            .with_zone("go53.test.", |zd| zd.ds["child"][0].key_tag)
            .await
            .unwrap();
        assert_eq!(remaining, 31338);
    }

    #[tokio::test]
    async fn test_bare_delete_removes_whole_rrset() {
        let (ctx, _rx) = ctx().await;
        let handler = DsRecordHandler;

        for key_tag in [31337u16, 31338] {
            handler
                .add(&ctx, "go53.test.", "child", ds_value(key_tag, "ab12cd"), None)
                .await
                .unwrap();
        }

        let changed = handler.delete(&ctx, "child.go53.test.", None).await.unwrap();
        assert!(changed);
        assert!(handler.lookup(&ctx, "child.go53.test.").await.is_none());

        let gone = ctx
            .store
            .with_zone("go53.test.", |zd| zd.ds.contains_key("child"))
            .await
            .unwrap();
        assert!(!gone);
    }
}
