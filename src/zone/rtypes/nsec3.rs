//! NSEC3 record handler. Storage only, like NSEC.

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use serde_json::Value;

use super::{
    canonical_pair, effective_ttl, parse_value, resolve_owner, HandlerCtx, RecordHandler,
};
use crate::errors::DnsError;
use crate::wire;
use crate::zone::types::Nsec3Record;

pub struct Nsec3RecordHandler;

#[derive(Deserialize)]
struct Nsec3Value {
    #[serde(default = "default_hash_algorithm")]
    hash_algorithm: u8,
    #[serde(default)]
    flags: u8,
    iterations: u16,
    #[serde(default)]
    salt: String,
    next_hashed: String,
    types: Vec<String>,
}

fn default_hash_algorithm() -> u8 {
    1 // SHA-1, the only defined NSEC3 hash (RFC 5155 §11)
}

#[async_trait]
impl RecordHandler for Nsec3RecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_NSEC3
    }

    fn label(&self) -> &'static str {
        "NSEC3"
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
        let payload: Nsec3Value = parse_value(self.label(), value)?;
        if hex::decode(&payload.salt).is_err() {
            return Err(DnsError::InvalidInput("NSEC3 salt is not hex".into()));
        }
        if hex::decode(&payload.next_hashed).is_err() {
            return Err(DnsError::InvalidInput("NSEC3 next hash is not hex".into()));
        }
        for label in &payload.types {
            if wire::code_for(label).is_none() {
                return Err(DnsError::InvalidInput(format!(
                    "unknown type {label:?} in NSEC3 bitmap"
                )));
            }
        }
        let ttl = effective_ttl(ctx, ttl).await;

        ctx.store
            .modify(&zone, self.label(), &name, true, |zd| {
                let rec = Nsec3Record {
                    hash_algorithm: payload.hash_algorithm,
                    flags: payload.flags,
                    iterations: payload.iterations,
                    salt: payload.salt.to_lowercase(),
                    next_hashed: payload.next_hashed.to_lowercase(),
                    types: payload.types,
                    ttl,
                };
                match zd.nsec3.get(&name) {
                    Some(existing) if *existing == rec => Ok(false),
                    _ => {
                        zd.nsec3.insert(name.clone(), rec);
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
                Ok(zd.nsec3.remove(&name).is_some())
            })
            .await
    }

    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>> {
        let (zone, name, fqdn) = resolve_owner(ctx, fqdn).await?;
        ctx.store
            .with_zone(&zone, |zd| {
                zd.nsec3
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

    const OWNER: &str = "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom";

    #[tokio::test]
    async fn test_add_and_lookup() {
        let (ctx, _rx) = ctx().await;
        let handler = Nsec3RecordHandler;

        let changed = handler
            .add(
                &ctx,
                "go53.test.",
                OWNER,
                json!({
                    "hash_algorithm": 1,
                    "flags": 1,
                    "iterations": 10,
                    "salt": "AABB",
                    "next_hashed": "1122334455",
                    "types": ["A", "RRSIG"],
                }),
                Some(300),
            )
            .await
            .unwrap();
        assert!(changed);

        let records = handler
            .lookup(&ctx, &format!("{OWNER}.go53.test."))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(u16::from(records[0].record_type()), wire::TYPE_NSEC3);

        // Hex fields are stored lowercased.
        let stored = ctx
            .store
            .with_zone("go53.test.", |zd| zd.nsec3[OWNER].clone())
            .await
            .unwrap();
        assert_eq!(stored.salt, "aabb");
        assert_eq!(stored.next_hashed, "1122334455");
        assert_eq!(stored.iterations, 10);
    }

    #[tokio::test]
    async fn test_hash_algorithm_defaults_to_sha1() {
        let (ctx, _rx) = ctx().await;
        let handler = Nsec3RecordHandler;

        handler
            .add(
                &ctx,
                "go53.test.",
                OWNER,
                json!({
                    "iterations": 0,
                    "next_hashed": "deadbeef",
                    "types": ["A"],
                }),
                None,
            )
            .await
            .unwrap();

        let stored = ctx
            .store
            .with_zone("go53.test.", |zd| zd.nsec3[OWNER].clone())
            .await
            .unwrap();
        assert_eq!(stored.hash_algorithm, 1);
        assert_eq!(stored.flags, 0);
        assert_eq!(stored.salt, "");
    }

    #[tokio::test]
    async fn test_add_rejects_malformed_hex() {
        let (ctx, _rx) = ctx().await;
        let handler = Nsec3RecordHandler;

        // Bad salt.
        let result = handler
            .add(
                &ctx,
                "go53.test.",
                OWNER,
                json!({
                    "iterations": 0,
                    "salt": "zz",
                    "next_hashed": "deadbeef",
                    "types": ["A"],
                }),
                None,
            )
            .await;
        assert!(matches!(result, Err(DnsError::InvalidInput(_))));

        // Bad next hashed owner.
        let result = handler
            .add(
                &ctx,
                "go53.test.",
                OWNER,
                json!({
                    "iterations": 0,
                    "next_hashed": "not-hex",
                    "types": ["A"],
                }),
                None,
            )
            .await;
        assert!(matches!(result, Err(DnsError::InvalidInput(_))));
        assert!(!ctx.store.zone_exists("go53.test.").await);
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_bitmap_type() {
        let (ctx, _rx) = ctx().await;
        let handler = Nsec3RecordHandler;

        let result = handler
            .add(
                &ctx,
                "go53.test.",
                OWNER,
                json!({
                    "iterations": 0,
                    "next_hashed": "deadbeef",
                    "types": ["A", "WKS"],
                }),
                None,
            )
            .await;
        assert!(matches!(result, Err(DnsError::InvalidInput(_))));
    }
}
