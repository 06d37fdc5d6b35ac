//! RRSIG pseudo-handler.
//!
//! Signatures are produced by the signing pipeline and stored through the
//! zone store directly; user-facing add/delete are refused. Lookups take a
//! composite key `owner___COVERED-TYPE` and return every signature
//! covering that type at that owner, which is how the responder attaches
//! RRSIGs to DO-flagged answers.

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde_json::Value;

use super::{resolve_owner, HandlerCtx, RecordHandler};
use crate::errors::DnsError;
use crate::wire;

pub struct RrsigRecordHandler;

/// Separator between owner name and covered type in lookup keys.
pub const RRSIG_KEY_SEPARATOR: &str = "___";

#[async_trait]
impl RecordHandler for RrsigRecordHandler {
    fn rtype(&self) -> u16 {
        wire::TYPE_RRSIG
    }

    fn label(&self) -> &'static str {
        "RRSIG"
    }

    async fn add(
        &self,
        _ctx: &HandlerCtx,
        _zone: &str,
        _name: &str,
        _value: Value,
        _ttl: Option<u32>,
    ) -> Result<bool, DnsError> {
        Err(DnsError::NotSupported("RRSIG add".to_string()))
    }

    async fn delete(
        &self,
        _ctx: &HandlerCtx,
        _fqdn: &str,
        _value: Option<Value>,
    ) -> Result<bool, DnsError> {
        Err(DnsError::NotSupported("RRSIG delete".to_string()))
    }

    async fn lookup(&self, ctx: &HandlerCtx, key: &str) -> Option<Vec<Record>> {
        let (owner, covered) = key.split_once(RRSIG_KEY_SEPARATOR)?;
        let covered = covered.to_uppercase();
        let (zone, name, fqdn) = resolve_owner(ctx, owner).await?;

        let sigs = ctx.store.rrsigs_for(&zone, &covered, &name).await;
        let records: Vec<Record> = sigs
            .iter()
            .filter_map(|sig| sig.to_rr(&fqdn).ok())
            .collect();
        if records.is_empty() {
            None
        } else {
            Some(records)
        }
    }
}
