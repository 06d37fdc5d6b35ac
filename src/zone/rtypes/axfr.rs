//! AXFR pseudo-handler.
//!
//! Lookup materializes the full zone with the SOA duplicated at the start
//! and end, the framing RFC 5936 §2.2 requires. Adds and deletes are
//! refused; AXFR is not a storable type.

use async_trait::async_trait;
use hickory_proto::rr::{Record, RecordType};
use serde_json::Value;

use super::{resolve_owner, HandlerCtx, RecordHandler};
use crate::errors::DnsError;

pub struct AxfrRecordHandler;

#[async_trait]
impl RecordHandler for AxfrRecordHandler {
    fn rtype(&self) -> u16 {
        252
    }

    fn label(&self) -> &'static str {
        "AXFR"
    }

    async fn add(
        &self,
        _ctx: &HandlerCtx,
        _zone: &str,
        _name: &str,
        _value: Value,
        _ttl: Option<u32>,
    ) -> Result<bool, DnsError> {
        Err(DnsError::NotSupported("AXFR add".to_string()))
    }

    async fn delete(
        &self,
        _ctx: &HandlerCtx,
        _fqdn: &str,
        _value: Option<Value>,
    ) -> Result<bool, DnsError> {
        Err(DnsError::NotSupported("AXFR delete".to_string()))
    }

    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>> {
        let (zone, _, _) = resolve_owner(ctx, fqdn).await?;
        let records = ctx.store.get_zone_records(&zone).await?;

        // The zone is only transferable with an SOA to frame it.
        let soa_at = records
            .iter()
            .position(|rr| rr.record_type() == RecordType::SOA)?;

        let mut framed = Vec::with_capacity(records.len() + 1);
        framed.push(records[soa_at].clone());
        for (idx, rr) in records.into_iter().enumerate() {
            if idx != soa_at {
                framed.push(rr);
            }
        }
        framed.push(framed[0].clone());
        Some(framed)
    }
}
