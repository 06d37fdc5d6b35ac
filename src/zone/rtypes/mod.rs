//! Record handler registry.
//!
//! Every supported RR type registers a handler implementing add, delete
//! and lookup against the zone store, keyed by its wire type code. Each
//! handler owns its type's field schema, canonical-form normalization and
//! uniqueness key; the rest of the server goes through the registry and
//! never touches per-type representations directly.

mod a;
mod aaaa;
mod axfr;
mod caa;
mod cname;
mod dname;
mod dnskey;
mod ds;
mod mx;
mod ns;
mod nsec;
mod nsec3;
mod ptr;
mod rrsig;
mod soa;
mod spf;
mod srv;
mod txt;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ConfigHandle;
use crate::errors::DnsError;
use crate::util::{expand_owner, sanitize_fqdn};
use crate::zone::store::ZoneStore;
use crate::zone::types::ZoneData;

pub use soa::update_soa_serial;

/// Shared dependencies handed to every handler call.
pub struct HandlerCtx {
    pub store: Arc<ZoneStore>,
    pub config: Arc<ConfigHandle>,
}

/// Per-RR-type storage logic.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Wire type code this handler serves.
    fn rtype(&self) -> u16;

    /// Presentation-format label, also the zone-tree key.
    fn label(&self) -> &'static str;

    /// Validate `value` against the type schema and merge it into the
    /// zone. Re-adding an existing member (per-type uniqueness key) is a
    /// no-op; the return value reports whether anything changed.
    async fn add(
        &self,
        ctx: &HandlerCtx,
        zone: &str,
        name: &str,
        value: Value,
        ttl: Option<u32>,
    ) -> Result<bool, DnsError>;

    /// Delete members matching `value` at the owner name; a null filter
    /// removes the whole RRset. Reports whether anything changed.
    async fn delete(&self, ctx: &HandlerCtx, fqdn: &str, value: Option<Value>)
        -> Result<bool, DnsError>;

    /// Wire RRs for the owner name, or `None` when nothing is stored.
    async fn lookup(&self, ctx: &HandlerCtx, fqdn: &str) -> Option<Vec<Record>>;
}

/// Handler lookup table keyed by wire type code.
pub struct Registry {
    handlers: HashMap<u16, Arc<dyn RecordHandler>>,
}

impl Registry {
    /// The full standard handler set.
    pub fn standard() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(Arc::new(a::ARecordHandler));
        registry.register(Arc::new(aaaa::AaaaRecordHandler));
        registry.register(Arc::new(ns::NsRecordHandler));
        registry.register(Arc::new(mx::MxRecordHandler));
        registry.register(Arc::new(txt::TxtRecordHandler));
        registry.register(Arc::new(spf::SpfRecordHandler));
        registry.register(Arc::new(srv::SrvRecordHandler));
        registry.register(Arc::new(ptr::PtrRecordHandler));
        registry.register(Arc::new(cname::CnameRecordHandler));
        registry.register(Arc::new(dname::DnameRecordHandler));
        registry.register(Arc::new(soa::SoaRecordHandler));
        registry.register(Arc::new(caa::CaaRecordHandler));
        registry.register(Arc::new(ds::DsRecordHandler));
        registry.register(Arc::new(dnskey::DnskeyRecordHandler));
        registry.register(Arc::new(nsec::NsecRecordHandler));
        registry.register(Arc::new(nsec3::Nsec3RecordHandler));
        registry.register(Arc::new(rrsig::RrsigRecordHandler));
        registry.register(Arc::new(axfr::AxfrRecordHandler));
        registry
    }

    fn register(&mut self, handler: Arc<dyn RecordHandler>) {
        self.handlers.insert(handler.rtype(), handler);
    }

    pub fn get(&self, rtype: u16) -> Option<Arc<dyn RecordHandler>> {
        self.handlers.get(&rtype).cloned()
    }

    pub fn get_by_label(&self, label: &str) -> Option<Arc<dyn RecordHandler>> {
        let code = crate::wire::code_for(label)?;
        self.get(code)
    }
}

// --- Helpers shared by the handler implementations ---------------------------

/// Deserialize an add/delete payload into the handler's schema type.
pub(crate) fn parse_value<T: DeserializeOwned>(label: &str, value: Value) -> Result<T, DnsError> {
    serde_json::from_value(value)
        .map_err(|e| DnsError::InvalidInput(format!("{label} record payload: {e}")))
}

/// Sanitize the zone name and validate the relative owner name, returning
/// `(zone, stored_name)` in canonical form.
pub(crate) fn canonical_pair(zone: &str, name: &str) -> Result<(String, String), DnsError> {
    let zone = sanitize_fqdn(zone)?;
    let name = if name.is_empty() { "@" } else { name };
    let name = name.trim_end_matches('.').to_lowercase();
    let name = if name.is_empty() { "@".to_string() } else { name };
    if name != "@" {
        // Validating the expansion covers both the relative labels and
        // their combination with the zone.
        sanitize_fqdn(&expand_owner(&name, &zone))?;
    }
    Ok((zone, name))
}

/// Resolve a query FQDN to `(zone, stored_name, canonical_fqdn)`.
pub(crate) async fn resolve_owner(
    ctx: &HandlerCtx,
    fqdn: &str,
) -> Option<(String, String, String)> {
    let fqdn = sanitize_fqdn(fqdn).ok()?;
    let (zone, name) = ctx.store.find_zone(&fqdn).await?;
    Some((zone, name, fqdn))
}

/// Default TTL from the live configuration when the caller omits one.
pub(crate) async fn effective_ttl(ctx: &HandlerCtx, ttl: Option<u32>) -> u32 {
    match ttl {
        Some(ttl) => ttl,
        None => ctx.config.live().await.default_ttl,
    }
}

/// CNAME exclusivity, owner side: refuse data adds at names owned by a
/// CNAME. DNSSEC metadata (RRSIG, NSEC) is exempt per RFC 4035 §2.5.
pub(crate) fn reject_cname_collision(zd: &ZoneData, name: &str) -> Result<(), DnsError> {
    if zd.cname.contains_key(name) {
        return Err(DnsError::Conflict(format!(
            "CNAME already present at {name:?}"
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_dispatch_types() {
        let registry = Registry::standard();
        for label in [
            "A", "AAAA", "NS", "MX", "TXT", "SPF", "SRV", "PTR", "CNAME", "DNAME", "SOA", "CAA",
            "DS", "DNSKEY", "NSEC", "NSEC3", "RRSIG", "AXFR",
        ] {
            assert!(registry.get_by_label(label).is_some(), "missing {label}");
        }
        assert!(registry.get_by_label("NAPTR").is_none());
        assert!(registry.get_by_label("bogus").is_none());
    }

    #[test]
    fn test_canonical_pair() {
        let (zone, name) = canonical_pair("Go53.Test", "API").unwrap();
        assert_eq!(zone, "go53.test.");
        assert_eq!(name, "api");

        let (_, name) = canonical_pair("go53.test.", "").unwrap();
        assert_eq!(name, "@");

        let (_, name) = canonical_pair("go53.test.", "@").unwrap();
        assert_eq!(name, "@");

        assert!(canonical_pair("go53.test.", "bad host").is_err());
        assert!(canonical_pair("not a zone", "www").is_err());
    }
}
