//! Background RRset signing pipeline.
//!
//! Consumes the zone store's signing queue. For each changed RRset it
//! re-reads the current records through the type registry, signs them with
//! every applicable zone key and stores the RRSIGs. Signing failures are
//! logged and never roll back the data write; the next write on the same
//! RRset retries.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ConfigHandle;
use crate::dnssec::keys::{key_id, sign_with_key, KeyStore, StoredKey, SupportedAlgorithm};
use crate::errors::DnsError;
use crate::util::label_count;
use crate::wire;
use crate::zone::rtypes::{HandlerCtx, Registry};
use crate::zone::store::{SignTask, ZoneStore};
use crate::zone::types::RrsigRecord;

/// Signature validity window: inception one hour in the past, expiration
/// seven days out.
const INCEPTION_SKEW_SECS: i64 = 3600;
const VALIDITY_SECS: i64 = 7 * 24 * 3600;

pub struct SignWorker {
    store: Arc<ZoneStore>,
    config: Arc<ConfigHandle>,
    keys: Arc<KeyStore>,
    registry: Arc<Registry>,
}

impl SignWorker {
    pub fn new(
        store: Arc<ZoneStore>,
        config: Arc<ConfigHandle>,
        keys: Arc<KeyStore>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            store,
            config,
            keys,
            registry,
        }
    }

    /// Drain the signing queue until the store side hangs up.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<SignTask>) {
        while let Some(task) = rx.recv().await {
            if let Err(e) = self.maybe_sign_rrset(&task).await {
                warn!(
                    zone = %task.zone,
                    rtype = %task.rtype,
                    name = %task.name,
                    error = %e,
                    "signing pass failed"
                );
            }
        }
    }

    /// Sign one changed RRset if DNSSEC is enabled and keys exist.
    ///
    /// The zone snapshot was already persisted by the store before the
    /// task was queued, so the user write is durable whether or not this
    /// pass succeeds.
    pub async fn maybe_sign_rrset(&self, task: &SignTask) -> Result<(), DnsError> {
        if !self.config.live().await.dnssec_enabled {
            return Ok(());
        }
        if task.rtype == "RRSIG" {
            return Ok(());
        }

        let ctx = HandlerCtx {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        };
        let handler = match self.registry.get_by_label(&task.rtype) {
            Some(handler) => handler,
            None => return Ok(()),
        };
        let owner = crate::util::expand_owner(&task.name, &task.zone);
        let mut rrset = match handler.lookup(&ctx, &owner).await {
            Some(rrset) if !rrset.is_empty() => rrset,
            // Deleted (or never materialized) since the task was queued.
            _ => return Ok(()),
        };

        let signing_dnskey = task.rtype == "DNSKEY";
        let dnskeys = self
            .store
            .with_zone(&task.zone, |zd| {
                zd.dnskey.get("@").cloned().unwrap_or_default()
            })
            .await
            .unwrap_or_default();
        if dnskeys.is_empty() {
            debug!(zone = %task.zone, "no DNSKEYs in zone, skipping signing");
            return Ok(());
        }

        for dnskey in dnskeys {
            // KSKs sign only the DNSKEY RRset; ZSKs sign everything else.
            let is_ksk = dnskey.flags == 257;
            if is_ksk != signing_dnskey {
                continue;
            }
            let Some(algorithm) = SupportedAlgorithm::from_number(dnskey.algorithm) else {
                continue;
            };
            let id = key_id(dnskey.flags, &task.zone, algorithm);
            let Some(key) = self.keys.get(&id).await else {
                warn!(zone = %task.zone, key = %id, "DNSKEY published but private key missing");
                continue;
            };

            let sig = sign_rrset(&task.zone, &mut rrset, &key)?;
            self.store
                .insert_rrsig(&task.zone, &task.rtype, &task.name, sig)
                .await?;
        }
        Ok(())
    }
}

/// Produce one RRSIG over a canonically ordered RRset (RFC 4034 §3.1.8.1:
/// sign the RRSIG RDATA minus the signature, followed by the RRset in
/// canonical form).
pub fn sign_rrset(
    zone: &str,
    rrset: &mut [hickory_proto::rr::Record],
    key: &StoredKey,
) -> Result<RrsigRecord, DnsError> {
    if rrset.is_empty() {
        return Err(DnsError::Internal("cannot sign an empty RRset".into()));
    }
    wire::sort_canonically(rrset);

    let first = &rrset[0];
    let owner = {
        let raw = first.name().to_string().to_lowercase();
        if raw.ends_with('.') {
            raw
        } else {
            format!("{raw}.")
        }
    };
    let covered_code = u16::from(first.record_type());
    let covered_label = wire::label_for(covered_code);
    let orig_ttl = first.ttl();
    let labels = label_count(&owner);

    let algorithm = SupportedAlgorithm::from_name(&key.algorithm)
        .ok_or_else(|| DnsError::CryptoFailure(format!("unknown algorithm {}", key.algorithm)))?;
    let now = Utc::now().timestamp();
    let inception = (now - INCEPTION_SKEW_SECS) as u32;
    let expiration = (now + VALIDITY_SECS) as u32;

    let mut to_sign = wire::rrsig_rdata(
        covered_code,
        algorithm.number(),
        labels,
        orig_ttl,
        expiration,
        inception,
        key.key_tag,
        zone,
        &[],
    );
    for rr in rrset.iter() {
        to_sign.extend_from_slice(&wire::canonical_rr_bytes(rr));
    }

    let signature = sign_with_key(key, &to_sign)?;
    Ok(RrsigRecord {
        type_covered: covered_label,
        algorithm: algorithm.number(),
        labels,
        orig_ttl,
        expiration,
        inception,
        key_tag: key.key_tag,
        signer_name: zone.to_string(),
        signature: BASE64.encode(signature),
        ttl: orig_ttl,
    })
}
