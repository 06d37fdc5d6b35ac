//! TSIG transaction signatures (RFC 2845 / RFC 8945).
//!
//! Shared secrets live in the `tsig-keys` table, indexed by key name.
//! Signing and verification operate on raw message bytes: the MAC covers
//! the message (with the TSIG record absent and the original ID in place)
//! followed by the TSIG variables, and the TSIG RR itself is appended to
//! the additional section by hand. Only HMAC-SHA256 is supported.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use ring::hmac;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::DnsError;
use crate::storage::{Storage, TSIG_TABLE};
use crate::util::sanitize_fqdn;
use crate::wire::{self, TsigWire};

/// The only algorithm this server signs or accepts.
pub const HMAC_SHA256_NAME: &str = "hmac-sha256.";

/// Fudge window on outgoing signatures, seconds.
pub const DEFAULT_FUDGE: u16 = 300;

/// Name of the key created by `--generate-tsig`.
pub const DEFAULT_KEY_NAME: &str = "transfer.zone53.";

/// A TSIG shared secret as persisted in the `tsig-keys` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TsigKey {
    pub algorithm: String,
    /// Base64-encoded shared secret.
    pub secret: String,
}

/// Outcome of checking an inbound message against the key store.
#[derive(Debug)]
pub enum TsigCheck {
    /// Message carried no TSIG record.
    Unsigned,
    /// TSIG present and valid; the payload is the message with the TSIG
    /// stripped, plus the verified key name and MAC (kept for response
    /// signing).
    Verified {
        stripped: Vec<u8>,
        key_name: String,
        mac: Vec<u8>,
    },
    /// TSIG present but invalid.
    Rejected(TsigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigError {
    BadKey,
    BadSig,
    BadTime,
    BadAlgorithm,
}

pub struct TsigStore {
    storage: Arc<dyn Storage>,
    keys: RwLock<HashMap<String, TsigKey>>,
}

impl TsigStore {
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Arc<Self>, DnsError> {
        let store = Arc::new(Self {
            storage,
            keys: RwLock::new(HashMap::new()),
        });
        store.reload().await?;
        Ok(store)
    }

    /// Re-read the `tsig-keys` table; called after management-API changes.
    pub async fn reload(&self) -> Result<(), DnsError> {
        let table = self.storage.load_table(TSIG_TABLE).await?;
        let mut keys = HashMap::with_capacity(table.len());
        for (name, raw) in table {
            let key: TsigKey = serde_json::from_slice(&raw)
                .map_err(|e| DnsError::StorageFailure(format!("decode TSIG key {name}: {e}")))?;
            keys.insert(canonical_key_name(&name), key);
        }
        *self.keys.write().await = keys;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<TsigKey> {
        self.keys.read().await.get(&canonical_key_name(name)).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        self.keys.read().await.keys().cloned().collect()
    }

    pub async fn save(&self, name: &str, key: TsigKey) -> Result<(), DnsError> {
        sanitize_fqdn(name)?;
        BASE64
            .decode(&key.secret)
            .map_err(|_| DnsError::InvalidInput("TSIG secret is not base64".into()))?;
        let encoded = serde_json::to_vec(&key)
            .map_err(|e| DnsError::Internal(format!("encode TSIG key {name}: {e}")))?;
        self.storage
            .save_table(TSIG_TABLE, name.trim_end_matches('.'), &encoded)
            .await?;
        self.keys.write().await.insert(canonical_key_name(name), key);
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), DnsError> {
        self.storage
            .delete_from_table(TSIG_TABLE, name.trim_end_matches('.'))
            .await?;
        self.keys.write().await.remove(&canonical_key_name(name));
        Ok(())
    }

    /// Create the default transfer key unless one already exists.
    pub async fn ensure_default_key(&self) -> Result<(), DnsError> {
        if self.get(DEFAULT_KEY_NAME).await.is_some() {
            return Ok(());
        }
        let key = TsigKey {
            algorithm: HMAC_SHA256_NAME.to_string(),
            secret: generate_secret(),
        };
        self.save(DEFAULT_KEY_NAME, key).await?;
        info!(key = DEFAULT_KEY_NAME, "generated default TSIG key");
        Ok(())
    }

    /// First stored key, used to sign outbound NOTIFY when enforcement is
    /// on and no peer-specific key is configured.
    pub async fn any_key(&self) -> Option<(String, TsigKey)> {
        let keys = self.keys.read().await;
        let mut names: Vec<&String> = keys.keys().collect();
        names.sort();
        names
            .first()
            .map(|name| ((*name).clone(), keys[*name].clone()))
    }

    /// Append a TSIG record to raw message bytes.
    pub async fn sign(
        &self,
        message: &[u8],
        key_name: &str,
        prior_mac: Option<&[u8]>,
        now: u64,
    ) -> Result<Vec<u8>, DnsError> {
        let key = self
            .get(key_name)
            .await
            .ok_or_else(|| DnsError::NotFound(format!("TSIG key {key_name}")))?;
        sign_message(message, key_name, &key, prior_mac, now)
    }

    /// Validate a raw inbound message (RFC 2845 §4.6: a message carrying
    /// a TSIG must always be checked; unsigned messages are reported for
    /// the caller's `enforce_tsig` policy).
    pub async fn check(&self, raw: &[u8], now: u64) -> TsigCheck {
        let Some((stripped, tsig)) = wire::strip_tsig(raw) else {
            return TsigCheck::Unsigned;
        };
        let Some(key) = self.get(&tsig.key_name).await else {
            return TsigCheck::Rejected(TsigError::BadKey);
        };
        match verify_stripped(&stripped, &tsig, &key, None, now) {
            Ok(()) => TsigCheck::Verified {
                stripped,
                key_name: tsig.key_name.clone(),
                mac: tsig.mac.clone(),
            },
            Err(e) => TsigCheck::Rejected(e),
        }
    }
}

fn canonical_key_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    if lowered.ends_with('.') {
        lowered
    } else {
        format!("{lowered}.")
    }
}

/// 32 random bytes, base64.
pub fn generate_secret() -> String {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    BASE64.encode(secret)
}

/// TSIG variables covered by the MAC (RFC 2845 §3.4.2).
fn tsig_variables(key_name: &str, time_signed: u64, fudge: u16, error: u16, other: &[u8]) -> Vec<u8> {
    let mut vars = wire::name_to_wire(key_name);
    vars.extend_from_slice(&255u16.to_be_bytes()); // class ANY
    vars.extend_from_slice(&0u32.to_be_bytes()); // TTL
    vars.extend_from_slice(&wire::name_to_wire(HMAC_SHA256_NAME));
    vars.extend_from_slice(&time_signed.to_be_bytes()[2..8]);
    vars.extend_from_slice(&fudge.to_be_bytes());
    vars.extend_from_slice(&error.to_be_bytes());
    vars.extend_from_slice(&(other.len() as u16).to_be_bytes());
    vars.extend_from_slice(other);
    vars
}

fn compute_mac(
    secret: &[u8],
    message: &[u8],
    variables: &[u8],
    prior_mac: Option<&[u8]>,
) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let mut data = Vec::with_capacity(
        message.len() + variables.len() + prior_mac.map(|m| m.len() + 2).unwrap_or(0),
    );
    // A prior MAC (request MAC on responses, previous envelope on AXFR
    // streams) is prefixed with its length (RFC 2845 §4.2).
    if let Some(mac) = prior_mac {
        data.extend_from_slice(&(mac.len() as u16).to_be_bytes());
        data.extend_from_slice(mac);
    }
    data.extend_from_slice(message);
    data.extend_from_slice(variables);
    hmac::sign(&key, &data).as_ref().to_vec()
}

/// Sign raw message bytes with `key`, appending the TSIG record and
/// bumping ARCOUNT.
pub fn sign_message(
    message: &[u8],
    key_name: &str,
    key: &TsigKey,
    prior_mac: Option<&[u8]>,
    now: u64,
) -> Result<Vec<u8>, DnsError> {
    if message.len() < 12 {
        return Err(DnsError::InvalidInput("message too short to sign".into()));
    }
    if !key.algorithm.trim_end_matches('.').eq_ignore_ascii_case("hmac-sha256") {
        return Err(DnsError::NotSupported(format!(
            "TSIG algorithm {}",
            key.algorithm
        )));
    }
    let secret = BASE64
        .decode(&key.secret)
        .map_err(|_| DnsError::CryptoFailure("TSIG secret is not base64".into()))?;

    let key_name = canonical_key_name(key_name);
    let original_id = u16::from_be_bytes([message[0], message[1]]);
    let variables = tsig_variables(&key_name, now, DEFAULT_FUDGE, 0, &[]);
    let mac = compute_mac(&secret, message, &variables, prior_mac);

    // TSIG RDATA: algorithm, time (48 bit), fudge, MAC, original ID,
    // error, other-len.
    let mut rdata = wire::name_to_wire(HMAC_SHA256_NAME);
    rdata.extend_from_slice(&now.to_be_bytes()[2..8]);
    rdata.extend_from_slice(&DEFAULT_FUDGE.to_be_bytes());
    rdata.extend_from_slice(&(mac.len() as u16).to_be_bytes());
    rdata.extend_from_slice(&mac);
    rdata.extend_from_slice(&original_id.to_be_bytes());
    rdata.extend_from_slice(&0u16.to_be_bytes());
    rdata.extend_from_slice(&0u16.to_be_bytes());

    let mut signed = message.to_vec();
    let arcount = u16::from_be_bytes([signed[10], signed[11]]) + 1;
    signed[10..12].copy_from_slice(&arcount.to_be_bytes());
    signed.extend_from_slice(&wire::name_to_wire(&key_name));
    signed.extend_from_slice(&wire::TYPE_TSIG.to_be_bytes());
    signed.extend_from_slice(&255u16.to_be_bytes()); // class ANY
    signed.extend_from_slice(&0u32.to_be_bytes()); // TTL
    signed.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    signed.extend_from_slice(&rdata);
    Ok(signed)
}

/// Verify a TSIG that `wire::strip_tsig` pulled off a message.
pub fn verify_stripped(
    stripped: &[u8],
    tsig: &TsigWire,
    key: &TsigKey,
    prior_mac: Option<&[u8]>,
    now: u64,
) -> Result<(), TsigError> {
    if tsig
        .algorithm
        .trim_end_matches('.')
        .to_lowercase()
        != "hmac-sha256"
    {
        return Err(TsigError::BadAlgorithm);
    }
    let secret = BASE64.decode(&key.secret).map_err(|_| TsigError::BadKey)?;

    let variables = tsig_variables(
        &tsig.key_name,
        tsig.time_signed,
        tsig.fudge,
        tsig.error,
        &tsig.other,
    );
    let expected = compute_mac(&secret, stripped, &variables, prior_mac);
    if ring::constant_time::verify_slices_are_equal(&expected, &tsig.mac).is_err() {
        return Err(TsigError::BadSig);
    }

    let skew = now.abs_diff(tsig.time_signed);
    if skew > tsig.fudge as u64 {
        return Err(TsigError::BadTime);
    }
    Ok(())
}
