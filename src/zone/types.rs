//! Typed record payloads and the persisted zone shape.
//!
//! Each supported RR type has a closed field schema; a zone serializes as
//! `{RRType: {OwnerName: payload}}` JSON and round-trips through serde.
//! Owner names are stored relative to the zone with `@` for the apex.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hickory_proto::rr::rdata as hrdata;
use hickory_proto::rr::rdata::NULL;
use hickory_proto::rr::{Name, RData, Record};
use serde::{Deserialize, Serialize};

use crate::errors::DnsError;
use crate::util::{ensure_fqdn, expand_owner, relativize};
use crate::wire;

fn parse_name(fqdn: &str) -> Result<Name, DnsError> {
    Name::from_ascii(fqdn).map_err(|e| DnsError::InvalidInput(format!("bad name {fqdn:?}: {e}")))
}

fn unknown_record(owner: &str, code: u16, ttl: u32, rdata: Vec<u8>) -> Result<Record, DnsError> {
    Ok(Record::from_rdata(
        parse_name(owner)?,
        ttl,
        RData::Unknown {
            code: hickory_proto::rr::RecordType::Unknown(code),
            rdata: NULL::with(rdata),
        },
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ARecord {
    pub ip: String,
    pub ttl: u32,
}

impl ARecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        let ip: Ipv4Addr = self
            .ip
            .parse()
            .map_err(|_| DnsError::InvalidInput(format!("bad IPv4 address {:?}", self.ip)))?;
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::A(hrdata::A(ip)),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AaaaRecord {
    pub ip: String,
    pub ttl: u32,
}

impl AaaaRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        let ip: Ipv6Addr = self
            .ip
            .parse()
            .map_err(|_| DnsError::InvalidInput(format!("bad IPv6 address {:?}", self.ip)))?;
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::AAAA(hrdata::AAAA(ip)),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub priority: u16,
    pub host: String,
    pub ttl: u32,
}

impl MxRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::MX(hrdata::MX::new(self.priority, parse_name(&self.host)?)),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsRecord {
    pub ns: String,
    pub ttl: u32,
}

impl NsRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::NS(hrdata::NS(parse_name(&self.ns)?)),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxtRecord {
    pub text: String,
    pub ttl: u32,
}

impl TxtRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::TXT(hrdata::TXT::new(vec![self.text.clone()])),
        ))
    }
}

/// SPF (type 99) shares the TXT wire shape (RFC 7208 §14.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpfRecord {
    pub text: String,
    pub ttl: u32,
}

impl SpfRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        unknown_record(owner, wire::TYPE_SPF, self.ttl, wire::txt_rdata(&self.text))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
    pub ttl: u32,
}

impl SrvRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::SRV(hrdata::SRV::new(
                self.priority,
                self.weight,
                self.port,
                parse_name(&self.target)?,
            )),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtrRecord {
    pub ptr: String,
    pub ttl: u32,
}

impl PtrRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::PTR(hrdata::PTR(parse_name(&self.ptr)?)),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnameRecord {
    pub target: String,
    pub ttl: u32,
}

impl CnameRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::CNAME(hrdata::CNAME(parse_name(&self.target)?)),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnameRecord {
    pub target: String,
    pub ttl: u32,
}

impl DnameRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        unknown_record(
            owner,
            wire::TYPE_DNAME,
            self.ttl,
            wire::dname_rdata(&self.target),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoaRecord {
    pub ns: String,
    pub mbox: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    pub ttl: u32,
}

impl SoaRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        Ok(Record::from_rdata(
            parse_name(owner)?,
            self.ttl,
            RData::SOA(hrdata::SOA::new(
                parse_name(&self.ns)?,
                parse_name(&self.mbox)?,
                self.serial,
                self.refresh as i32,
                self.retry as i32,
                self.expire as i32,
                self.minimum,
            )),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaaRecord {
    pub flags: u8,
    pub tag: String,
    pub value: String,
    pub ttl: u32,
}

impl CaaRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        unknown_record(
            owner,
            wire::TYPE_CAA,
            self.ttl,
            wire::caa_rdata(self.flags, &self.tag, &self.value),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    /// Hex-encoded digest.
    pub digest: String,
    pub ttl: u32,
}

impl DsRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        let digest = hex::decode(&self.digest)
            .map_err(|_| DnsError::InvalidInput("DS digest is not hex".into()))?;
        unknown_record(
            owner,
            wire::TYPE_DS,
            self.ttl,
            wire::ds_rdata(self.key_tag, self.algorithm, self.digest_type, &digest),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnskeyRecord {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    /// Base64-encoded public key in DNSKEY wire form.
    pub public_key: String,
    pub ttl: u32,
}

impl DnskeyRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        let key = BASE64
            .decode(&self.public_key)
            .map_err(|_| DnsError::InvalidInput("DNSKEY public key is not base64".into()))?;
        unknown_record(
            owner,
            wire::TYPE_DNSKEY,
            self.ttl,
            wire::dnskey_rdata(self.flags, self.protocol, self.algorithm, &key),
        )
    }

    pub fn public_key_bytes(&self) -> Result<Vec<u8>, DnsError> {
        BASE64
            .decode(&self.public_key)
            .map_err(|_| DnsError::InvalidInput("DNSKEY public key is not base64".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsecRecord {
    pub next_domain: String,
    pub types: Vec<String>,
    pub ttl: u32,
}

impl NsecRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        let codes = label_list_to_codes(&self.types)?;
        unknown_record(
            owner,
            wire::TYPE_NSEC,
            self.ttl,
            wire::nsec_rdata(&self.next_domain, &codes),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nsec3Record {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    /// Hex-encoded salt, empty for no salt.
    pub salt: String,
    /// Hex-encoded next hashed owner name.
    pub next_hashed: String,
    pub types: Vec<String>,
    pub ttl: u32,
}

impl Nsec3Record {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        let salt = hex::decode(&self.salt)
            .map_err(|_| DnsError::InvalidInput("NSEC3 salt is not hex".into()))?;
        let next = hex::decode(&self.next_hashed)
            .map_err(|_| DnsError::InvalidInput("NSEC3 next hash is not hex".into()))?;
        let codes = label_list_to_codes(&self.types)?;
        unknown_record(
            owner,
            wire::TYPE_NSEC3,
            self.ttl,
            wire::nsec3_rdata(
                self.hash_algorithm,
                self.flags,
                self.iterations,
                &salt,
                &next,
                &codes,
            ),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RrsigRecord {
    pub type_covered: String,
    pub algorithm: u8,
    pub labels: u8,
    pub orig_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: String,
    /// Base64-encoded signature.
    pub signature: String,
    pub ttl: u32,
}

impl RrsigRecord {
    pub fn to_rr(&self, owner: &str) -> Result<Record, DnsError> {
        let covered = wire::code_for(&self.type_covered).ok_or_else(|| {
            DnsError::InvalidInput(format!("unknown covered type {:?}", self.type_covered))
        })?;
        let signature = BASE64
            .decode(&self.signature)
            .map_err(|_| DnsError::InvalidInput("RRSIG signature is not base64".into()))?;
        unknown_record(
            owner,
            wire::TYPE_RRSIG,
            self.ttl,
            wire::rrsig_rdata(
                covered,
                self.algorithm,
                self.labels,
                self.orig_ttl,
                self.expiration,
                self.inception,
                self.key_tag,
                &self.signer_name,
                &signature,
            ),
        )
    }
}

fn label_list_to_codes(labels: &[String]) -> Result<Vec<u16>, DnsError> {
    labels
        .iter()
        .map(|l| {
            wire::code_for(l).ok_or_else(|| DnsError::InvalidInput(format!("unknown type {l:?}")))
        })
        .collect()
}

/// Complete in-memory image of one zone; also the persisted JSON shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneData {
    #[serde(rename = "SOA", default, skip_serializing_if = "HashMap::is_empty")]
    pub soa: HashMap<String, SoaRecord>,
    #[serde(rename = "A", default, skip_serializing_if = "HashMap::is_empty")]
    pub a: HashMap<String, Vec<ARecord>>,
    #[serde(rename = "AAAA", default, skip_serializing_if = "HashMap::is_empty")]
    pub aaaa: HashMap<String, Vec<AaaaRecord>>,
    #[serde(rename = "NS", default, skip_serializing_if = "HashMap::is_empty")]
    pub ns: HashMap<String, Vec<NsRecord>>,
    #[serde(rename = "MX", default, skip_serializing_if = "HashMap::is_empty")]
    pub mx: HashMap<String, Vec<MxRecord>>,
    #[serde(rename = "TXT", default, skip_serializing_if = "HashMap::is_empty")]
    pub txt: HashMap<String, Vec<TxtRecord>>,
    #[serde(rename = "SPF", default, skip_serializing_if = "HashMap::is_empty")]
    pub spf: HashMap<String, Vec<SpfRecord>>,
    #[serde(rename = "SRV", default, skip_serializing_if = "HashMap::is_empty")]
    pub srv: HashMap<String, Vec<SrvRecord>>,
    #[serde(rename = "PTR", default, skip_serializing_if = "HashMap::is_empty")]
    pub ptr: HashMap<String, Vec<PtrRecord>>,
    #[serde(rename = "CNAME", default, skip_serializing_if = "HashMap::is_empty")]
    pub cname: HashMap<String, CnameRecord>,
    #[serde(rename = "DNAME", default, skip_serializing_if = "HashMap::is_empty")]
    pub dname: HashMap<String, DnameRecord>,
    #[serde(rename = "CAA", default, skip_serializing_if = "HashMap::is_empty")]
    pub caa: HashMap<String, Vec<CaaRecord>>,
    #[serde(rename = "DS", default, skip_serializing_if = "HashMap::is_empty")]
    pub ds: HashMap<String, Vec<DsRecord>>,
    #[serde(rename = "DNSKEY", default, skip_serializing_if = "HashMap::is_empty")]
    pub dnskey: HashMap<String, Vec<DnskeyRecord>>,
    #[serde(rename = "NSEC", default, skip_serializing_if = "HashMap::is_empty")]
    pub nsec: HashMap<String, NsecRecord>,
    #[serde(rename = "NSEC3", default, skip_serializing_if = "HashMap::is_empty")]
    pub nsec3: HashMap<String, Nsec3Record>,
    /// Covered type -> owner -> signatures.
    #[serde(rename = "RRSIG", default, skip_serializing_if = "HashMap::is_empty")]
    pub rrsig: HashMap<String, HashMap<String, Vec<RrsigRecord>>>,
}

impl ZoneData {
    pub fn is_empty(&self) -> bool {
        *self == ZoneData::default()
    }

    /// The zone's SOA, stored under the apex marker.
    pub fn soa(&self) -> Option<&SoaRecord> {
        self.soa.get("@")
    }

    pub fn soa_mut(&mut self) -> Option<&mut SoaRecord> {
        self.soa.get_mut("@")
    }

    /// Type labels (other than RRSIG) holding records at `name`, excluding
    /// `exclude`. Drives the CNAME exclusivity rule.
    pub fn types_at(&self, name: &str, exclude: &str) -> Vec<&'static str> {
        let mut found = Vec::new();
        let mut check = |label: &'static str, present: bool| {
            if present && label != exclude {
                found.push(label);
            }
        };
        check("SOA", self.soa.contains_key(name));
        check("A", self.a.contains_key(name));
        check("AAAA", self.aaaa.contains_key(name));
        check("NS", self.ns.contains_key(name));
        check("MX", self.mx.contains_key(name));
        check("TXT", self.txt.contains_key(name));
        check("SPF", self.spf.contains_key(name));
        check("SRV", self.srv.contains_key(name));
        check("PTR", self.ptr.contains_key(name));
        check("CNAME", self.cname.contains_key(name));
        check("DNAME", self.dname.contains_key(name));
        check("CAA", self.caa.contains_key(name));
        check("DS", self.ds.contains_key(name));
        check("DNSKEY", self.dnskey.contains_key(name));
        check("NSEC", self.nsec.contains_key(name));
        check("NSEC3", self.nsec3.contains_key(name));
        found
    }

    /// Materialize every stored entry as wire RRs with expanded owner
    /// names. The SOA, if present, comes first. Entries that fail to
    /// convert are skipped; the zone keeps serving what it can.
    pub fn all_records(&self, zone: &str) -> Vec<Record> {
        let mut records = Vec::new();
        if let Some(soa) = self.soa() {
            if let Ok(rr) = soa.to_rr(zone) {
                records.push(rr);
            }
        }
        macro_rules! emit_multi {
            ($field:expr) => {
                for (name, list) in &$field {
                    let owner = expand_owner(name, zone);
                    for rec in list {
                        if let Ok(rr) = rec.to_rr(&owner) {
                            records.push(rr);
                        }
                    }
                }
            };
        }
        macro_rules! emit_single {
            ($field:expr) => {
                for (name, rec) in &$field {
                    let owner = expand_owner(name, zone);
                    if let Ok(rr) = rec.to_rr(&owner) {
                        records.push(rr);
                    }
                }
            };
        }
        emit_multi!(self.a);
        emit_multi!(self.aaaa);
        emit_multi!(self.ns);
        emit_multi!(self.mx);
        emit_multi!(self.txt);
        emit_multi!(self.spf);
        emit_multi!(self.srv);
        emit_multi!(self.ptr);
        emit_single!(self.cname);
        emit_single!(self.dname);
        emit_multi!(self.caa);
        emit_multi!(self.ds);
        emit_multi!(self.dnskey);
        emit_single!(self.nsec);
        emit_single!(self.nsec3);
        for by_owner in self.rrsig.values() {
            for (name, sigs) in by_owner {
                let owner = expand_owner(name, zone);
                for sig in sigs {
                    if let Ok(rr) = sig.to_rr(&owner) {
                        records.push(rr);
                    }
                }
            }
        }
        records
    }

    /// Fold one wire RR into the zone image; used by the AXFR import path.
    /// Duplicate members (per-type uniqueness key) are dropped. Unsupported
    /// types are skipped rather than failing the transfer.
    pub fn insert_rr(&mut self, zone: &str, record: &Record) -> Result<(), DnsError> {
        let owner_fqdn = record.name().to_string().to_lowercase();
        let owner_fqdn = if owner_fqdn.ends_with('.') {
            owner_fqdn
        } else {
            format!("{owner_fqdn}.")
        };
        let name = relativize(&owner_fqdn, zone)
            .ok_or_else(|| DnsError::InvalidInput(format!("{owner_fqdn} outside zone {zone}")))?;
        let ttl = record.ttl();
        let code = u16::from(record.record_type());
        let rdata = wire::rdata_bytes(record);

        match record.data() {
            RData::A(a) => push_unique(self.a.entry(name).or_default(), ARecord {
                ip: a.0.to_string(),
                ttl,
            }),
            RData::AAAA(aaaa) => push_unique(self.aaaa.entry(name).or_default(), AaaaRecord {
                ip: aaaa.0.to_string(),
                ttl,
            }),
            RData::NS(ns) => push_unique(self.ns.entry(name).or_default(), NsRecord {
                ns: ensure_fqdn(&ns.0.to_string()),
                ttl,
            }),
            RData::MX(mx) => push_unique(self.mx.entry(name).or_default(), MxRecord {
                priority: mx.preference(),
                host: ensure_fqdn(&mx.exchange().to_string()),
                ttl,
            }),
            RData::TXT(txt) => push_unique(self.txt.entry(name).or_default(), TxtRecord {
                text: txt
                    .txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).to_string())
                    .collect::<Vec<_>>()
                    .join(""),
                ttl,
            }),
            RData::SRV(srv) => push_unique(self.srv.entry(name).or_default(), SrvRecord {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: ensure_fqdn(&srv.target().to_string()),
                ttl,
            }),
            RData::PTR(ptr) => push_unique(self.ptr.entry(name).or_default(), PtrRecord {
                ptr: ensure_fqdn(&ptr.0.to_string()),
                ttl,
            }),
            RData::CNAME(cname) => {
                self.cname.insert(
                    name,
                    CnameRecord {
                        target: ensure_fqdn(&cname.0.to_string()),
                        ttl,
                    },
                );
            }
            RData::SOA(soa) => {
                self.soa.insert(
                    "@".to_string(),
                    SoaRecord {
                        ns: ensure_fqdn(&soa.mname().to_string()),
                        mbox: ensure_fqdn(&soa.rname().to_string()),
                        serial: soa.serial(),
                        refresh: soa.refresh() as u32,
                        retry: soa.retry() as u32,
                        expire: soa.expire() as u32,
                        minimum: soa.minimum(),
                        ttl,
                    },
                );
            }
            _ => match code {
                wire::TYPE_DNAME => {
                    self.dname.insert(
                        name,
                        DnameRecord {
                            target: wire::parse_dname_rdata(&rdata)?,
                            ttl,
                        },
                    );
                }
                wire::TYPE_SPF => push_unique(self.spf.entry(name).or_default(), SpfRecord {
                    text: wire::parse_txt_rdata(&rdata)?,
                    ttl,
                }),
                wire::TYPE_CAA => {
                    let (flags, tag, value) = wire::parse_caa_rdata(&rdata)?;
                    push_unique(self.caa.entry(name).or_default(), CaaRecord {
                        flags,
                        tag,
                        value,
                        ttl,
                    })
                }
                wire::TYPE_DS => {
                    let (key_tag, algorithm, digest_type, digest) = wire::parse_ds_rdata(&rdata)?;
                    push_unique(self.ds.entry(name).or_default(), DsRecord {
                        key_tag,
                        algorithm,
                        digest_type,
                        digest: hex::encode(digest),
                        ttl,
                    })
                }
                wire::TYPE_DNSKEY => {
                    let (flags, protocol, algorithm, key) = wire::parse_dnskey_rdata(&rdata)?;
                    push_unique(self.dnskey.entry(name).or_default(), DnskeyRecord {
                        flags,
                        protocol,
                        algorithm,
                        public_key: BASE64.encode(key),
                        ttl,
                    })
                }
                wire::TYPE_NSEC => {
                    let (next_domain, codes) = wire::parse_nsec_rdata(&rdata)?;
                    self.nsec.insert(
                        name,
                        NsecRecord {
                            next_domain,
                            types: codes.iter().map(|c| wire::label_for(*c)).collect(),
                            ttl,
                        },
                    );
                }
                wire::TYPE_NSEC3 => {
                    let fields = wire::parse_nsec3_rdata(&rdata)?;
                    self.nsec3.insert(
                        name,
                        Nsec3Record {
                            hash_algorithm: fields.hash_algorithm,
                            flags: fields.flags,
                            iterations: fields.iterations,
                            salt: hex::encode(fields.salt),
                            next_hashed: hex::encode(fields.next_hashed),
                            types: fields.types.iter().map(|c| wire::label_for(*c)).collect(),
                            ttl,
                        },
                    );
                }
                wire::TYPE_RRSIG => {
                    let fields = wire::parse_rrsig_rdata(&rdata)?;
                    let covered = wire::label_for(fields.type_covered);
                    push_unique(
                        self.rrsig
                            .entry(covered.clone())
                            .or_default()
                            .entry(name)
                            .or_default(),
                        RrsigRecord {
                            type_covered: covered,
                            algorithm: fields.algorithm,
                            labels: fields.labels,
                            orig_ttl: fields.orig_ttl,
                            expiration: fields.expiration,
                            inception: fields.inception,
                            key_tag: fields.key_tag,
                            signer_name: fields.signer_name,
                            signature: BASE64.encode(fields.signature),
                            ttl,
                        },
                    )
                }
                _ => {}
            },
        }
        Ok(())
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::RecordType;

    fn sample_zone() -> ZoneData {
        let mut zd = ZoneData::default();
        zd.soa.insert(
            "@".to_string(),
            SoaRecord {
                ns: "ns1.go53.test.".to_string(),
                mbox: "hostmaster.go53.test.".to_string(),
                serial: 250101001,
                refresh: 3600,
                retry: 900,
                expire: 1209600,
                minimum: 300,
                ttl: 3600,
            },
        );
        zd.a.insert(
            "api".to_string(),
            vec![ARecord {
                ip: "192.0.2.1".to_string(),
                ttl: 3600,
            }],
        );
        zd.mx.insert(
            "@".to_string(),
            vec![MxRecord {
                priority: 10,
                host: "mail.go53.test.".to_string(),
                ttl: 3600,
            }],
        );
        zd
    }

    #[test]
    fn test_json_round_trip() {
        let zd = sample_zone();
        let encoded = serde_json::to_vec(&zd).unwrap();
        let decoded: ZoneData = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(zd, decoded);
    }

    #[test]
    fn test_json_layout_uses_type_keys() {
        let zd = sample_zone();
        let doc = serde_json::to_value(&zd).unwrap();
        assert!(doc.get("A").is_some());
        assert!(doc.get("SOA").is_some());
        assert!(doc.get("AAAA").is_none());
        assert_eq!(doc["A"]["api"][0]["ip"], "192.0.2.1");
    }

    #[test]
    fn test_all_records_soa_first() {
        let zd = sample_zone();
        let records = zd.all_records("go53.test.");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].record_type(), RecordType::SOA);
        assert!(records
            .iter()
            .any(|r| r.name().to_string().to_lowercase().starts_with("api.go53.test")));
    }

    #[test]
    fn test_types_at_excludes_requested() {
        let zd = sample_zone();
        assert!(zd.types_at("api", "A").is_empty());
        assert_eq!(zd.types_at("@", "SOA"), vec!["MX"]);
    }

    #[test]
    fn test_insert_rr_round_trip() {
        let zd = sample_zone();
        let records = zd.all_records("go53.test.");

        let mut rebuilt = ZoneData::default();
        for rr in &records {
            rebuilt.insert_rr("go53.test.", rr).unwrap();
        }
        assert_eq!(rebuilt, zd);
    }

    #[test]
    fn test_insert_rr_dedupes() {
        let mut zd = ZoneData::default();
        let a = ARecord {
            ip: "192.0.2.1".to_string(),
            ttl: 60,
        };
        let rr = a.to_rr("www.go53.test.").unwrap();
        zd.insert_rr("go53.test.", &rr).unwrap();
        zd.insert_rr("go53.test.", &rr).unwrap();
        assert_eq!(zd.a["www"].len(), 1);
    }

    #[test]
    fn test_insert_rr_rejects_foreign_owner() {
        let mut zd = ZoneData::default();
        let a = ARecord {
            ip: "192.0.2.1".to_string(),
            ttl: 60,
        };
        let rr = a.to_rr("www.other.test.").unwrap();
        assert!(zd.insert_rr("go53.test.", &rr).is_err());
    }

    #[test]
    fn test_exotic_round_trip_through_wire() {
        let mut zd = ZoneData::default();
        zd.dnskey.insert(
            "@".to_string(),
            vec![DnskeyRecord {
                flags: 257,
                protocol: 3,
                algorithm: 13,
                public_key: BASE64.encode([1, 2, 3, 4]),
                ttl: 3600,
            }],
        );
        zd.rrsig.entry("A".to_string()).or_default().insert(
            "api".to_string(),
            vec![RrsigRecord {
                type_covered: "A".to_string(),
                algorithm: 13,
                labels: 3,
                orig_ttl: 3600,
                expiration: 1_700_000_000,
                inception: 1_600_000_000,
                key_tag: 31337,
                signer_name: "go53.test.".to_string(),
                signature: BASE64.encode([9; 64]),
                ttl: 3600,
            }],
        );
        zd.caa.insert(
            "@".to_string(),
            vec![CaaRecord {
                flags: 0,
                tag: "issue".to_string(),
                value: "ca.example.net".to_string(),
                ttl: 300,
            }],
        );

        let records = zd.all_records("go53.test.");
        let mut rebuilt = ZoneData::default();
        for rr in &records {
            rebuilt.insert_rr("go53.test.", rr).unwrap();
        }
        assert_eq!(rebuilt, zd);
    }

    #[test]
    fn test_soa_to_rr_fields() {
        let zd = sample_zone();
        let rr = zd.soa().unwrap().to_rr("go53.test.").unwrap();
        assert_eq!(rr.record_type(), RecordType::SOA);
        match rr.data() {
            RData::SOA(soa) => {
                assert_eq!(soa.serial(), 250101001);
                assert_eq!(soa.minimum(), 300);
            }
            other => panic!("expected SOA rdata, got {other:?}"),
        }
    }
}
