//! Low-level wire helpers.
//!
//! hickory-proto handles message framing and the common RDATA shapes; this
//! module supplies what it does not cover for an authoritative server:
//! canonical name encoding, RDATA codecs for the DNSSEC-era types carried
//! as opaque RDATA, canonical RRset ordering, and raw-byte scanning of
//! incoming messages for the OPT pseudo-record and a trailing TSIG.

use hickory_proto::rr::{Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;

use crate::errors::DnsError;

/// DNS wire type codes used where hickory has no first-class RDATA.
pub const TYPE_DNAME: u16 = 39;
pub const TYPE_DS: u16 = 43;
pub const TYPE_RRSIG: u16 = 46;
pub const TYPE_NSEC: u16 = 47;
pub const TYPE_DNSKEY: u16 = 48;
pub const TYPE_NSEC3: u16 = 50;
pub const TYPE_SPF: u16 = 99;
pub const TYPE_TSIG: u16 = 250;
pub const TYPE_CAA: u16 = 257;
pub const TYPE_OPT: u16 = 41;

/// Canonical (lowercase, uncompressed) wire encoding of a domain name.
pub fn name_to_wire(name: &str) -> Vec<u8> {
    let mut wire = Vec::with_capacity(name.len() + 2);
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        let lower = label.to_lowercase();
        wire.push(lower.len() as u8);
        wire.extend_from_slice(lower.as_bytes());
    }
    wire.push(0);
    wire
}

/// Parse an uncompressed name from `buf` starting at `off`.
///
/// Returns the dotted FQDN and the offset one past the root label.
/// Compression pointers are rejected; they may not appear inside the RDATA
/// this module decodes (RFC 4034 §6.2).
pub fn name_from_wire(buf: &[u8], mut off: usize) -> Result<(String, usize), DnsError> {
    let mut labels: Vec<String> = Vec::new();
    loop {
        let len = *buf
            .get(off)
            .ok_or_else(|| DnsError::InvalidInput("truncated name".into()))? as usize;
        if len == 0 {
            off += 1;
            break;
        }
        if len & 0xC0 != 0 {
            return Err(DnsError::InvalidInput("compressed name in rdata".into()));
        }
        off += 1;
        let label = buf
            .get(off..off + len)
            .ok_or_else(|| DnsError::InvalidInput("truncated label".into()))?;
        labels.push(String::from_utf8_lossy(label).to_lowercase());
        off += len;
    }
    if labels.is_empty() {
        return Ok((".".to_string(), off));
    }
    Ok((format!("{}.", labels.join(".")), off))
}

// --- RDATA codecs ------------------------------------------------------------

pub fn dname_rdata(target: &str) -> Vec<u8> {
    name_to_wire(target)
}

pub fn parse_dname_rdata(rdata: &[u8]) -> Result<String, DnsError> {
    Ok(name_from_wire(rdata, 0)?.0)
}

/// Character-string encoding shared by TXT and SPF.
pub fn txt_rdata(text: &str) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(text.len() + 1);
    for chunk in text.as_bytes().chunks(255) {
        rdata.push(chunk.len() as u8);
        rdata.extend_from_slice(chunk);
    }
    if text.is_empty() {
        rdata.push(0);
    }
    rdata
}

pub fn parse_txt_rdata(rdata: &[u8]) -> Result<String, DnsError> {
    let mut out = String::new();
    let mut off = 0;
    while off < rdata.len() {
        let len = rdata[off] as usize;
        off += 1;
        let chunk = rdata
            .get(off..off + len)
            .ok_or_else(|| DnsError::InvalidInput("truncated character-string".into()))?;
        out.push_str(&String::from_utf8_lossy(chunk));
        off += len;
    }
    Ok(out)
}

pub fn caa_rdata(flags: u8, tag: &str, value: &str) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(2 + tag.len() + value.len());
    rdata.push(flags);
    rdata.push(tag.len() as u8);
    rdata.extend_from_slice(tag.as_bytes());
    rdata.extend_from_slice(value.as_bytes());
    rdata
}

pub fn parse_caa_rdata(rdata: &[u8]) -> Result<(u8, String, String), DnsError> {
    if rdata.len() < 2 {
        return Err(DnsError::InvalidInput("short CAA rdata".into()));
    }
    let flags = rdata[0];
    let tag_len = rdata[1] as usize;
    let tag = rdata
        .get(2..2 + tag_len)
        .ok_or_else(|| DnsError::InvalidInput("truncated CAA tag".into()))?;
    let value = &rdata[2 + tag_len..];
    Ok((
        flags,
        String::from_utf8_lossy(tag).to_string(),
        String::from_utf8_lossy(value).to_string(),
    ))
}

pub fn ds_rdata(key_tag: u16, algorithm: u8, digest_type: u8, digest: &[u8]) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(4 + digest.len());
    rdata.extend_from_slice(&key_tag.to_be_bytes());
    rdata.push(algorithm);
    rdata.push(digest_type);
    rdata.extend_from_slice(digest);
    rdata
}

pub fn parse_ds_rdata(rdata: &[u8]) -> Result<(u16, u8, u8, Vec<u8>), DnsError> {
    if rdata.len() < 4 {
        return Err(DnsError::InvalidInput("short DS rdata".into()));
    }
    Ok((
        u16::from_be_bytes([rdata[0], rdata[1]]),
        rdata[2],
        rdata[3],
        rdata[4..].to_vec(),
    ))
}

pub fn dnskey_rdata(flags: u16, protocol: u8, algorithm: u8, public_key: &[u8]) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(4 + public_key.len());
    rdata.extend_from_slice(&flags.to_be_bytes());
    rdata.push(protocol);
    rdata.push(algorithm);
    rdata.extend_from_slice(public_key);
    rdata
}

pub fn parse_dnskey_rdata(rdata: &[u8]) -> Result<(u16, u8, u8, Vec<u8>), DnsError> {
    if rdata.len() < 4 {
        return Err(DnsError::InvalidInput("short DNSKEY rdata".into()));
    }
    Ok((
        u16::from_be_bytes([rdata[0], rdata[1]]),
        rdata[2],
        rdata[3],
        rdata[4..].to_vec(),
    ))
}

/// RRSIG RDATA. `signature` empty yields the to-be-signed prefix used by
/// the signing pipeline (RFC 4034 §3.1.8.1).
#[allow(clippy::too_many_arguments)]
pub fn rrsig_rdata(
    type_covered: u16,
    algorithm: u8,
    labels: u8,
    orig_ttl: u32,
    expiration: u32,
    inception: u32,
    key_tag: u16,
    signer_name: &str,
    signature: &[u8],
) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(18 + signer_name.len() + signature.len());
    rdata.extend_from_slice(&type_covered.to_be_bytes());
    rdata.push(algorithm);
    rdata.push(labels);
    rdata.extend_from_slice(&orig_ttl.to_be_bytes());
    rdata.extend_from_slice(&expiration.to_be_bytes());
    rdata.extend_from_slice(&inception.to_be_bytes());
    rdata.extend_from_slice(&key_tag.to_be_bytes());
    rdata.extend_from_slice(&name_to_wire(signer_name));
    rdata.extend_from_slice(signature);
    rdata
}

pub struct RrsigFields {
    pub type_covered: u16,
    pub algorithm: u8,
    pub labels: u8,
    pub orig_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: String,
    pub signature: Vec<u8>,
}

pub fn parse_rrsig_rdata(rdata: &[u8]) -> Result<RrsigFields, DnsError> {
    if rdata.len() < 18 {
        return Err(DnsError::InvalidInput("short RRSIG rdata".into()));
    }
    let (signer_name, off) = name_from_wire(rdata, 18)?;
    Ok(RrsigFields {
        type_covered: u16::from_be_bytes([rdata[0], rdata[1]]),
        algorithm: rdata[2],
        labels: rdata[3],
        orig_ttl: u32::from_be_bytes([rdata[4], rdata[5], rdata[6], rdata[7]]),
        expiration: u32::from_be_bytes([rdata[8], rdata[9], rdata[10], rdata[11]]),
        inception: u32::from_be_bytes([rdata[12], rdata[13], rdata[14], rdata[15]]),
        key_tag: u16::from_be_bytes([rdata[16], rdata[17]]),
        signer_name,
        signature: rdata[off..].to_vec(),
    })
}

/// NSEC type bitmap (RFC 4034 §4.1.2).
pub fn type_bitmap(types: &[u16]) -> Vec<u8> {
    let mut sorted: Vec<u16> = types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut bitmap = Vec::new();
    let mut idx = 0;
    while idx < sorted.len() {
        let window = (sorted[idx] >> 8) as u8;
        let mut bits = [0u8; 32];
        let mut max_octet = 0usize;
        while idx < sorted.len() && (sorted[idx] >> 8) as u8 == window {
            let low = (sorted[idx] & 0xFF) as usize;
            bits[low / 8] |= 0x80 >> (low % 8);
            max_octet = max_octet.max(low / 8);
            idx += 1;
        }
        bitmap.push(window);
        bitmap.push((max_octet + 1) as u8);
        bitmap.extend_from_slice(&bits[..=max_octet]);
    }
    bitmap
}

pub fn parse_type_bitmap(buf: &[u8]) -> Result<Vec<u16>, DnsError> {
    let mut types = Vec::new();
    let mut off = 0;
    while off + 2 <= buf.len() {
        let window = buf[off] as u16;
        let len = buf[off + 1] as usize;
        off += 2;
        let octets = buf
            .get(off..off + len)
            .ok_or_else(|| DnsError::InvalidInput("truncated type bitmap".into()))?;
        for (i, octet) in octets.iter().enumerate() {
            for bit in 0..8 {
                if octet & (0x80 >> bit) != 0 {
                    types.push(window << 8 | (i as u16 * 8 + bit as u16));
                }
            }
        }
        off += len;
    }
    Ok(types)
}

pub fn nsec_rdata(next_domain: &str, types: &[u16]) -> Vec<u8> {
    let mut rdata = name_to_wire(next_domain);
    rdata.extend_from_slice(&type_bitmap(types));
    rdata
}

pub fn parse_nsec_rdata(rdata: &[u8]) -> Result<(String, Vec<u16>), DnsError> {
    let (next, off) = name_from_wire(rdata, 0)?;
    Ok((next, parse_type_bitmap(&rdata[off..])?))
}

#[allow(clippy::too_many_arguments)]
pub fn nsec3_rdata(
    hash_algorithm: u8,
    flags: u8,
    iterations: u16,
    salt: &[u8],
    next_hashed: &[u8],
    types: &[u16],
) -> Vec<u8> {
    let mut rdata = Vec::new();
    rdata.push(hash_algorithm);
    rdata.push(flags);
    rdata.extend_from_slice(&iterations.to_be_bytes());
    rdata.push(salt.len() as u8);
    rdata.extend_from_slice(salt);
    rdata.push(next_hashed.len() as u8);
    rdata.extend_from_slice(next_hashed);
    rdata.extend_from_slice(&type_bitmap(types));
    rdata
}

pub struct Nsec3Fields {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed: Vec<u8>,
    pub types: Vec<u16>,
}

pub fn parse_nsec3_rdata(rdata: &[u8]) -> Result<Nsec3Fields, DnsError> {
    if rdata.len() < 5 {
        return Err(DnsError::InvalidInput("short NSEC3 rdata".into()));
    }
    let iterations = u16::from_be_bytes([rdata[2], rdata[3]]);
    let salt_len = rdata[4] as usize;
    let salt = rdata
        .get(5..5 + salt_len)
        .ok_or_else(|| DnsError::InvalidInput("truncated NSEC3 salt".into()))?
        .to_vec();
    let mut off = 5 + salt_len;
    let hash_len = *rdata
        .get(off)
        .ok_or_else(|| DnsError::InvalidInput("truncated NSEC3 hash".into()))? as usize;
    off += 1;
    let next_hashed = rdata
        .get(off..off + hash_len)
        .ok_or_else(|| DnsError::InvalidInput("truncated NSEC3 hash".into()))?
        .to_vec();
    off += hash_len;
    Ok(Nsec3Fields {
        hash_algorithm: rdata[0],
        flags: rdata[1],
        iterations,
        salt,
        next_hashed,
        types: parse_type_bitmap(&rdata[off..])?,
    })
}

// --- Canonical ordering ------------------------------------------------------

/// Canonical wire form of a full RR: owner, type, class, TTL, RDLENGTH,
/// RDATA (RFC 4034 §6). Names we store are already canonical so the RDATA
/// bytes hickory emits compare correctly.
pub fn canonical_rr_bytes(record: &Record) -> Vec<u8> {
    let mut wire = name_to_wire(&record.name().to_string());
    wire.extend_from_slice(&u16::from(record.record_type()).to_be_bytes());
    wire.extend_from_slice(&u16::from(record.dns_class()).to_be_bytes());
    wire.extend_from_slice(&record.ttl().to_be_bytes());
    let rdata = record.data().to_bytes().unwrap_or_default();
    wire.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    wire.extend_from_slice(&rdata);
    wire
}

/// Sort an RRset into canonical order by comparing full canonical wire
/// forms byte-lexicographically.
pub fn sort_canonically(rrs: &mut [Record]) {
    rrs.sort_by(|a, b| canonical_rr_bytes(a).cmp(&canonical_rr_bytes(b)));
}

/// RDATA bytes of a record as hickory would emit them.
pub fn rdata_bytes(record: &Record) -> Vec<u8> {
    record.data().to_bytes().unwrap_or_default()
}

// --- Raw message scanning ----------------------------------------------------

/// Skip over a (possibly compressed) name inside a full message.
fn skip_name(buf: &[u8], mut off: usize) -> Option<usize> {
    loop {
        let len = *buf.get(off)? as usize;
        if len == 0 {
            return Some(off + 1);
        }
        if len & 0xC0 == 0xC0 {
            return Some(off + 2);
        }
        off += 1 + len;
    }
}

/// Offset and header fields of one resource record in a raw message.
struct RawRecord {
    start: usize,
    rtype: u16,
    class: u16,
    ttl: u32,
    rdata_start: usize,
    rdata_end: usize,
}

fn scan_record(buf: &[u8], start: usize) -> Option<RawRecord> {
    let name_end = skip_name(buf, start)?;
    let fixed = buf.get(name_end..name_end + 10)?;
    let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    let class = u16::from_be_bytes([fixed[2], fixed[3]]);
    let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
    let rdlen = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
    let rdata_start = name_end + 10;
    let rdata_end = rdata_start + rdlen;
    buf.get(rdata_start..rdata_end)?;
    Some(RawRecord {
        start,
        rtype,
        class,
        ttl,
        rdata_start,
        rdata_end,
    })
}

/// Walk all records of a raw message, calling `visit` for each with its
/// section index (0 = answer, 1 = authority, 2 = additional).
fn walk_records(buf: &[u8], mut visit: impl FnMut(usize, &RawRecord)) -> Option<()> {
    if buf.len() < 12 {
        return None;
    }
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let counts = [
        u16::from_be_bytes([buf[6], buf[7]]) as usize,
        u16::from_be_bytes([buf[8], buf[9]]) as usize,
        u16::from_be_bytes([buf[10], buf[11]]) as usize,
    ];

    let mut off = 12;
    for _ in 0..qdcount {
        off = skip_name(buf, off)?;
        off += 4;
    }
    for (section, count) in counts.iter().enumerate() {
        for _ in 0..*count {
            let rec = scan_record(buf, off)?;
            off = rec.rdata_end;
            visit(section, &rec);
        }
    }
    Some(())
}

/// EDNS parameters pulled from the OPT pseudo-record of a raw query.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdnsParams {
    pub present: bool,
    pub max_payload: u16,
    pub dnssec_ok: bool,
}

/// Extract EDNS parameters from raw query bytes (RFC 6891). The DO bit is
/// the top bit of the OPT TTL's lower half.
pub fn edns_params(buf: &[u8]) -> EdnsParams {
    let mut params = EdnsParams::default();
    let _ = walk_records(buf, |section, rec| {
        if section == 2 && rec.rtype == TYPE_OPT {
            params.present = true;
            params.max_payload = rec.class;
            params.dnssec_ok = rec.ttl & 0x8000 != 0;
        }
    });
    params
}

/// A TSIG record located at the tail of a raw message.
#[derive(Debug, Clone)]
pub struct TsigWire {
    pub key_name: String,
    pub algorithm: String,
    pub time_signed: u64,
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error: u16,
    pub other: Vec<u8>,
}

/// Locate and strip a trailing TSIG record (RFC 2845 §3.2).
///
/// Returns the message with the TSIG removed, ARCOUNT decremented and the
/// original ID restored, plus the parsed TSIG fields. `None` when the
/// message carries no TSIG.
pub fn strip_tsig(buf: &[u8]) -> Option<(Vec<u8>, TsigWire)> {
    let mut last: Option<(usize, usize, usize)> = None;
    walk_records(buf, |section, rec| {
        if section == 2 && rec.rtype == TYPE_TSIG {
            last = Some((rec.start, rec.rdata_start, rec.rdata_end));
        }
    })?;
    let (start, rdata_start, rdata_end) = last?;
    // TSIG must be the final record of the message.
    if rdata_end != buf.len() {
        return None;
    }

    // TSIG owner names are never compressed by conforming senders; a
    // pointer here fails the parse and the message counts as unsigned.
    let (key_name, _) = name_from_wire(buf, start).ok()?;
    let rdata = &buf[rdata_start..rdata_end];
    let (algorithm, mut off) = name_from_wire(rdata, 0).ok()?;
    let fixed = rdata.get(off..off + 10)?;
    let time_signed = u64::from_be_bytes([
        0, 0, fixed[0], fixed[1], fixed[2], fixed[3], fixed[4], fixed[5],
    ]);
    let fudge = u16::from_be_bytes([fixed[6], fixed[7]]);
    let mac_len = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
    off += 10;
    let mac = rdata.get(off..off + mac_len)?.to_vec();
    off += mac_len;
    let tail = rdata.get(off..off + 6)?;
    let original_id = u16::from_be_bytes([tail[0], tail[1]]);
    let error = u16::from_be_bytes([tail[2], tail[3]]);
    let other_len = u16::from_be_bytes([tail[4], tail[5]]) as usize;
    off += 6;
    let other = rdata.get(off..off + other_len)?.to_vec();

    let mut stripped = buf[..start].to_vec();
    // Restore the original ID and drop the TSIG from ARCOUNT.
    stripped[0..2].copy_from_slice(&original_id.to_be_bytes());
    let arcount = u16::from_be_bytes([buf[10], buf[11]]).saturating_sub(1);
    stripped[10..12].copy_from_slice(&arcount.to_be_bytes());

    Some((
        stripped,
        TsigWire {
            key_name,
            algorithm,
            time_signed,
            fudge,
            mac,
            original_id,
            error,
            other,
        },
    ))
}

/// Wire code for a presentation-format type label, `TYPE123` included.
pub fn code_for(label: &str) -> Option<u16> {
    match label.to_uppercase().as_str() {
        "A" => Some(1),
        "NS" => Some(2),
        "CNAME" => Some(5),
        "SOA" => Some(6),
        "PTR" => Some(12),
        "MX" => Some(15),
        "TXT" => Some(16),
        "AAAA" => Some(28),
        "SRV" => Some(33),
        "DNAME" => Some(TYPE_DNAME),
        "DS" => Some(TYPE_DS),
        "RRSIG" => Some(TYPE_RRSIG),
        "NSEC" => Some(TYPE_NSEC),
        "DNSKEY" => Some(TYPE_DNSKEY),
        "NSEC3" => Some(TYPE_NSEC3),
        "SPF" => Some(TYPE_SPF),
        "IXFR" => Some(251),
        "AXFR" => Some(252),
        "ANY" => Some(255),
        "CAA" => Some(TYPE_CAA),
        other => other
            .strip_prefix("TYPE")
            .and_then(|digits| digits.parse().ok()),
    }
}

/// Presentation-format label for a wire type code.
pub fn label_for(code: u16) -> String {
    match code {
        1 => "A".to_string(),
        2 => "NS".to_string(),
        5 => "CNAME".to_string(),
        6 => "SOA".to_string(),
        12 => "PTR".to_string(),
        15 => "MX".to_string(),
        16 => "TXT".to_string(),
        28 => "AAAA".to_string(),
        33 => "SRV".to_string(),
        TYPE_DNAME => "DNAME".to_string(),
        TYPE_DS => "DS".to_string(),
        TYPE_RRSIG => "RRSIG".to_string(),
        TYPE_NSEC => "NSEC".to_string(),
        TYPE_DNSKEY => "DNSKEY".to_string(),
        TYPE_NSEC3 => "NSEC3".to_string(),
        TYPE_SPF => "SPF".to_string(),
        251 => "IXFR".to_string(),
        252 => "AXFR".to_string(),
        255 => "ANY".to_string(),
        TYPE_CAA => "CAA".to_string(),
        other => format!("TYPE{other}"),
    }
}

/// Map a record type to its presentation name, used as the zone-tree key.
pub fn type_name(rtype: RecordType) -> String {
    match rtype {
        RecordType::Unknown(TYPE_DNAME) => "DNAME".to_string(),
        RecordType::Unknown(TYPE_SPF) => "SPF".to_string(),
        RecordType::Unknown(TYPE_CAA) => "CAA".to_string(),
        RecordType::Unknown(TYPE_DS) => "DS".to_string(),
        RecordType::Unknown(TYPE_DNSKEY) => "DNSKEY".to_string(),
        RecordType::Unknown(TYPE_RRSIG) => "RRSIG".to_string(),
        RecordType::Unknown(TYPE_NSEC) => "NSEC".to_string(),
        RecordType::Unknown(TYPE_NSEC3) => "NSEC3".to_string(),
        other => other.to_string(),
    }
}
