//! Name sanitation and SOA serial arithmetic.

use chrono::Utc;

use crate::errors::DnsError;

/// Canonicalize an FQDN: lowercase with a trailing dot.
///
/// `@` passes through untouched so apex-relative owner names survive a
/// round trip. Labels may contain `[a-z0-9-]` only and must not start or
/// end with a hyphen. Idempotent by construction.
pub fn sanitize_fqdn(name: &str) -> Result<String, DnsError> {
    if name == "@" {
        return Ok("@".to_string());
    }

    let lowered = name.to_lowercase();
    let trimmed = lowered.trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(DnsError::InvalidInput(format!("empty domain name {name:?}")));
    }

    for label in trimmed.split('.') {
        if label.is_empty() {
            return Err(DnsError::InvalidInput(format!("empty label in {name:?}")));
        }
        if label.len() > 63 {
            return Err(DnsError::InvalidInput(format!("label too long in {name:?}")));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(DnsError::InvalidInput(format!(
                "label must not start or end with '-' in {name:?}"
            )));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
        {
            return Err(DnsError::InvalidInput(format!(
                "invalid character in {name:?}"
            )));
        }
    }

    Ok(format!("{trimmed}."))
}

/// Relativize `fqdn` against `zone`, returning `@` for the apex itself.
///
/// Both arguments must already be canonical. Returns `None` when the name
/// does not fall inside the zone.
pub fn relativize(fqdn: &str, zone: &str) -> Option<String> {
    if fqdn == zone {
        return Some("@".to_string());
    }
    // The leading dot in the pattern keeps "notexample.com." from
    // matching zone "example.com.".
    fqdn.strip_suffix(&format!(".{zone}"))
        .map(|host| host.to_string())
}

/// Expand a stored owner name back to its FQDN within `zone`.
pub fn expand_owner(name: &str, zone: &str) -> String {
    if name == "@" || name.is_empty() {
        zone.to_string()
    } else if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.{zone}")
    }
}

/// Lowercase a name and guarantee the trailing dot, without validating
/// label contents. Used on names that arrived over the wire.
pub fn ensure_fqdn(name: &str) -> String {
    let lowered = name.to_lowercase();
    if lowered.ends_with('.') {
        lowered
    } else {
        format!("{lowered}.")
    }
}

/// Number of labels in a canonical name (`@` counts as zero; the caller
/// expands it first).
pub fn label_count(fqdn: &str) -> u8 {
    fqdn.split('.').filter(|l| !l.is_empty()).count() as u8
}

/// Compute the next SOA serial in `YYMMDDnnn` form.
///
/// The date part resets the sequence daily; within a day the counter
/// increments. A serial of zero (new zone) starts at `date*1000 + 1`.
pub fn next_serial(current: u32) -> u32 {
    next_serial_on(current, date_part())
}

fn date_part() -> u32 {
    Utc::now().format("%y%m%d").to_string().parse().unwrap_or(0)
}

fn next_serial_on(current: u32, today: u32) -> u32 {
    if current / 1000 == today {
        current + 1
    } else {
        today * 1000 + 1
    }
}
