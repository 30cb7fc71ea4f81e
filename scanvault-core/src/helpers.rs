//! Small utilities shared across the crate: GUIDs, checksums, timestamp
//! handling, natural sorting, and key-case conversion.

use std::cmp::Ordering;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Creates a URL-safe, 22-character, base64-encoded GUID.
///
/// GUIDs are used instead of sequential integers because of the archival
/// nature of the project: everything must stay referenceable in a stable way
/// over a long period of time, even at the cost of performance.
pub fn create_guid() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

/// Creates an unsigned CRC32 checksum as an 8-character hex string.
pub fn create_checksum(data: impl AsRef<[u8]>) -> String {
    format!("{:08x}", crc32fast::hash(data.as_ref()))
}

/// Current date and time in UTC.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Standard, arbitrary "old" date: January 1, 1970 (UTC).
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

/// Format a timestamp as RFC 3339 with an explicit `+00:00` offset.
pub fn to_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

/// Parse an RFC 3339 timestamp back into UTC. Falls back to the epoch on
/// malformed input so stale rows never poison a read path.
pub fn parse_rfc3339(data: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(data)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| epoch())
}

/// Compact UTC timestamp used in generated filenames, e.g. `20220927-131242Z`.
pub fn compact_timestamp(dt: &DateTime<Utc>) -> String {
    format!("{}Z", dt.format("%Y%m%d-%H%M%S"))
}

/// Whether iteration `n` (zero-based) of `n_max` falls on a batch boundary:
/// every `batch_size`th item, and always the last item.
pub fn on_batch_boundary(n: usize, n_max: usize, batch_size: usize) -> bool {
    (n + 1) % batch_size.max(1) == 0 || n + 1 == n_max
}

/// Numeric-aware string comparison, so `000010` sorts after `000002` and
/// `img_9` before `img_10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars().peekable();
    let mut ib = b.chars().peekable();

    loop {
        match (ia.peek().copied(), ib.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let na = take_number(&mut ia);
                    let nb = take_number(&mut ib);
                    match na.cmp(&nb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                match ca.cmp(&cb) {
                    Ordering::Equal => {
                        ia.next();
                        ib.next();
                    }
                    other => return other,
                }
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> u128 {
    let mut value: u128 = 0;
    while let Some(c) = chars.peek().copied() {
        if let Some(d) = c.to_digit(10) {
            value = value.saturating_mul(10).saturating_add(d as u128);
            chars.next();
        } else {
            break;
        }
    }
    value
}

/// Convert a snake_case key to camelCase for JavaScript clients.
pub fn snake_to_camel(key: &str) -> String {
    let mut parts = key.split('_').filter(|p| !p.is_empty());
    let mut out = String::with_capacity(key.len());
    if let Some(first) = parts.next() {
        out.push_str(&first.to_lowercase());
    }
    for part in parts {
        let mut chars = part.chars();
        if let Some(c) = chars.next() {
            out.extend(c.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Convert a camelCase key from a JavaScript client back to snake_case.
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_is_22_chars_and_url_safe() {
        for _ in 0..100 {
            let guid = create_guid();
            assert_eq!(guid.len(), 22);
            assert!(!guid.contains('='));
            assert!(guid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn guids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(create_guid()));
        }
    }

    #[test]
    fn checksum_is_stable_8_hex() {
        let a = create_checksum("Hello from Document #1");
        let b = create_checksum("Hello from Document #1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, create_checksum("Hello from Document #2"));
    }

    #[test]
    fn natural_sort_orders_numerically() {
        let mut names = vec!["img_10", "img_2", "img_1", "000010_x", "000002_x"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["000002_x", "000010_x", "img_1", "img_2", "img_10"]);
    }

    #[test]
    fn batch_boundaries() {
        assert!(!on_batch_boundary(0, 5, 2));
        assert!(on_batch_boundary(1, 5, 2));
        assert!(!on_batch_boundary(2, 5, 2));
        assert!(on_batch_boundary(3, 5, 2));
        assert!(on_batch_boundary(4, 5, 2));
        assert!(on_batch_boundary(0, 1, 10_000));
    }

    #[test]
    fn key_case_round_trip() {
        assert_eq!(snake_to_camel("search_str"), "searchStr");
        assert_eq!(snake_to_camel("media_created_at"), "mediaCreatedAt");
        assert_eq!(camel_to_snake("searchStr"), "search_str");
        assert_eq!(camel_to_snake(&snake_to_camel("album_index")), "album_index");
    }

    #[test]
    fn compact_timestamp_format() {
        let dt = Utc.with_ymd_and_hms(2022, 9, 27, 13, 12, 42).single();
        assert_eq!(compact_timestamp(&dt.expect("valid date")), "20220927-131242Z");
    }

    #[test]
    fn rfc3339_has_explicit_offset() {
        let dt = Utc.with_ymd_and_hms(2022, 9, 27, 13, 12, 42).single();
        assert_eq!(to_rfc3339(&dt.expect("valid date")), "2022-09-27T13:12:42+00:00");
    }
}
