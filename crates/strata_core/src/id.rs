//! Node identifiers.
//!
//! Ids look like `20240101093000-abc1234`: a local timestamp with second
//! precision followed by seven lowercase alphanumerics. They sort by creation
//! time and double as tree file names (`<id>.sy`) and child folder names.

use chrono::{Local, NaiveDateTime};
use uuid::Uuid;

/// Timestamp layout shared by ids and the `updated` attribute.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const SUFFIX_LEN: usize = 7;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Mint a fresh node id stamped with the current local time.
///
/// The suffix is the low base-36 digits of a v4 uuid; its version and variant
/// bits sit above the 56 random bits those digits are drawn from.
pub fn new_node_id() -> String {
    let mut n = Uuid::new_v4().as_u128();
    let radix = ALPHABET.len() as u128;
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| {
            let c = ALPHABET[(n % radix) as usize] as char;
            n /= radix;
            c
        })
        .collect();
    format!("{}-{}", now_timestamp(), suffix)
}

/// Current local time in `updated` format.
pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Whether `s` is a well-formed node id.
pub fn is_node_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 14 + 1 + SUFFIX_LEN || bytes[14] != b'-' {
        return false;
    }
    bytes[..14].iter().all(u8::is_ascii_digit)
        && bytes[15..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// The timestamp part of an id, usable as an `updated` value.
pub fn time_from_id(id: &str) -> Option<&str> {
    if is_node_id(id) { Some(&id[..14]) } else { None }
}

/// Parse an `updated` attribute. Returns `None` for empty or malformed values.
pub fn parse_updated(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
}

/// Extract the id from a tree file name such as `/a/b/<id>.sy`.
pub fn id_from_tree_path(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let stem = name.strip_suffix(".sy")?;
    is_node_id(stem).then_some(stem)
}
