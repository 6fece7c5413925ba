//! Parses the v2ray `geosite.dat` binary (a protobuf-wire-compatible,
//! length-delimited table) into an in-memory category index.
//!
//! No `prost`/`protobuf` crate is pulled in for this: the wire format
//! needed is three fixed message shapes with no schema evolution to
//! support, so a small varint/wire-type reader in the same
//! `Cursor`+`byteorder` idiom as the DNS wire codec (see `wire::io`)
//! covers it without the code-generation machinery a full protobuf
//! crate would bring in.

use crate::errors::GeositeError;
use crate::rules::label_boundary_match;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PatternType {
    RootDomain,
    Regex,
    Plain,
    Full,
}

impl PatternType {
    fn from_varint(v: u64) -> Option<PatternType> {
        match v {
            0 => Some(PatternType::RootDomain),
            1 => Some(PatternType::Regex),
            2 => Some(PatternType::Plain),
            3 => Some(PatternType::Full),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct DomainPattern {
    kind: PatternType,
    value: String,
}

/// The loaded, immutable geosite index, plus the lazily-populated regex
/// cache for `Regex`-typed patterns.
pub struct GeositeStore {
    categories: HashMap<String, Vec<DomainPattern>>,
    regex_cache: Mutex<HashMap<String, Regex>>,
    warned_missing: Mutex<HashSet<String>>,
}

impl GeositeStore {
    /// A store with no categories, useful for tests and for a
    /// configuration that references no `geosite:` patterns at all.
    pub fn empty() -> GeositeStore {
        GeositeStore {
            categories: HashMap::new(),
            regex_cache: Mutex::new(HashMap::new()),
            warned_missing: Mutex::new(HashSet::new()),
        }
    }

    pub fn load(path: &Path) -> Result<GeositeStore, GeositeError> {
        let bytes = fs::read(path).map_err(|source| GeositeError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&bytes)
    }

    fn parse(bytes: &[u8]) -> Result<GeositeStore, GeositeError> {
        let mut categories = HashMap::new();
        let mut cur = io::Cursor::new(bytes);

        while let Some((field, wire_type)) = read_tag(&mut cur)? {
            if field == 1 && wire_type == WIRE_LEN {
                let buf = read_length_delimited(&mut cur)?;
                let (code, domains) = parse_geosite_entry(&buf)?;
                categories.insert(code, domains);
            } else {
                skip_field(&mut cur, wire_type)?;
            }
        }

        Ok(GeositeStore {
            categories,
            regex_cache: Mutex::new(HashMap::new()),
            warned_missing: Mutex::new(HashSet::new()),
        })
    }

    /// Evaluates `categories` in order against `domain`, returning true
    /// on the first matching pattern in the first matching category.
    /// `domain` should already be lowercased by the caller; pattern
    /// comparisons are still done case-insensitively.
    pub fn contains(&self, domain: &str, categories: &[&str]) -> bool {
        for &category in categories {
            let patterns = match self.categories.get(category) {
                Some(p) => p,
                None => {
                    self.warn_missing_once(category);
                    continue;
                }
            };

            for pattern in patterns {
                if self.pattern_matches(domain, pattern) {
                    return true;
                }
            }
        }

        false
    }

    fn warn_missing_once(&self, category: &str) {
        let mut warned = self.warned_missing.lock().unwrap();
        if warned.insert(category.to_string()) {
            log::warn!("geosite category '{}' not found in loaded geosite.dat", category);
        }
    }

    fn pattern_matches(&self, domain: &str, pattern: &DomainPattern) -> bool {
        match pattern.kind {
            PatternType::Full => domain.eq_ignore_ascii_case(&pattern.value),
            PatternType::RootDomain => label_boundary_match(domain, &pattern.value),
            PatternType::Plain => label_boundary_match(domain, &pattern.value),
            PatternType::Regex => self.regex_matches(&pattern.value, domain),
        }
    }

    fn regex_matches(&self, pattern: &str, domain: &str) -> bool {
        if let Some(re) = self.regex_cache.lock().unwrap().get(pattern) {
            return re.is_match(domain);
        }

        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                log::warn!("invalid geosite regex '{}': {}", pattern, e);
                return false;
            }
        };

        let matched = re.is_match(domain);
        self.regex_cache.lock().unwrap().insert(pattern.to_string(), re);
        matched
    }
}

fn parse_geosite_entry(buf: &[u8]) -> Result<(String, Vec<DomainPattern>), GeositeError> {
    let mut cur = io::Cursor::new(buf);
    let mut code = String::new();
    let mut domains = Vec::new();

    while let Some((field, wire_type)) = read_tag(&mut cur)? {
        match (field, wire_type) {
            (1, WIRE_LEN) => {
                let raw = read_length_delimited(&mut cur)?;
                code = String::from_utf8(raw)
                    .map_err(|e| GeositeError::Malformed(format!("country_code: {}", e)))?
                    .to_lowercase();
            }
            (2, WIRE_LEN) => {
                let raw = read_length_delimited(&mut cur)?;
                domains.push(parse_domain(&raw)?);
            }
            (_, wt) => skip_field(&mut cur, wt)?,
        }
    }

    Ok((code, domains))
}

fn parse_domain(buf: &[u8]) -> Result<DomainPattern, GeositeError> {
    let mut cur = io::Cursor::new(buf);
    let mut kind = None;
    let mut value = String::new();

    while let Some((field, wire_type)) = read_tag(&mut cur)? {
        match (field, wire_type) {
            (1, WIRE_VARINT) => {
                let v = read_varint(&mut cur)?;
                kind = Some(
                    PatternType::from_varint(v)
                        .ok_or_else(|| GeositeError::Malformed(format!("unknown domain type {}", v)))?,
                );
            }
            (2, WIRE_LEN) => {
                let raw = read_length_delimited(&mut cur)?;
                value = String::from_utf8(raw)
                    .map_err(|e| GeositeError::Malformed(format!("domain value: {}", e)))?;
            }
            // field 3 (attributes) and anything else: skip, attributes
            // don't affect routing so there's nothing to extract.
            (_, wt) => skip_field(&mut cur, wt)?,
        }
    }

    let kind = kind.ok_or_else(|| GeositeError::Malformed("domain missing type field".to_string()))?;
    Ok(DomainPattern { kind, value })
}

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

/// Reads a protobuf tag (field number << 3 | wire type). Returns `None`
/// at end of buffer, which a length-delimited sub-message's cursor
/// reaches exactly at its boundary.
fn read_tag(cur: &mut io::Cursor<&[u8]>) -> Result<Option<(u64, u64)>, GeositeError> {
    if cur.position() as usize >= cur.get_ref().len() {
        return Ok(None);
    }

    let tag = read_varint(cur)?;
    Ok(Some((tag >> 3, tag & 0x7)))
}

fn read_varint(cur: &mut io::Cursor<&[u8]>) -> Result<u64, GeositeError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let mut byte = [0u8; 1];
        cur.read_exact(&mut byte)
            .map_err(|e| GeositeError::Malformed(format!("truncated varint: {}", e)))?;
        let byte = byte[0];

        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }

        shift += 7;
        if shift >= 64 {
            return Err(GeositeError::Malformed("varint too long".to_string()));
        }
    }
}

fn read_length_delimited(cur: &mut io::Cursor<&[u8]>) -> Result<Vec<u8>, GeositeError> {
    let len = read_varint(cur)? as usize;
    let mut buf = vec![0; len];
    cur.read_exact(&mut buf)
        .map_err(|e| GeositeError::Malformed(format!("truncated length-delimited field: {}", e)))?;
    Ok(buf)
}

fn skip_field(cur: &mut io::Cursor<&[u8]>, wire_type: u64) -> Result<(), GeositeError> {
    match wire_type {
        WIRE_VARINT => {
            read_varint(cur)?;
        }
        WIRE_FIXED64 => {
            let mut buf = [0u8; 8];
            cur.read_exact(&mut buf)
                .map_err(|e| GeositeError::Malformed(format!("truncated fixed64: {}", e)))?;
        }
        WIRE_LEN => {
            read_length_delimited(cur)?;
        }
        WIRE_FIXED32 => {
            let mut buf = [0u8; 4];
            cur.read_exact(&mut buf)
                .map_err(|e| GeositeError::Malformed(format!("truncated fixed32: {}", e)))?;
        }
        other => return Err(GeositeError::Malformed(format!("unsupported wire type {}", other))),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_tag(field: u64, wire_type: u64) -> Vec<u8> {
        encode_varint((field << 3) | wire_type)
    }

    fn encode_varint(mut v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (v & 0x7F) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if v == 0 {
                break;
            }
        }
        out
    }

    fn encode_len_delimited(field: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = encode_tag(field, WIRE_LEN);
        out.extend(encode_varint(payload.len() as u64));
        out.extend_from_slice(payload);
        out
    }

    fn encode_domain(kind: u64, value: &str) -> Vec<u8> {
        let mut domain = encode_tag(1, WIRE_VARINT);
        domain.extend(encode_varint(kind));
        domain.extend(encode_len_delimited(2, value.as_bytes()));
        domain
    }

    #[test]
    fn parses_minimal_geosite_blob() {
        let domain_root = encode_domain(0, "google.com");
        let geosite = {
            let mut g = encode_len_delimited(1, b"google");
            g.extend(encode_len_delimited(2, &domain_root));
            g
        };
        let blob = encode_len_delimited(1, &geosite);

        let store = GeositeStore::parse(&blob).unwrap();
        assert!(store.contains("www.google.com", &["google"]));
        assert!(!store.contains("example.com", &["google"]));
    }

    #[test]
    fn plain_pattern_matches_at_label_boundary_only() {
        let domain_plain = encode_domain(2, "ads.example.com");
        let geosite = {
            let mut g = encode_len_delimited(1, b"ads");
            g.extend(encode_len_delimited(2, &domain_plain));
            g
        };
        let blob = encode_len_delimited(1, &geosite);
        let store = GeositeStore::parse(&blob).unwrap();

        assert!(store.contains("ads.example.com", &["ads"]));
        assert!(store.contains("tracker.ads.example.com", &["ads"]));
        assert!(!store.contains("notads.example.com", &["ads"]));
    }

    #[test]
    fn missing_category_is_not_a_match() {
        let store = GeositeStore::empty();
        assert!(!store.contains("example.com", &["nonexistent"]));
    }

    #[test]
    fn contains_is_monotone_in_category_set() {
        let domain_root = encode_domain(3, "example.com");
        let geosite = {
            let mut g = encode_len_delimited(1, b"onlyexample");
            g.extend(encode_len_delimited(2, &domain_root));
            g
        };
        let blob = encode_len_delimited(1, &geosite);
        let store = GeositeStore::parse(&blob).unwrap();

        assert!(!store.contains("example.com", &["other"]));
        assert!(store.contains("example.com", &["other", "onlyexample"]));
    }
}
