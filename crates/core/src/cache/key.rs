//! Deterministic, privacy-filtered cache key generation.
//!
//! Keys are `:`-joined components:
//!
//! ```text
//! <kind>:<text digest>[:img:<d1>,<d2>,...][:meta-<digest>][:ctx-<digest>]
//! ```
//!
//! Text is normalized before hashing so trivial whitespace, case, and
//! punctuation variants share a key. Sensitive metadata and context fields
//! are stripped recursively before hashing, so two requests that differ only
//! in who sent them share a key. Keys longer than the configured bound are
//! replaced by a truncated prefix plus the SHA-256 of the full key.

use std::collections::HashSet;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use xxhash_rust::xxh64::xxh64;

use crate::Error;
use crate::config::CacheConfig;
use crate::content::{CacheableContent, ContentKind};

/// Hex characters kept from each image digest.
const IMAGE_HASH_LEN: usize = 8;

/// Leading bytes of an image blob that feed its digest.
const IMAGE_PREFIX_BYTES: usize = 1024;

/// Hex length of a SHA-256 digest.
const FALLBACK_HASH_LEN: usize = 64;

const COMPONENT_SEPARATOR: char = ':';

/// Builds cache keys from cacheable content and caller context.
///
/// Pure and deterministic: no I/O, no randomness, no interior state.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    max_key_length: usize,
    max_text_length: usize,
    include_metadata: bool,
    sensitive_fields: HashSet<String>,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl KeyGenerator {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_key_length: config.max_key_length,
            max_text_length: config.max_text_length,
            include_metadata: config.include_metadata,
            sensitive_fields: config.sensitive_field_names.iter().cloned().collect(),
        }
    }

    pub fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    /// Generate the cache key for `content` under an optional caller context.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the content has no images and its
    /// text normalizes to nothing, and `Error::InvalidKey` if the produced key
    /// still violates the length bound.
    pub fn generate_key(&self, content: &CacheableContent, context: Option<&Map<String, Value>>) -> Result<String, Error> {
        let normalized = self.normalize_text(&content.text);
        if normalized.is_empty() && content.images.is_empty() {
            return Err(Error::InvalidInput("content has no images and its text normalizes to nothing".into()));
        }

        let mut parts = vec![content.kind.tag().to_string(), digest_hex(normalized.as_bytes())];

        if !content.images.is_empty() {
            let images: Vec<String> = content
                .images
                .iter()
                .map(|image| {
                    let prefix = &image[..image.len().min(IMAGE_PREFIX_BYTES)];
                    let mut hash = format!("{:016x}", xxh64(prefix, image.len() as u64));
                    hash.truncate(IMAGE_HASH_LEN);
                    hash
                })
                .collect();
            parts.push(format!("img:{}", images.join(",")));
        }

        let metadata = content.metadata.as_ref().filter(|_| self.include_metadata);
        if let Some(component) = metadata.and_then(|m| self.map_digest(m)) {
            parts.push(format!("meta-{component}"));
        }

        if let Some(component) = context.and_then(|c| self.map_digest(c)) {
            parts.push(format!("ctx-{component}"));
        }

        let raw = parts.join(":");
        let key = if raw.len() > self.max_key_length {
            let prefix_len = self.max_key_length.saturating_sub(FALLBACK_HASH_LEN + 1);
            format!("{}{COMPONENT_SEPARATOR}{}", &raw[..prefix_len], hex::encode(Sha256::digest(raw.as_bytes())))
        } else {
            raw
        };

        if key.len() > self.max_key_length {
            return Err(Error::InvalidKey(format!(
                "generated key length {} exceeds maximum {}",
                key.len(),
                self.max_key_length
            )));
        }

        Ok(key)
    }

    /// Check that a key is non-empty, within bounds, and uses only the
    /// characters generated keys are made of.
    pub fn validate_key(&self, key: &str) -> bool {
        !key.is_empty()
            && key.len() <= self.max_key_length
            && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-' | ',' | '.'))
    }

    /// Content kind encoded in a key's leading tag.
    pub fn extract_content_type(&self, key: &str) -> Option<ContentKind> {
        key.split(COMPONENT_SEPARATOR).next().and_then(ContentKind::from_tag)
    }

    /// Lowercase, strip punctuation, collapse whitespace, and truncate.
    pub fn normalize_text(&self, text: &str) -> String {
        let stripped: String = text
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_ascii_punctuation() && !is_unicode_punctuation(*c))
            .collect();
        stripped
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(self.max_text_length)
            .collect()
    }

    /// Digest of a map after sensitive-field removal, or None when nothing
    /// remains to hash.
    fn map_digest(&self, map: &Map<String, Value>) -> Option<String> {
        let filtered = self.filter_sensitive(map);
        if filtered.is_empty() {
            return None;
        }
        let mut canonical = String::new();
        write_canonical(&Value::Object(filtered), &mut canonical);
        Some(digest_hex(canonical.as_bytes()))
    }

    fn filter_sensitive(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .filter(|(k, _)| !self.sensitive_fields.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), self.filter_value(v)))
            .collect()
    }

    fn filter_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.filter_sensitive(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.filter_value(v)).collect()),
            other => other.clone(),
        }
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    format!("{:016x}", xxh64(bytes, 0))
}

fn is_unicode_punctuation(c: char) -> bool {
    matches!(c, '\u{2010}'..='\u{2027}' | '\u{2030}'..='\u{205E}' | '\u{3000}'..='\u{303F}' | '¿' | '¡' | '«' | '»')
}

/// Serialize with object keys sorted, regardless of how the map was built.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
