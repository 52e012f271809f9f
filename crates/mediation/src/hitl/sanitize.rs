//! Audit payload sanitiser
//!
//! Credential-shaped fields and large or binary-looking strings are replaced
//! by metadata describing them. Their occurrence stays visible in the trail.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use warden_common::AuditConfig;

/// Keys whose values are never persisted, compared after lowercasing and
/// dropping `_` and `-`
const CREDENTIAL_KEYS: &[&str] = &[
    "authorization",
    "cookie",
    "setcookie",
    "apikey",
    "privatekey",
    "credentials",
    "passphrase",
];
const CREDENTIAL_SUFFIXES: &[&str] = &["password", "passwd", "secret", "token"];

const PREVIEW_CHARS: usize = 64;
const BASE64_MIN_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_field_len: usize,
    max_array_items: usize,
}

impl Sanitizer {
    pub fn new(max_field_len: usize, max_array_items: usize) -> Self {
        Self {
            max_field_len,
            max_array_items,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.max_field_len, config.max_array_items)
    }

    pub fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, field) in map {
                    let clean = if is_credential_key(key) && !field.is_null() {
                        redacted(field)
                    } else {
                        self.sanitize(field)
                    };
                    out.insert(key.clone(), clean);
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut out: Vec<Value> = items
                    .iter()
                    .take(self.max_array_items)
                    .map(|item| self.sanitize(item))
                    .collect();
                if items.len() > self.max_array_items {
                    out.push(json!({
                        "truncated": true,
                        "omittedItems": items.len() - self.max_array_items,
                    }));
                }
                Value::Array(out)
            }
            Value::String(text) => self.sanitize_string(text),
            other => other.clone(),
        }
    }

    fn sanitize_string(&self, text: &str) -> Value {
        if looks_binary(text) {
            return json!({
                "omitted": "binary",
                "length": text.len(),
                "sha256": digest(text),
            });
        }
        let chars = text.chars().count();
        if chars > self.max_field_len {
            return json!({
                "omitted": "too_long",
                "length": chars,
                "sha256": digest(text),
                "preview": text.chars().take(PREVIEW_CHARS).collect::<String>(),
            });
        }
        Value::String(text.to_string())
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::from_config(&AuditConfig::default())
    }
}

fn is_credential_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    CREDENTIAL_KEYS.contains(&normalized.as_str())
        || CREDENTIAL_SUFFIXES.iter().any(|suffix| normalized.ends_with(suffix))
}

fn redacted(value: &Value) -> Value {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    match value.as_str() {
        Some(s) => json!({ "redacted": true, "type": kind, "length": s.chars().count() }),
        None => json!({ "redacted": true, "type": kind }),
    }
}

/// Data URIs, strings with control bytes, and long unbroken base64 runs
fn looks_binary(text: &str) -> bool {
    if text.starts_with("data:") && text.contains(";base64,") {
        return true;
    }
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return true;
    }
    text.len() >= BASE64_MIN_LEN
        && text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
