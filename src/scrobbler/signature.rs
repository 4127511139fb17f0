// Request signing for the Last.fm API
// Canonicalizes a parameter set, computes api_sig and builds the form body

use std::collections::BTreeMap;

/// Parameters excluded from the signature base string
const UNSIGNED_KEYS: [&str; 2] = ["format", "api_sig"];

/// Compute the `api_sig` for a parameter set.
///
/// Keys are sorted, each key is immediately followed by its value, the secret
/// is appended and the result is MD5-hashed into lowercase hex.
pub fn sign(params: &BTreeMap<String, String>, secret: &str) -> String {
    let mut base = String::new();
    for (key, value) in params {
        if UNSIGNED_KEYS.contains(&key.as_str()) {
            continue;
        }
        base.push_str(key);
        base.push_str(value);
    }
    base.push_str(secret);

    format!("{:x}", md5::compute(base.as_bytes()))
}

/// Percent-encode a value, leaving alphanumerics and `-_.~` as-is
pub fn url_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Build an `application/x-www-form-urlencoded` body in key order
pub fn form_body(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, url_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Strip whitespace and control characters from a key-like value
pub fn sanitize_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect()
}

/// Mask a secret for logging
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => "<empty>".to_string(),
        1..=6 => "******".to_string(),
        n => {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[n - 2..].iter().collect();
            format!("{}****{}", head, tail)
        }
    }
}
