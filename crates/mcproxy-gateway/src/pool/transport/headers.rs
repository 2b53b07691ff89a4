//! Credential environment to HTTP header conventions
//!
//! | Variable                                          | Header                     |
//! |---------------------------------------------------|----------------------------|
//! | `API_KEY`, `*_API_KEY`                            | `X-API-Key: <v>`           |
//! | `BEARER_TOKEN`, `AUTH_TOKEN`, `ACCESS_TOKEN`, `AUTHORIZATION` | `Authorization: Bearer <v>` |
//! | `HEADER_<NAME>`                                   | `<Name>` (`_` becomes `-`) |
//!
//! Anything else is not sent to HTTP backends.

use std::collections::BTreeMap;

const BEARER_VARS: &[&str] = &["BEARER_TOKEN", "AUTH_TOKEN", "ACCESS_TOKEN", "AUTHORIZATION"];
const HEADER_PREFIX: &str = "HEADER_";

/// Map one credential variable to a header, if a convention applies
pub fn header_for_env(key: &str, value: &str) -> Option<(String, String)> {
    let upper = key.to_ascii_uppercase();

    if upper == "API_KEY" || upper.ends_with("_API_KEY") {
        return Some(("X-API-Key".to_string(), value.to_string()));
    }

    if BEARER_VARS.contains(&upper.as_str()) {
        return Some(("Authorization".to_string(), bearer(value)));
    }

    if let Some(name) = upper.strip_prefix(HEADER_PREFIX) {
        if name.is_empty() {
            return None;
        }
        return Some((header_case(name), value.to_string()));
    }

    None
}

/// Apply all conventions; later variables win when two map to the same header
pub fn headers_from_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|(k, v)| header_for_env(k, v))
        .collect()
}

/// `Bearer <token>`, without doubling an existing scheme
pub fn bearer(token: &str) -> String {
    let trimmed = token.trim();
    match trimmed.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => {
            format!("Bearer {}", trimmed[7..].trim_start())
        }
        _ => format!("Bearer {}", trimmed),
    }
}

// CUSTOM_TRACE_ID -> Custom-Trace-Id
fn header_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let lower = part.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
