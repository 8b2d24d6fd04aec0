//! Environment and secret-file helpers
//!
//! Services are configured through environment variables (optionally seeded
//! from a `.env` file by the binaries) and credentials may additionally come
//! from mounted secret files containing `KEY=VALUE` lines.

use crate::error::{DatapipeError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Read a string variable, falling back to `default` when unset or empty.
pub fn var_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

/// Read an optional string variable. Empty values count as unset.
pub fn var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a variable into `T`, using `default` when unset.
///
/// A set but unparsable value is an error rather than a silent fallback.
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var_opt(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| DatapipeError::InvalidEnv {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn flag(key: &str, default: bool) -> Result<bool> {
    match var_opt(key) {
        None => Ok(default),
        Some(raw) => parse_bool(&raw).ok_or_else(|| DatapipeError::InvalidEnv {
            key: key.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated list variable. Blank entries are dropped.
pub fn list_or<T>(key: &str, default: Vec<T>) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = var_opt(key) else {
        return Ok(default);
    };
    split_list(&raw)
        .map(|item| {
            item.parse::<T>().map_err(|e| DatapipeError::InvalidEnv {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Split a comma separated value, trimming entries and dropping blanks.
pub fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse the content of a secrets file.
///
/// One `KEY=VALUE` per line; `#` starts a comment line; surrounding quotes
/// on the value are stripped. Lines without `=` are ignored.
pub fn parse_secrets(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Load a secrets file. A missing file yields an empty map.
pub fn load_secrets(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_secrets(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Secrets file not found");
            Ok(HashMap::new())
        },
        Err(e) => Err(e.into()),
    }
}

/// Environment first, then the secrets map.
pub fn var_or_secret(key: &str, secrets: &HashMap<String, String>) -> Option<String> {
    var_opt(key).or_else(|| secrets.get(key).cloned())
}
