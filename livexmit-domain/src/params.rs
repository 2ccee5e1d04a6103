//! Connection parameters: the `k=v` pairs from a medium URI.
//!
//! Parameters are consumed as each layer interprets them. Whatever is left
//! after the adapter took its own keys is handed to the transport primitive
//! verbatim, so a key is applied at most once.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---

use crate::{Result, XmitError};

// ---

/// Values that switch a boolean parameter off.
const FALSE_NAMES: [&str; 4] = ["0", "no", "off", "false"];

pub fn is_false_name(value: &str) -> bool {
    // ---
    FALSE_NAMES.iter().any(|f| value.eq_ignore_ascii_case(f))
}

// ---------------------------------------------------------------------------
// ConnParams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnParams {
    // ---
    map: BTreeMap<String, String>,
}

impl ConnParams {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    /// Remove and return `key`.
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    /// Remove `key` and parse its value.
    ///
    /// An absent key is `Ok(None)`; a present but unparsable value is a
    /// configuration error naming the key.
    pub fn take_parsed<T: FromStr>(&mut self, key: &str) -> Result<Option<T>> {
        // ---
        let Some(raw) = self.map.remove(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| XmitError::config(format!("invalid value for '{key}': '{raw}'")))
    }

    /// Copy every entry of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: &ConnParams) {
        for (k, v) in &other.map {
            self.map.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnParams {
    // ---
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut p = ConnParams::new();
        for (k, v) in iter {
            p.insert(k, v);
        }
        p
    }
}

impl fmt::Display for ConnParams {
    // ---
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.map {
            if !first {
                f.write_str("&")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}
