//! HTTP header handling.

use indexmap::IndexMap;
use std::fmt;

/// HTTP header map.
///
/// Names keep the casing they were first inserted with, but lookups are
/// case-insensitive. Each name maps to an ordered list of values and names
/// keep their insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    headers: IndexMap<String, HeaderEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

impl HeaderMap {
    /// Create a new empty header map.
    pub fn new() -> Self {
        Self {
            headers: IndexMap::new(),
        }
    }

    /// Replace all values of a header with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        let value = value.into();
        match self.headers.get_mut(&key) {
            Some(entry) => entry.values = vec![value],
            None => {
                self.headers.insert(
                    key,
                    HeaderEntry {
                        name,
                        values: vec![value],
                    },
                );
            }
        }
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        self.headers
            .entry(key)
            .or_insert_with(|| HeaderEntry {
                name,
                values: Vec::new(),
            })
            .values
            .push(value.into());
    }

    /// Get the first value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Get every value of a header, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|entry| entry.values.as_slice())
            .unwrap_or(&[])
    }

    /// Get all values of a header joined the way they go on the wire.
    pub fn get_joined(&self, name: &str) -> Option<String> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|entry| entry.values.join(", "))
    }

    /// Check if a header exists.
    pub fn contains(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }

    /// Remove a header, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.headers
            .shift_remove(&name.to_ascii_lowercase())
            .map(|entry| entry.values)
    }

    /// Get number of distinct header names.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over headers as (original name, values).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.headers
            .values()
            .map(|entry| (entry.name.as_str(), entry.values.as_slice()))
    }

    /// Merge another map into this one; names present in `other` replace ours.
    pub fn extend(&mut self, other: HeaderMap) {
        for (key, entry) in other.headers {
            self.headers.insert(key, entry);
        }
    }

    /// Serialize to (name, value) pairs, multiple values joined with `", "`.
    pub fn to_wire(&self) -> Vec<(String, String)> {
        self.headers
            .values()
            .map(|entry| (entry.name.clone(), entry.values.join(", ")))
            .collect()
    }

    /// Get Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.get(names::CONTENT_TYPE)
    }

    /// Get Content-Length header.
    pub fn content_length(&self) -> Option<u64> {
        self.get(names::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Check whether Transfer-Encoding ends in `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.get_joined(names::TRANSFER_ENCODING)
            .and_then(|v| v.rsplit(',').next().map(|s| s.trim().eq_ignore_ascii_case("chunked")))
            .unwrap_or(false)
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderMap
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.to_wire() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

/// Common HTTP headers.
pub mod names {
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const HOST: &str = "host";
    pub const TRANSFER_ENCODING: &str = "transfer-encoding";
    pub const USER_AGENT: &str = "user-agent";
}

/// Content type values.
pub mod content_type {
    pub const FORM: &str = "application/x-www-form-urlencoded";
}
