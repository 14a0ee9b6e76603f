//! Full Key Module
//!
//! The group-and-key composite identifying a store slot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Separator used when rendering a full key for display and matching.
pub const KEY_SEPARATOR: char = '_';

// == Full Key ==
/// Identifies one cache slot by group and key.
///
/// Kept as a pair rather than a concatenated string, so group `"a_b"` with
/// key `"c"` and group `"a"` with key `"b_c"` are different slots even though
/// both render as `"a_b_c"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FullKey {
    group: String,
    key: String,
}

impl FullKey {
    // == Constructor ==
    /// Builds a full key, rejecting empty components.
    pub fn new(group: &str, key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(CacheError::invalid("key must not be empty"));
        }
        if group.is_empty() {
            return Err(CacheError::invalid("group must not be empty"));
        }
        Ok(Self {
            group: group.to_string(),
            key: key.to_string(),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    // == File Stem ==
    /// Returns a filesystem-safe name for this key.
    ///
    /// ASCII alphanumerics and `-` pass through; every other byte becomes
    /// `_xx` (lowercase hex). Group and key are joined by `~`, which the
    /// encoding never emits, so distinct keys always get distinct stems.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.group.len() + self.key.len() + 1);
        encode_component(&self.group, &mut stem);
        stem.push('~');
        encode_component(&self.key, &mut stem);
        stem
    }
}

impl fmt::Display for FullKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.group, KEY_SEPARATOR, self.key)
    }
}

fn encode_component(raw: &str, out: &mut String) {
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
}
