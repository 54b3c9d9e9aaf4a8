//! Metadata tags attached to values.

use crate::value::{RpcValue, Value};
use std::fmt;

/// Meta tag carrying the type identity of the annotated value.
pub const TAG_META_TYPE_ID: u64 = 1;
/// Meta tag carrying the namespace of the type identity.
pub const TAG_META_TYPE_NAMESPACE_ID: u64 = 2;
/// First tag available for application use.
pub const TAG_USER: u64 = 8;

/// Out-of-band annotations on a value, keyed by small unsigned tags.
///
/// Stored as an association list kept sorted by tag; typical values
/// carry at most a handful of entries. The reserved tags
/// [`TAG_META_TYPE_ID`] and [`TAG_META_TYPE_NAMESPACE_ID`] are
/// normalized to unsigned representation on insert.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaData {
    entries: Vec<(u64, RpcValue)>,
}

impl MetaData {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no tags are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tags set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Value stored under `tag`.
    pub fn get(&self, tag: u64) -> Option<&RpcValue> {
        self.entries
            .binary_search_by_key(&tag, |(t, _)| *t)
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Set `tag`, replacing any prior value.
    ///
    /// A non-negative `Int` supplied for a reserved tag is stored as
    /// `UInt`.
    pub fn insert(&mut self, tag: u64, value: impl Into<RpcValue>) {
        let mut value = value.into();
        if tag == TAG_META_TYPE_ID || tag == TAG_META_TYPE_NAMESPACE_ID {
            if let Value::Int(n) = *value.value() {
                if n >= 0 {
                    *value.value_mut() = Value::UInt(n as u64);
                }
            }
        }
        match self.entries.binary_search_by_key(&tag, |(t, _)| *t) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (tag, value)),
        }
    }

    /// Remove `tag`, returning its value.
    pub fn remove(&mut self, tag: u64) -> Option<RpcValue> {
        match self.entries.binary_search_by_key(&tag, |(t, _)| *t) {
            Ok(i) => Some(self.entries.remove(i).1),
            Err(_) => None,
        }
    }

    /// Tag/value pairs in ascending tag order.
    pub fn iter(&self) -> std::slice::Iter<'_, (u64, RpcValue)> {
        self.entries.iter()
    }

    /// The [`TAG_META_TYPE_ID`] entry as unsigned, if present.
    pub fn meta_type_id(&self) -> Option<u64> {
        self.get(TAG_META_TYPE_ID).and_then(|v| v.as_uint())
    }
}

impl<'a> IntoIterator for &'a MetaData {
    type Item = &'a (u64, RpcValue);
    type IntoIter = std::slice::Iter<'a, (u64, RpcValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for MetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, (tag, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", tag, value)?;
        }
        write!(f, ">")
    }
}
