use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{AttributeKey, RequestKey};

/// Attribute value attached to a partial request.
///
/// The nested shapes exist for the roll-forward merge rule: maps merge
/// recursively, lists union their elements, and scalars are copied only when
/// absent on the receiving side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Scalar text value.
    Text(String),
    /// Ordered collection of values.
    List(Vec<AttrValue>),
    /// Nested attribute mapping.
    Map(IndexMap<AttributeKey, AttrValue>),
}

impl AttrValue {
    /// Convenience constructor for scalar values.
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Text(value.into())
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

/// A logical unit of work identified by a byte offset and length within a
/// source file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartialRequest {
    /// External request key; empty until resolved during the scan.
    pub request_key: RequestKey,
    /// File the byte range was discovered in.
    pub source_file: PathBuf,
    /// Byte offset of the range start.
    pub offset: u64,
    /// Byte length of the range; `offset + length` never exceeds the file
    /// size at discovery time.
    pub length: u64,
    /// Flat attribute fields extracted from records (last write wins).
    pub attributes: IndexMap<AttributeKey, AttrValue>,
    /// Optional transaction association carried from allow-list placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl PartialRequest {
    /// Create a request covering `[offset, offset + length)` of `source_file`.
    pub fn new(source_file: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        Self {
            request_key: String::new(),
            source_file: source_file.into(),
            offset,
            length,
            attributes: IndexMap::new(),
            transaction_id: None,
        }
    }

    /// Builder-style key assignment.
    pub fn with_key(mut self, key: impl Into<RequestKey>) -> Self {
        self.request_key = key.into();
        self
    }

    /// Builder-style attribute assignment.
    pub fn with_attribute(mut self, key: impl Into<AttributeKey>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// True once the external request key has been resolved.
    pub fn has_key(&self) -> bool {
        !self.request_key.is_empty()
    }

    /// First byte past the range.
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Roll attributes (and the transaction id) forward from an allow-list
    /// placeholder without overwriting anything already present.
    pub fn merge_missing_from(&mut self, placeholder: &PartialRequest) {
        merge_missing(&mut self.attributes, &placeholder.attributes);
        if self.transaction_id.is_none() {
            self.transaction_id = placeholder.transaction_id.clone();
        }
    }
}

impl PartialEq for PartialRequest {
    /// Identity is the request key when present, else the byte range itself.
    fn eq(&self, other: &Self) -> bool {
        if self.has_key() && other.has_key() {
            self.request_key == other.request_key
        } else {
            self.source_file == other.source_file
                && self.offset == other.offset
                && self.length == other.length
        }
    }
}

impl Eq for PartialRequest {}

/// Merge `src` into `dst` under the roll-forward rule: copy absent keys,
/// merge nested maps recursively, union list elements.
pub fn merge_missing(
    dst: &mut IndexMap<AttributeKey, AttrValue>,
    src: &IndexMap<AttributeKey, AttrValue>,
) {
    for (key, value) in src {
        match dst.get_mut(key) {
            None => {
                dst.insert(key.clone(), value.clone());
            }
            Some(AttrValue::Map(existing)) => {
                if let AttrValue::Map(incoming) = value {
                    merge_missing(existing, incoming);
                }
            }
            Some(AttrValue::List(existing)) => {
                if let AttrValue::List(incoming) = value {
                    for item in incoming {
                        if !existing.contains(item) {
                            existing.push(item.clone());
                        }
                    }
                }
            }
            Some(AttrValue::Text(_)) => {}
        }
    }
}

/// Ordered sequence of partial requests sharing one external key, possibly
/// spanning multiple files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartialRequestGroup {
    /// Shared external key.
    pub key: RequestKey,
    /// Member requests in discovery order.
    pub requests: Vec<PartialRequest>,
}

impl PartialRequestGroup {
    /// Group weight: sum of member byte lengths.
    pub fn weight(&self) -> u64 {
        self.requests.iter().map(|request| request.length).sum()
    }
}

/// Group requests by external key, preserving first-seen key order.
pub fn group_by_key(requests: Vec<PartialRequest>) -> Vec<PartialRequestGroup> {
    let mut groups: IndexMap<RequestKey, Vec<PartialRequest>> = IndexMap::new();
    for request in requests {
        groups
            .entry(request.request_key.clone())
            .or_default()
            .push(request);
    }
    groups
        .into_iter()
        .map(|(key, requests)| PartialRequestGroup { key, requests })
        .collect()
}
