//! Field extraction primitives and the value converter registry.
//!
//! Record keys are extracted and compared on raw bytes; attribute and
//! request-key fields are extracted from decoded text. Converters implement
//! coerce-then-restringify for typed fields and are resolved once at
//! configuration compile time to plain function pointers.

use std::collections::HashMap;

use memchr::memmem;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::convert;
use crate::types::TypeName;

/// Where a field's value comes from within a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldSource {
    /// Fixed byte window at `position..position + length`.
    Fixed {
        /// Byte position of the window start.
        position: usize,
        /// Window length in bytes.
        length: usize,
    },
    /// Zero-based field index after splitting on the configured field delimiter.
    Delimited {
        /// Field index.
        index: usize,
    },
}

/// Declarative definition of one extractable field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Extraction source.
    pub source: FieldSource,
    /// Trim surrounding whitespace from the extracted value.
    pub trim: bool,
    /// Optional registered converter applied to the extracted text value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<TypeName>,
}

impl FieldDefinition {
    /// Fixed byte window field.
    pub fn fixed(position: usize, length: usize) -> Self {
        Self {
            source: FieldSource::Fixed { position, length },
            trim: false,
            type_name: None,
        }
    }

    /// Delimiter-indexed field.
    pub fn delimited(index: usize) -> Self {
        Self {
            source: FieldSource::Delimited { index },
            trim: false,
            type_name: None,
        }
    }

    /// Builder-style trim toggle.
    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    /// Builder-style converter assignment.
    pub fn with_type(mut self, type_name: impl Into<TypeName>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// Converter function: coerce the extracted text, then restringify it.
///
/// The error string describes why the value did not coerce; extraction logs
/// it and falls back to the raw value rather than aborting the scan.
pub type Converter = fn(&str) -> Result<String, String>;

/// Registry of named value converters, resolved at configuration compile time.
pub struct ConverterRegistry {
    converters: HashMap<TypeName, Converter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            converters: HashMap::new(),
        };
        registry.register(convert::TYPE_TEXT, convert_text);
        registry.register(convert::TYPE_INTEGER, convert_integer);
        registry.register(convert::TYPE_DECIMAL, convert_decimal);
        registry.register(convert::TYPE_BOOLEAN, convert_boolean);
        registry
    }
}

impl ConverterRegistry {
    /// Registry preloaded with the built-in converters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a converter under `name`.
    pub fn register(&mut self, name: impl Into<TypeName>, converter: Converter) {
        self.converters.insert(name.into(), converter);
    }

    /// Look up a converter by name.
    pub fn resolve(&self, name: &str) -> Option<Converter> {
        self.converters.get(name).copied()
    }
}

fn convert_text(value: &str) -> Result<String, String> {
    Ok(value.to_string())
}

fn convert_integer(value: &str) -> Result<String, String> {
    value
        .trim()
        .parse::<i128>()
        .map(|parsed| parsed.to_string())
        .map_err(|err| format!("not an integer: {err}"))
}

fn convert_decimal(value: &str) -> Result<String, String> {
    value
        .trim()
        .parse::<f64>()
        .map(|parsed| parsed.to_string())
        .map_err(|err| format!("not a decimal: {err}"))
}

fn convert_boolean(value: &str) -> Result<String, String> {
    match value.trim() {
        "true" | "TRUE" | "True" | "1" | "y" | "Y" => Ok("true".to_string()),
        "false" | "FALSE" | "False" | "0" | "n" | "N" => Ok("false".to_string()),
        other => Err(format!("not a boolean: '{other}'")),
    }
}

/// A field definition with its converter resolved.
#[derive(Clone, Debug)]
pub(crate) struct CompiledField {
    pub(crate) source: FieldSource,
    pub(crate) trim: bool,
    pub(crate) converter: Option<(TypeName, Converter)>,
}

impl CompiledField {
    /// Extract the raw byte value of this field from a record.
    ///
    /// Returns `None` when the record is too short for a fixed window or has
    /// too few delimited fields.
    pub(crate) fn extract_raw<'r>(
        &self,
        record: &'r [u8],
        field_delimiter: Option<&[u8]>,
    ) -> Option<&'r [u8]> {
        let raw = match self.source {
            FieldSource::Fixed { position, length } => {
                record.get(position..position.checked_add(length)?)?
            }
            FieldSource::Delimited { index } => {
                nth_byte_field(record, field_delimiter?, index)?
            }
        };
        Some(if self.trim { trim_ascii(raw) } else { raw })
    }

    /// Extract the text value of this field from a decoded record, applying
    /// trim and the resolved converter.
    pub(crate) fn extract_value(
        &self,
        record: &str,
        field_delimiter: Option<&str>,
    ) -> Option<String> {
        let raw = match self.source {
            FieldSource::Fixed { position, length } => {
                record.get(position..position.checked_add(length)?)?
            }
            FieldSource::Delimited { index } => record.split(field_delimiter?).nth(index)?,
        };
        let value = if self.trim { raw.trim() } else { raw };
        match &self.converter {
            None => Some(value.to_string()),
            Some((type_name, converter)) => match converter(value) {
                Ok(converted) => Some(converted),
                Err(reason) => {
                    warn!(type_name = %type_name, value, reason = %reason, "field conversion failed; keeping raw value");
                    Some(value.to_string())
                }
            },
        }
    }
}

/// Return the `index`-th delimiter-separated byte field of `record`.
fn nth_byte_field<'r>(record: &'r [u8], delimiter: &[u8], index: usize) -> Option<&'r [u8]> {
    let mut start = 0usize;
    let mut seen = 0usize;
    for hit in memmem::find_iter(record, delimiter) {
        if seen == index {
            return Some(&record[start..hit]);
        }
        seen += 1;
        start = hit + delimiter.len();
    }
    if seen == index {
        Some(&record[start..])
    } else {
        None
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}
