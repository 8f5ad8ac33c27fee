use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constants::{index as index_defaults, scan as scan_defaults};
use crate::encoding::Encoding;
use crate::errors::SpanError;
use crate::fields::{CompiledField, ConverterRegistry, FieldDefinition, FieldSource};
use crate::request::AttrValue;
use crate::types::{AttributeKey, BuilderName, RecordName, TokenText};

/// Token matched byte-for-byte against an extracted record-key field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchToken {
    /// Literal token text, encoded once at compile time.
    Literal(TokenText),
    /// Reserved `*` wildcard: every record matches.
    Wildcard,
}

impl MatchToken {
    /// Literal token constructor; the reserved `*` becomes the wildcard.
    pub fn literal(token: impl Into<TokenText>) -> Self {
        let token = token.into();
        if token == scan_defaults::WILDCARD_TOKEN {
            MatchToken::Wildcard
        } else {
            MatchToken::Literal(token)
        }
    }
}

/// Named set of attribute fields extracted from matching records.
///
/// The definition named `*` is the wildcard definition and applies to every
/// record; named definitions apply only when the record key equals the name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordDefinition {
    /// Record-key value this definition applies to (`*` = every record).
    pub name: RecordName,
    /// Attribute name to field definition pairs.
    pub fields: Vec<(AttributeKey, FieldDefinition)>,
}

impl RecordDefinition {
    /// Definition applying to records whose key equals `name`.
    pub fn named(name: impl Into<RecordName>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Definition applying to every record.
    pub fn wildcard() -> Self {
        Self::named(scan_defaults::WILDCARD_TOKEN)
    }

    /// Builder-style field registration.
    pub fn with_field(mut self, attribute: impl Into<AttributeKey>, field: FieldDefinition) -> Self {
        self.fields.push((attribute.into(), field));
        self
    }

    fn is_wildcard(&self) -> bool {
        self.name == scan_defaults::WILDCARD_TOKEN
    }
}

/// Index emission settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory index files are written under.
    pub base_dir: PathBuf,
    /// Destination filename pattern; `{source}` is replaced with the source
    /// file stem.
    pub file_pattern: String,
    /// Gzip-compress index output.
    pub compress: bool,
    /// Append to existing destinations instead of truncating them.
    pub append: bool,
    /// Cap on concurrently open output handles; the oldest handle is closed
    /// on eviction.
    pub max_open_handles: usize,
    /// Builder name stamped into every index record.
    pub builder_name: BuilderName,
}

impl IndexConfig {
    /// Index configuration with defaults, rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_pattern: index_defaults::DEFAULT_FILE_PATTERN.to_string(),
            compress: false,
            append: false,
            max_open_handles: index_defaults::DEFAULT_MAX_OPEN_HANDLES,
            builder_name: index_defaults::DEFAULT_BUILDER_NAME.to_string(),
        }
    }
}

/// Top-level scan configuration.
///
/// Compiled once via [`ScanConfig::compile`], which performs every
/// construction-time validation: token encodability, field sanity, and
/// converter resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Refill buffer size in bytes.
    pub buffer_size: usize,
    /// Maximum record size in bytes; a record exceeding this aborts the scan
    /// of its file.
    pub max_record_size: usize,
    /// Character encoding for tokens, delimiters, and record decoding.
    pub encoding: Encoding,
    /// Record delimiter (default newline).
    pub record_delimiter: String,
    /// Field delimiter; absence means fixed-width fields only.
    pub field_delimiter: Option<String>,
    /// Field holding the record key.
    pub record_key: FieldDefinition,
    /// Token opening a new request when the record key matches.
    pub new_request_token: MatchToken,
    /// Fields concatenated into the external request key.
    pub request_key_fields: Vec<FieldDefinition>,
    /// Delimiter joining composite request-key fields.
    pub request_key_delimiter: String,
    /// Token selecting records the request key is read from.
    pub request_key_token: MatchToken,
    /// Named and wildcard record definitions.
    pub record_definitions: Vec<RecordDefinition>,
    /// Static attributes deep-copied into every produced request.
    pub default_attributes: IndexMap<AttributeKey, AttrValue>,
    /// Worker thread count; 0 selects a small multiple of available
    /// parallelism.
    pub worker_threads: usize,
    /// Tolerate per-file I/O errors instead of aborting the whole scan.
    pub tolerate_io_errors: bool,
    /// Optional index emission settings.
    pub index: Option<IndexConfig>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            buffer_size: scan_defaults::DEFAULT_BUFFER_SIZE,
            max_record_size: scan_defaults::DEFAULT_MAX_RECORD_SIZE,
            encoding: Encoding::Utf8,
            record_delimiter: scan_defaults::DEFAULT_RECORD_DELIMITER.to_string(),
            field_delimiter: None,
            record_key: FieldDefinition::fixed(0, 1),
            new_request_token: MatchToken::Wildcard,
            request_key_fields: Vec::new(),
            request_key_delimiter: scan_defaults::DEFAULT_REQUEST_KEY_DELIMITER.to_string(),
            request_key_token: MatchToken::Wildcard,
            record_definitions: Vec::new(),
            default_attributes: IndexMap::new(),
            worker_threads: 0,
            tolerate_io_errors: false,
            index: None,
        }
    }
}

impl ScanConfig {
    /// Compile with the built-in converter registry.
    pub fn compile(self) -> Result<CompiledScanConfig, SpanError> {
        self.compile_with(&ConverterRegistry::new())
    }

    /// Validate the configuration and resolve every field against `registry`.
    pub fn compile_with(self, registry: &ConverterRegistry) -> Result<CompiledScanConfig, SpanError> {
        if self.buffer_size == 0 {
            return Err(SpanError::Configuration("buffer_size must be > 0".into()));
        }
        if self.max_record_size == 0 {
            return Err(SpanError::Configuration(
                "max_record_size must be > 0".into(),
            ));
        }
        if self.record_delimiter.is_empty() {
            return Err(SpanError::Configuration(
                "record_delimiter must not be empty".into(),
            ));
        }
        if matches!(self.field_delimiter.as_deref(), Some("")) {
            return Err(SpanError::Configuration(
                "field_delimiter must not be empty when set".into(),
            ));
        }
        if let Some(index) = &self.index {
            if index.max_open_handles == 0 {
                return Err(SpanError::Configuration(
                    "index.max_open_handles must be > 0".into(),
                ));
            }
            if index.file_pattern.is_empty() {
                return Err(SpanError::Configuration(
                    "index.file_pattern must not be empty".into(),
                ));
            }
        }

        let encoding = self.encoding;
        let record_delimiter = encoding.encode(&self.record_delimiter)?;
        let field_delimiter_bytes = self
            .field_delimiter
            .as_deref()
            .map(|delimiter| encoding.encode(delimiter))
            .transpose()?;

        let has_field_delimiter = self.field_delimiter.is_some();
        let record_key = compile_field(&self.record_key, registry, has_field_delimiter)?;
        let request_key_fields = self
            .request_key_fields
            .iter()
            .map(|field| compile_field(field, registry, has_field_delimiter))
            .collect::<Result<Vec<_>, _>>()?;

        let new_request_token = compile_token(&self.new_request_token, encoding)?;
        let request_key_token = compile_token(&self.request_key_token, encoding)?;

        let mut named_definitions = Vec::new();
        let mut wildcard_definition = None;
        for definition in &self.record_definitions {
            let fields = definition
                .fields
                .iter()
                .map(|(attribute, field)| {
                    compile_field(field, registry, has_field_delimiter)
                        .map(|compiled| (attribute.clone(), compiled))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if definition.is_wildcard() {
                if wildcard_definition.is_some() {
                    return Err(SpanError::Configuration(
                        "at most one wildcard record definition is allowed".into(),
                    ));
                }
                wildcard_definition = Some(CompiledRecordDefinition {
                    name_bytes: Vec::new(),
                    fields,
                });
            } else {
                named_definitions.push(CompiledRecordDefinition {
                    name_bytes: encoding.encode(&definition.name)?,
                    fields,
                });
            }
        }

        Ok(CompiledScanConfig {
            field_delimiter_bytes,
            record_key,
            new_request_token,
            request_key_fields,
            request_key_token,
            named_definitions,
            wildcard_definition,
            record_delimiter,
            config: self,
        })
    }
}

fn compile_token(token: &MatchToken, encoding: Encoding) -> Result<CompiledToken, SpanError> {
    match token {
        MatchToken::Wildcard => Ok(CompiledToken::Wildcard),
        MatchToken::Literal(text) => {
            if text.is_empty() {
                return Err(SpanError::Configuration(
                    "match token must not be empty".into(),
                ));
            }
            Ok(CompiledToken::Bytes(encoding.encode(text)?))
        }
    }
}

fn compile_field(
    definition: &FieldDefinition,
    registry: &ConverterRegistry,
    has_field_delimiter: bool,
) -> Result<CompiledField, SpanError> {
    match definition.source {
        FieldSource::Fixed { length, .. } if length == 0 => {
            return Err(SpanError::Configuration(
                "fixed field length must be > 0".into(),
            ));
        }
        FieldSource::Delimited { .. } if !has_field_delimiter => {
            return Err(SpanError::Configuration(
                "delimited fields require a field_delimiter".into(),
            ));
        }
        _ => {}
    }
    let converter = definition
        .type_name
        .as_ref()
        .map(|name| {
            registry
                .resolve(name)
                .map(|converter| (name.clone(), converter))
                .ok_or_else(|| {
                    SpanError::Configuration(format!("unknown field type '{name}'"))
                })
        })
        .transpose()?;
    Ok(CompiledField {
        source: definition.source.clone(),
        trim: definition.trim,
        converter,
    })
}

/// Compiled token representation used for byte-for-byte comparison.
#[derive(Clone, Debug)]
pub(crate) enum CompiledToken {
    Wildcard,
    Bytes(Vec<u8>),
}

impl CompiledToken {
    /// True when the extracted key matches this token.
    pub(crate) fn matches(&self, key: Option<&[u8]>) -> bool {
        match self {
            CompiledToken::Wildcard => true,
            CompiledToken::Bytes(token) => key == Some(token.as_slice()),
        }
    }
}

/// Record definition with its name encoded and fields resolved.
#[derive(Clone, Debug)]
pub(crate) struct CompiledRecordDefinition {
    pub(crate) name_bytes: Vec<u8>,
    pub(crate) fields: Vec<(AttributeKey, CompiledField)>,
}

/// Validated, compiled scan configuration shared by scanner tasks.
#[derive(Debug)]
pub struct CompiledScanConfig {
    pub(crate) config: ScanConfig,
    pub(crate) record_delimiter: Vec<u8>,
    pub(crate) field_delimiter_bytes: Option<Vec<u8>>,
    pub(crate) record_key: CompiledField,
    pub(crate) new_request_token: CompiledToken,
    pub(crate) request_key_fields: Vec<CompiledField>,
    pub(crate) request_key_token: CompiledToken,
    pub(crate) named_definitions: Vec<CompiledRecordDefinition>,
    pub(crate) wildcard_definition: Option<CompiledRecordDefinition>,
}

impl CompiledScanConfig {
    /// The source configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Worker count after resolving the 0 = auto setting.
    pub fn effective_workers(&self) -> usize {
        if self.config.worker_threads > 0 {
            return self.config.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|cpus| cpus.get() * scan_defaults::WORKERS_PER_CPU)
            .unwrap_or(scan_defaults::FALLBACK_WORKERS)
    }
}
