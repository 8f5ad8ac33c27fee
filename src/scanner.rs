//! Single-file record scan: delimiter-bounded byte records into request spans.
//!
//! The scan touches only task-local memory. Records are located with a raw
//! byte search; only records the configuration cares about (a named record
//! definition, the wildcard definition, or the request-key token) are decoded
//! to text. Every closed span is handed to the caller's sink immediately, so
//! the coordinator can merge under its coarse lock while the scan keeps
//! running.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use memchr::memmem;
use tracing::debug;

use crate::config::{CompiledRecordDefinition, CompiledScanConfig};
use crate::errors::SpanError;
use crate::request::{AttrValue, PartialRequest};
use crate::types::{AttributeKey, RequestKey};

/// Debug collaborator receiving every raw record span.
pub trait SpanDump: Send + Sync {
    /// Called once per record with its absolute offset and raw bytes
    /// (delimiter excluded).
    fn dump(&self, source: &Path, offset: u64, record: &[u8]);
}

/// Summary of one file scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanOutcome {
    /// Spans emitted to the sink (including empty-key spans).
    pub spans_emitted: usize,
    /// Bytes consumed from the file.
    pub bytes_scanned: u64,
    /// True when the scan stopped at a cooperative cancellation point.
    pub cancelled: bool,
}

/// Scans one file as a sequence of raw byte records.
pub struct RecordScanner<'a> {
    config: &'a CompiledScanConfig,
    dump: Option<&'a dyn SpanDump>,
}

/// Accumulator for the span currently being built.
struct PendingRequest {
    start: u64,
    length: u64,
    key: RequestKey,
    attributes: IndexMap<AttributeKey, AttrValue>,
}

impl PendingRequest {
    fn open(start: u64, defaults: &IndexMap<AttributeKey, AttrValue>) -> Self {
        Self {
            start,
            length: 0,
            key: String::new(),
            // Deep copy so produced requests never alias configuration state.
            attributes: defaults.clone(),
        }
    }

    fn close(self, source: &Path) -> PartialRequest {
        PartialRequest {
            request_key: self.key,
            source_file: PathBuf::from(source),
            offset: self.start,
            length: self.length,
            attributes: self.attributes,
            transaction_id: None,
        }
    }
}

impl<'a> RecordScanner<'a> {
    /// Scanner over a compiled configuration.
    pub fn new(config: &'a CompiledScanConfig) -> Self {
        Self { config, dump: None }
    }

    /// Attach a raw span dumper.
    pub fn with_dump(mut self, dump: &'a dyn SpanDump) -> Self {
        self.dump = Some(dump);
        self
    }

    /// Scan `source`, emitting every closed span through `emit` in file order.
    ///
    /// Emitted spans are contiguous, non-overlapping, and cover the file
    /// exactly once; spans whose key never resolved are emitted too (the
    /// caller decides whether to discard them). `cancel` is checked at every
    /// buffer refill.
    pub fn scan<F>(
        &self,
        source: &Path,
        cancel: Option<&AtomicBool>,
        mut emit: F,
    ) -> Result<ScanOutcome, SpanError>
    where
        F: FnMut(PartialRequest) -> Result<(), SpanError>,
    {
        let mut file = File::open(source).map_err(|err| scan_io(source, err))?;
        let config = &self.config.config;
        let delimiter = &self.config.record_delimiter;
        let finder = memmem::Finder::new(delimiter.as_slice());
        let record_cap = config.max_record_size.max(config.buffer_size);

        let mut outcome = ScanOutcome::default();
        let mut fill = vec![0u8; config.buffer_size];
        let mut carry: Vec<u8> = Vec::with_capacity(config.buffer_size);
        let mut consumed: u64 = 0;
        let mut pending = PendingRequest::open(0, &config.default_attributes);

        loop {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    outcome.cancelled = true;
                    debug!(source = %source.display(), "scan cancelled at refill point");
                    return Ok(outcome);
                }
            }
            let filled = file.read(&mut fill).map_err(|err| scan_io(source, err))?;
            if filled == 0 {
                break;
            }
            carry.extend_from_slice(&fill[..filled]);

            let mut cursor = 0usize;
            while let Some(found) = finder.find(&carry[cursor..]) {
                let record_end = cursor + found;
                let record_offset = consumed + cursor as u64;
                let record = &carry[cursor..record_end];
                let span_length = (record.len() + delimiter.len()) as u64;
                self.take_record(
                    source,
                    record,
                    record_offset,
                    span_length,
                    &mut pending,
                    &mut outcome,
                    &mut emit,
                )?;
                cursor = record_end + delimiter.len();
            }
            carry.drain(..cursor);
            consumed += cursor as u64;
            if carry.len() > record_cap {
                return Err(scan_io(
                    source,
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("record exceeds maximum record size of {record_cap} bytes"),
                    ),
                ));
            }
        }

        // Any remainder after the last delimiter is one final implicit record.
        if !carry.is_empty() {
            let record = std::mem::take(&mut carry);
            self.take_record(
                source,
                &record,
                consumed,
                record.len() as u64,
                &mut pending,
                &mut outcome,
                &mut emit,
            )?;
            consumed += record.len() as u64;
        }
        if pending.length > 0 {
            outcome.spans_emitted += 1;
            emit(pending.close(source))?;
        }
        outcome.bytes_scanned = consumed;
        debug!(
            source = %source.display(),
            bytes = outcome.bytes_scanned,
            spans = outcome.spans_emitted,
            "file scan complete"
        );
        Ok(outcome)
    }

    /// Process one record: boundary decision, attribute extraction, span
    /// accounting.
    #[allow(clippy::too_many_arguments)]
    fn take_record<F>(
        &self,
        source: &Path,
        record: &[u8],
        record_offset: u64,
        span_length: u64,
        pending: &mut PendingRequest,
        outcome: &mut ScanOutcome,
        emit: &mut F,
    ) -> Result<(), SpanError>
    where
        F: FnMut(PartialRequest) -> Result<(), SpanError>,
    {
        if let Some(dump) = self.dump {
            dump.dump(source, record_offset, record);
        }
        let config = &self.config.config;
        let field_delimiter = self.config.field_delimiter_bytes.as_deref();
        let key = self.config.record_key.extract_raw(record, field_delimiter);

        if self.config.new_request_token.matches(key) {
            if pending.length > 0 {
                let previous =
                    std::mem::replace(pending, PendingRequest::open(record_offset, &config.default_attributes));
                outcome.spans_emitted += 1;
                emit(previous.close(source))?;
            } else {
                pending.start = record_offset;
            }
        }

        let named = key.and_then(|key| {
            self.config
                .named_definitions
                .iter()
                .find(|definition| definition.name_bytes == key)
        });
        let keyed = self.config.request_key_token.matches(key);
        if named.is_some() || self.config.wildcard_definition.is_some() || keyed {
            self.decode_record(record, named, keyed, pending);
        }

        pending.length += span_length;
        Ok(())
    }

    /// Decode only this record and pull attributes / the external key out of
    /// it.
    fn decode_record(
        &self,
        record: &[u8],
        named: Option<&CompiledRecordDefinition>,
        keyed: bool,
        pending: &mut PendingRequest,
    ) {
        let config = &self.config.config;
        let decode_window = record.len().min(config.max_record_size);
        let text = config.encoding.decode(&record[..decode_window]);
        let field_delimiter = config.field_delimiter.as_deref();

        // Wildcard attributes apply to every record, named ones only on match.
        if let Some(definition) = &self.config.wildcard_definition {
            apply_fields(definition, &text, field_delimiter, &mut pending.attributes);
        }
        if let Some(definition) = named {
            apply_fields(definition, &text, field_delimiter, &mut pending.attributes);
        }

        if keyed && !self.config.request_key_fields.is_empty() {
            let parts: Vec<String> = self
                .config
                .request_key_fields
                .iter()
                .filter_map(|field| field.extract_value(&text, field_delimiter))
                .collect();
            if !parts.is_empty() {
                // Last occurrence within the pending span wins.
                pending.key = parts.join(&config.request_key_delimiter);
            }
        }
    }
}

fn apply_fields(
    definition: &CompiledRecordDefinition,
    text: &str,
    field_delimiter: Option<&str>,
    attributes: &mut IndexMap<AttributeKey, AttrValue>,
) {
    for (attribute, field) in &definition.fields {
        if let Some(value) = field.extract_value(text, field_delimiter) {
            attributes.insert(attribute.clone(), AttrValue::Text(value));
        }
    }
}

fn scan_io(source: &Path, err: io::Error) -> SpanError {
    SpanError::ScanIo {
        source_file: source.to_path_buf(),
        source: err,
    }
}
