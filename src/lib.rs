#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Scan configuration types and compile-time validation.
pub mod config;
/// Centralized constants used across scanning, indexing, and replay.
pub mod constants;
/// Multi-file scan orchestration and worker pool.
pub mod coordinator;
/// Character encodings for tokens and record decoding.
pub mod encoding;
/// Field extraction primitives and the value converter registry.
pub mod fields;
/// Admission filters deciding which discovered requests are kept.
pub mod filter;
/// Index emission for accepted requests.
pub mod index;
/// Prepare/commit/rollback capability for handle-owning components.
pub mod lifecycle;
/// Partial request and request group types.
pub mod request;
/// Byte-exact replay of discovered ranges.
pub mod replay;
/// Single-file record scanning.
pub mod scanner;
/// Shared type aliases.
pub mod types;

mod errors;

pub use config::{
    CompiledScanConfig, IndexConfig, MatchToken, RecordDefinition, ScanConfig,
};
pub use coordinator::{ScanCoordinator, ScanReport};
pub use encoding::Encoding;
pub use errors::SpanError;
pub use fields::{Converter, ConverterRegistry, FieldDefinition, FieldSource};
pub use filter::{
    compare_accepted, AdmissionFilter, ComparisonOptions, ComparisonOutcome, RejectAllFilter,
    RestrictedFilter, UnionFilter, UnrestrictedFilter,
};
pub use index::IndexWriter;
pub use lifecycle::Lifecycle;
pub use replay::{PartialReplayReader, ReplaySource, SourceOpener};
pub use request::{
    group_by_key, merge_missing, AttrValue, PartialRequest, PartialRequestGroup,
};
pub use scanner::{RecordScanner, ScanOutcome, SpanDump};
pub use types::{
    AttributeKey, BuilderName, RecordName, RequestKey, TokenText, TypeName, UserKey,
};
