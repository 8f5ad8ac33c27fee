/// Constants used by the record scanner and coordinator defaults.
pub mod scan {
    /// Default refill buffer size in bytes.
    pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
    /// Default maximum record size in bytes (sizes the per-record decode scratch).
    pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024;
    /// Default record delimiter.
    pub const DEFAULT_RECORD_DELIMITER: &str = "\n";
    /// Reserved wildcard token matching every record.
    pub const WILDCARD_TOKEN: &str = "*";
    /// Default delimiter joining composite request-key fields.
    pub const DEFAULT_REQUEST_KEY_DELIMITER: &str = ";";
    /// Worker threads per unit of available parallelism when `worker_threads` is 0.
    pub const WORKERS_PER_CPU: usize = 2;
    /// Worker count fallback when available parallelism cannot be determined.
    pub const FALLBACK_WORKERS: usize = 4;
}

/// Constants used by index emission and the index record layout.
pub mod index {
    /// Separator between fields of one index record line.
    pub const FIELD_SEPARATOR: char = '\t';
    /// Default destination filename pattern (`{source}` is the source file stem).
    pub const DEFAULT_FILE_PATTERN: &str = "{source}.idx";
    /// Placeholder substituted with the source file stem in filename patterns.
    pub const SOURCE_PLACEHOLDER: &str = "{source}";
    /// Suffix appended to destinations when compression is enabled.
    pub const GZIP_SUFFIX: &str = ".gz";
    /// Default cap on concurrently open index output handles.
    pub const DEFAULT_MAX_OPEN_HANDLES: usize = 16;
    /// Default builder name stamped into index records.
    pub const DEFAULT_BUILDER_NAME: &str = "recspan";
}

/// Constants used by the partial replay reader.
pub mod replay {
    /// Default cap on concurrently cached replay handles.
    pub const DEFAULT_CACHE_CAPACITY: usize = 8;
    /// Size of the reusable copy scratch buffer in bytes.
    pub const SCRATCH_BYTES: usize = 64 * 1024;
}

/// Names of the built-in field value converters.
pub mod convert {
    /// Pass-through converter.
    pub const TYPE_TEXT: &str = "text";
    /// Integer coerce-then-restringify converter (normalizes leading zeros).
    pub const TYPE_INTEGER: &str = "integer";
    /// Decimal coerce-then-restringify converter.
    pub const TYPE_DECIMAL: &str = "decimal";
    /// Boolean coerce-then-restringify converter (`true`/`false`).
    pub const TYPE_BOOLEAN: &str = "boolean";
}
