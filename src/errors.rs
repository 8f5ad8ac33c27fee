use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for configuration, scan, index, and replay failures.
#[derive(Debug, Error)]
pub enum SpanError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token '{token}' cannot be represented in encoding '{encoding}'")]
    Encoding { token: String, encoding: &'static str },
    #[error("scan of '{source_file}' failed: {source}")]
    ScanIo {
        source_file: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("replay of '{source_file}' failed: {detail}")]
    ReplayIo { source_file: PathBuf, detail: String },
    #[error("replay cache was invalidated by rollback and must be prepared before reuse")]
    InvalidCache,
    #[error("index write to '{destination}' failed: {source}")]
    IndexWrite {
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}
