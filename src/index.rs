//! Plain-text index emission for accepted requests.
//!
//! One line per accepted request, written through a bounded cache of open
//! output handles. Destinations come from a filename pattern; the oldest
//! handle is closed when the cache is full.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use lru::LruCache;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::constants::index as index_defaults;
use crate::errors::SpanError;
use crate::lifecycle::Lifecycle;
use crate::request::PartialRequest;

enum IndexHandle {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl IndexHandle {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            IndexHandle::Plain(writer) => writeln!(writer, "{line}"),
            IndexHandle::Gzip(writer) => writeln!(writer, "{line}"),
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            IndexHandle::Plain(mut writer) => writer.flush(),
            IndexHandle::Gzip(writer) => writer.finish().and_then(|mut inner| inner.flush()),
        }
    }
}

/// Persists accepted requests as index records.
pub struct IndexWriter {
    config: IndexConfig,
    handles: LruCache<PathBuf, IndexHandle>,
    /// Destinations already created this run; evicted handles reopen in
    /// append mode so earlier lines survive.
    created: HashSet<PathBuf>,
}

impl IndexWriter {
    /// Writer rooted at the configured base directory, which is created if
    /// missing.
    pub fn new(config: IndexConfig) -> Result<Self, SpanError> {
        let capacity = NonZeroUsize::new(config.max_open_handles).ok_or_else(|| {
            SpanError::Configuration("index.max_open_handles must be > 0".into())
        })?;
        fs::create_dir_all(&config.base_dir)?;
        Ok(Self {
            config,
            handles: LruCache::new(capacity),
            created: HashSet::new(),
        })
    }

    /// Serialize one accepted request to its destination index file.
    pub fn write(&mut self, request: &PartialRequest) -> Result<(), SpanError> {
        let destination = self.destination_for(&request.source_file);
        if !self.handles.contains(&destination) {
            if self.handles.len() == self.handles.cap().get() {
                if let Some((evicted_path, handle)) = self.handles.pop_lru() {
                    debug!(destination = %evicted_path.display(), "evicting oldest index handle");
                    if let Err(err) = handle.finish() {
                        warn!(destination = %evicted_path.display(), error = %err, "failed to close evicted index handle");
                    }
                }
            }
            let handle = self.open_handle(&destination)?;
            self.handles.put(destination.clone(), handle);
        }
        let line = self.format_line(request);
        let handle = self
            .handles
            .get_mut(&destination)
            .expect("handle just inserted");
        handle.write_line(&line).map_err(|err| SpanError::IndexWrite {
            destination: destination.clone(),
            source: err,
        })
    }

    /// Destination path for a source file under the configured pattern.
    pub fn destination_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("index");
        let mut name = self
            .config
            .file_pattern
            .replace(index_defaults::SOURCE_PLACEHOLDER, stem);
        if self.config.compress && !name.ends_with(index_defaults::GZIP_SUFFIX) {
            name.push_str(index_defaults::GZIP_SUFFIX);
        }
        self.config.base_dir.join(name)
    }

    fn format_line(&self, request: &PartialRequest) -> String {
        let canonical = fs::canonicalize(&request.source_file)
            .unwrap_or_else(|_| request.source_file.clone());
        let file_name = request
            .source_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sep = index_defaults::FIELD_SEPARATOR;
        format!(
            "{builder}{sep}{path}{sep}{file_name}{sep}{offset}{sep}{length}{sep}{key}",
            builder = self.config.builder_name,
            path = canonical.display(),
            offset = request.offset,
            length = request.length,
            key = request.request_key,
        )
    }

    fn open_handle(&mut self, destination: &Path) -> Result<IndexHandle, SpanError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        // The append flag governs the first open; reopens after eviction must
        // always append.
        let append = self.config.append || self.created.contains(destination);
        let file = if append {
            OpenOptions::new().create(true).append(true).open(destination)
        } else {
            File::create(destination)
        }
        .map_err(|err| SpanError::IndexWrite {
            destination: destination.to_path_buf(),
            source: err,
        })?;
        self.created.insert(destination.to_path_buf());
        let writer = BufWriter::new(file);
        Ok(if self.config.compress {
            IndexHandle::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            IndexHandle::Plain(writer)
        })
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Close every open handle; close failures are logged, not fatal.
    pub fn close_all(&mut self) {
        while let Some((destination, handle)) = self.handles.pop_lru() {
            if let Err(err) = handle.finish() {
                warn!(destination = %destination.display(), error = %err, "failed to close index handle");
            }
        }
    }
}

impl Lifecycle for IndexWriter {
    fn commit(&mut self) -> Result<(), SpanError> {
        self.close_all();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SpanError> {
        self.close_all();
        Ok(())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        self.close_all();
    }
}
