//! Byte-exact replay of previously discovered request ranges.
//!
//! The reader keeps a bounded LRU map from file path to an open handle plus a
//! cursor of bytes already consumed, so contiguous requests on the same file
//! continue sequentially without reseeking. Rollback invalidates the whole
//! cache; replaying through an invalidated cache fails fast instead of
//! silently reopening.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use tracing::{debug, warn};

use crate::constants::replay as replay_defaults;
use crate::errors::SpanError;
use crate::lifecycle::Lifecycle;
use crate::request::PartialRequest;

/// Readable replay source; seeking is optional.
pub trait ReplaySource: Read + Send {
    /// Position the source at `offset` from the start. Returns false when the
    /// source cannot seek, in which case the reader falls back to
    /// discard-reading.
    fn try_seek(&mut self, offset: u64) -> io::Result<bool> {
        let _ = offset;
        Ok(false)
    }
}

impl ReplaySource for File {
    fn try_seek(&mut self, offset: u64) -> io::Result<bool> {
        self.seek(SeekFrom::Start(offset))?;
        Ok(true)
    }
}

/// Factory opening replay sources; injectable for tests and non-file sources.
pub type SourceOpener = Box<dyn Fn(&Path) -> io::Result<Box<dyn ReplaySource>> + Send + Sync>;

struct ReplayHandle {
    source: Box<dyn ReplaySource>,
    /// Bytes already consumed from position 0.
    cursor: u64,
}

struct ReplayInner {
    cache: LruCache<PathBuf, ReplayHandle>,
    invalidated: bool,
    opener: SourceOpener,
}

/// Streams exactly the requested byte ranges of source files to a sink.
pub struct PartialReplayReader {
    inner: Mutex<ReplayInner>,
    scratch_bytes: usize,
}

impl Default for PartialReplayReader {
    /// Reader with the default handle-cache capacity, opening plain files.
    fn default() -> Self {
        Self::new(replay_defaults::DEFAULT_CACHE_CAPACITY)
    }
}

impl PartialReplayReader {
    /// Reader with a handle cache of `capacity` (minimum 1), opening plain
    /// files.
    pub fn new(capacity: usize) -> Self {
        Self::with_opener(
            capacity,
            Box::new(|path| {
                File::open(path).map(|file| Box::new(file) as Box<dyn ReplaySource>)
            }),
        )
    }

    /// Reader with a custom source opener.
    pub fn with_opener(capacity: usize, opener: SourceOpener) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped above zero");
        Self {
            inner: Mutex::new(ReplayInner {
                cache: LruCache::new(capacity),
                invalidated: false,
                opener,
            }),
            scratch_bytes: replay_defaults::SCRATCH_BYTES,
        }
    }

    /// Stream `[offset, offset + length)` of `source` into `sink`.
    ///
    /// Returns the number of bytes copied. I/O failures mid-copy are
    /// request-scoped: the handle is dropped and the error returned, leaving
    /// the cache usable for the next request. A rolled-back cache fails fast
    /// with [`SpanError::InvalidCache`].
    pub fn replay<W: Write>(
        &self,
        source: &Path,
        offset: u64,
        length: u64,
        sink: &mut W,
    ) -> Result<u64, SpanError> {
        let mut inner = self.inner.lock().expect("replay cache poisoned");
        if inner.invalidated {
            return Err(SpanError::InvalidCache);
        }

        // A cached handle is only reusable while its cursor has not passed
        // the requested offset.
        let mut handle = match inner.cache.pop(source) {
            Some(handle) if handle.cursor <= offset => handle,
            stale => {
                if stale.is_some() {
                    debug!(source = %source.display(), offset, "cached cursor past offset; reopening");
                }
                let opened = (inner.opener)(source).map_err(|err| replay_io(source, &err))?;
                ReplayHandle {
                    source: opened,
                    cursor: 0,
                }
            }
        };

        let mut scratch = vec![0u8; self.scratch_bytes.min(length.max(1) as usize)];
        if handle.cursor != offset {
            match handle.source.try_seek(offset) {
                Ok(true) => handle.cursor = offset,
                Ok(false) => {
                    // Discard-read up to the requested offset.
                    while handle.cursor < offset {
                        let want = scratch.len().min((offset - handle.cursor) as usize);
                        let got = handle
                            .source
                            .read(&mut scratch[..want])
                            .map_err(|err| replay_io(source, &err))?;
                        if got == 0 {
                            return Err(replay_short(source, offset, handle.cursor));
                        }
                        handle.cursor += got as u64;
                    }
                }
                Err(err) => return Err(replay_io(source, &err)),
            }
        }

        let mut copied: u64 = 0;
        while copied < length {
            let want = scratch.len().min((length - copied) as usize);
            let got = match handle.source.read(&mut scratch[..want]) {
                Ok(got) => got,
                Err(err) => return Err(replay_io(source, &err)),
            };
            if got == 0 {
                return Err(replay_short(source, offset + length, handle.cursor));
            }
            if let Err(err) = sink.write_all(&scratch[..got]) {
                // Abandon only the remainder of this request; the handle's
                // stream position no longer matches its cursor, so drop it.
                warn!(source = %source.display(), copied, error = %err, "replay sink rejected write");
                return Err(replay_io(source, &err));
            }
            handle.cursor += got as u64;
            copied += got as u64;
        }

        // Re-cache for a later contiguous request; may evict (and close) the
        // least-recently-used handle.
        inner.cache.push(source.to_path_buf(), handle);
        Ok(copied)
    }

    /// Replay the range described by an accepted request.
    pub fn replay_request<W: Write>(
        &self,
        request: &PartialRequest,
        sink: &mut W,
    ) -> Result<u64, SpanError> {
        self.replay(&request.source_file, request.offset, request.length, sink)
    }

    /// Replay a batch; request-scoped I/O errors are logged and skipped,
    /// while an invalidated cache still fails fast.
    pub fn replay_all<W: Write>(
        &self,
        requests: &[PartialRequest],
        sink: &mut W,
    ) -> Result<u64, SpanError> {
        let mut total = 0;
        for request in requests {
            match self.replay_request(request, sink) {
                Ok(copied) => total += copied,
                Err(SpanError::InvalidCache) => return Err(SpanError::InvalidCache),
                Err(err) => {
                    warn!(key = %request.request_key, error = %err, "skipping request after replay failure");
                }
            }
        }
        Ok(total)
    }

    /// Number of currently cached handles.
    pub fn cached_handles(&self) -> usize {
        self.inner.lock().expect("replay cache poisoned").cache.len()
    }

    /// Close every handle and refuse further replays until prepared again.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().expect("replay cache poisoned");
        inner.cache.clear();
        inner.invalidated = true;
    }
}

impl Lifecycle for PartialReplayReader {
    fn prepare(&mut self) -> Result<(), SpanError> {
        let mut inner = self.inner.lock().expect("replay cache poisoned");
        inner.invalidated = false;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SpanError> {
        let mut inner = self.inner.lock().expect("replay cache poisoned");
        inner.cache.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SpanError> {
        self.invalidate();
        Ok(())
    }
}

fn replay_io(source: &Path, err: &io::Error) -> SpanError {
    SpanError::ReplayIo {
        source_file: source.to_path_buf(),
        detail: err.to_string(),
    }
}

fn replay_short(source: &Path, wanted_end: u64, reached: u64) -> SpanError {
    SpanError::ReplayIo {
        source_file: source.to_path_buf(),
        detail: format!("source ended at byte {reached}, before requested end {wanted_end}"),
    }
}
