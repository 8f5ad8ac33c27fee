//! Multi-file scan orchestration.
//!
//! One scanner task per file on a bounded worker pool. The scan loops touch
//! only task-local memory; the single shared filter (and the optional index
//! writer) sit behind one coarse lock taken only around the per-request merge
//! step. Cancellation is cooperative: the flag is set here and checked inside
//! every scanner's refill loop.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CompiledScanConfig;
use crate::errors::SpanError;
use crate::filter::AdmissionFilter;
use crate::index::IndexWriter;
use crate::request::PartialRequest;
use crate::scanner::{RecordScanner, SpanDump};

/// Summary counters for one coordinator run.
#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    /// Files scanned to completion.
    pub files_scanned: usize,
    /// Files abandoned after a tolerated I/O error.
    pub files_failed: Vec<PathBuf>,
    /// Keyed spans offered to the shared filter.
    pub requests_discovered: usize,
    /// Requests stored by the shared filter at the end of the run.
    pub requests_accepted: usize,
    /// Bytes consumed across all completed files.
    pub bytes_scanned: u64,
    /// True when the run stopped early at the accepted-request target.
    pub cancelled: bool,
}

/// Shared mutable state: everything the coarse merge lock guards.
struct SharedSink {
    filter: Box<dyn AdmissionFilter>,
    index: Option<IndexWriter>,
}

/// Runs one scanner task per input file and merges results into one filter.
pub struct ScanCoordinator {
    config: CompiledScanConfig,
    shared: Mutex<SharedSink>,
    target: Option<usize>,
    dump: Option<Box<dyn SpanDump>>,
}

impl ScanCoordinator {
    /// Coordinator over a compiled configuration and a shared filter.
    ///
    /// When the configuration carries index settings the writer is created
    /// here, so destination problems surface before any scanning starts.
    pub fn new(
        config: CompiledScanConfig,
        filter: Box<dyn AdmissionFilter>,
    ) -> Result<Self, SpanError> {
        let index = config
            .config()
            .index
            .clone()
            .map(IndexWriter::new)
            .transpose()?;
        Ok(Self {
            config,
            shared: Mutex::new(SharedSink { filter, index }),
            target: None,
            dump: None,
        })
    }

    /// Stop early once this many requests were accepted.
    ///
    /// Meaningful only with a fixed allow-list of expected keys; ignored while
    /// an index is being written, because the index must reflect every file.
    pub fn with_target(mut self, target: usize) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach a raw span dumper handed to every scanner task.
    pub fn with_dump(mut self, dump: Box<dyn SpanDump>) -> Self {
        self.dump = Some(dump);
        self
    }

    /// Scan all inputs (directories are expanded recursively) and merge every
    /// discovered request into the shared filter.
    pub fn run(&self, inputs: &[PathBuf]) -> Result<ScanReport, SpanError> {
        let files = expand_inputs(inputs);
        let tolerate = self.config.config().tolerate_io_errors;
        let workers = self.config.effective_workers().min(files.len().max(1));

        let queue = Mutex::new(VecDeque::from(files));
        let cancel = AtomicBool::new(false);
        let fatal: Mutex<Option<SpanError>> = Mutex::new(None);
        let failed: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
        let files_scanned = AtomicUsize::new(0);
        let discovered = AtomicUsize::new(0);
        let bytes_scanned = AtomicU64::new(0);
        let dump = self.dump.as_deref();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let next = {
                            let mut queue = queue.lock().expect("scan queue poisoned");
                            queue.pop_front()
                        };
                        let Some(path) = next else { break };
                        let mut scanner = RecordScanner::new(&self.config);
                        if let Some(dump) = dump {
                            scanner = scanner.with_dump(dump);
                        }
                        let result = scanner.scan(&path, Some(&cancel), |request| {
                            self.merge(request, &discovered, &cancel)
                        });
                        match result {
                            Ok(outcome) => {
                                bytes_scanned.fetch_add(outcome.bytes_scanned, Ordering::Relaxed);
                                if !outcome.cancelled {
                                    files_scanned.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Err(err) => {
                                if tolerate && matches!(err, SpanError::ScanIo { .. }) {
                                    warn!(
                                        source = %path.display(),
                                        error = %err,
                                        "abandoning file after I/O error"
                                    );
                                    // Ranges already merged for this file are
                                    // suspect; retract them.
                                    let mut shared =
                                        self.shared.lock().expect("scan sink poisoned");
                                    shared.filter.discard_source(&path);
                                    drop(shared);
                                    failed.lock().expect("failed list poisoned").push(path);
                                } else {
                                    let mut fatal =
                                        fatal.lock().expect("fatal slot poisoned");
                                    if fatal.is_none() {
                                        *fatal = Some(err);
                                    }
                                    cancel.store(true, Ordering::Relaxed);
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        let mut shared = self.shared.lock().expect("scan sink poisoned");
        if let Some(err) = fatal.into_inner().expect("fatal slot poisoned") {
            if let Some(index) = shared.index.as_mut() {
                index.close_all();
            }
            return Err(err);
        }
        if let Some(index) = shared.index.as_mut() {
            index.close_all();
        }
        Ok(ScanReport {
            files_scanned: files_scanned.into_inner(),
            files_failed: failed.into_inner().expect("failed list poisoned"),
            requests_discovered: discovered.into_inner(),
            requests_accepted: shared.filter.accepted_count(),
            bytes_scanned: bytes_scanned.into_inner(),
            cancelled: cancel.into_inner(),
        })
    }

    /// Flush one discovered request into the shared filter under the coarse
    /// lock; the expensive scanning work stays outside it.
    fn merge(
        &self,
        request: PartialRequest,
        discovered: &AtomicUsize,
        cancel: &AtomicBool,
    ) -> Result<(), SpanError> {
        if !request.has_key() {
            debug!(
                source = %request.source_file.display(),
                offset = request.offset,
                length = request.length,
                "discarding span without a resolved request key"
            );
            return Ok(());
        }
        discovered.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.shared.lock().expect("scan sink poisoned");
        let shared = &mut *guard;
        let index_copy = shared.index.is_some().then(|| request.clone());
        if !shared.filter.accept(request, false) {
            return Ok(());
        }
        if let (Some(index), Some(request)) = (shared.index.as_mut(), index_copy.as_ref()) {
            index.write(request)?;
        }
        if let Some(target) = self.target {
            if shared.index.is_none() && shared.filter.accepted_count() >= target {
                debug!(target, "accepted-request target reached; cancelling remaining tasks");
                cancel.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Snapshot of the shared filter's accepted requests.
    pub fn accepted_requests(&self) -> Vec<PartialRequest> {
        self.shared
            .lock()
            .expect("scan sink poisoned")
            .filter
            .accepted_requests()
    }

    /// Consume the coordinator, handing the shared filter to the caller.
    pub fn into_filter(self) -> Box<dyn AdmissionFilter> {
        self.shared
            .into_inner()
            .expect("scan sink poisoned")
            .filter
    }
}

/// Expand inputs: files pass through, directories contribute every contained
/// file in path order. Missing paths pass through so the scan surfaces the
/// open error under the configured failure policy.
fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut contained: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect();
            contained.sort();
            files.extend(contained);
        } else {
            files.push(input.clone());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MatchToken, ScanConfig};
    use crate::fields::FieldDefinition;
    use crate::filter::UnrestrictedFilter;
    use std::fs;
    use tempfile::tempdir;

    fn demo_config(tolerate: bool) -> CompiledScanConfig {
        ScanConfig {
            field_delimiter: Some(";".to_string()),
            record_key: FieldDefinition::delimited(2),
            new_request_token: MatchToken::literal("new"),
            request_key_fields: vec![FieldDefinition::delimited(1)],
            request_key_token: MatchToken::literal("new"),
            worker_threads: 2,
            tolerate_io_errors: tolerate,
            ..ScanConfig::default()
        }
        .compile()
        .expect("demo config compiles")
    }

    #[test]
    fn merges_requests_from_multiple_files() {
        let temp = tempdir().unwrap();
        for (name, key) in [("a.dat", "A"), ("b.dat", "B"), ("c.dat", "C")] {
            fs::write(
                temp.path().join(name),
                format!("H;{key};new\nR;{key};v\n"),
            )
            .unwrap();
        }
        let coordinator =
            ScanCoordinator::new(demo_config(false), Box::new(UnrestrictedFilter::new())).unwrap();
        let report = coordinator.run(&[temp.path().to_path_buf()]).unwrap();
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.requests_accepted, 3);
        assert!(!report.cancelled);

        let mut keys: Vec<String> = coordinator
            .accepted_requests()
            .into_iter()
            .map(|request| request.request_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["A", "B", "C"]);
    }

    #[test]
    fn missing_file_is_fatal_by_default() {
        let temp = tempdir().unwrap();
        let coordinator =
            ScanCoordinator::new(demo_config(false), Box::new(UnrestrictedFilter::new())).unwrap();
        let err = coordinator
            .run(&[temp.path().join("absent.dat")])
            .unwrap_err();
        assert!(matches!(err, SpanError::ScanIo { .. }));
    }

    #[test]
    fn tolerant_mode_abandons_failed_file_and_continues() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("good.dat"), "H;K;new\nR;K;v\n").unwrap();
        let missing = temp.path().join("absent.dat");
        let coordinator =
            ScanCoordinator::new(demo_config(true), Box::new(UnrestrictedFilter::new())).unwrap();
        let report = coordinator
            .run(&[temp.path().join("good.dat"), missing.clone()])
            .unwrap();
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.files_failed, vec![missing]);
        assert_eq!(report.requests_accepted, 1);
    }
}
