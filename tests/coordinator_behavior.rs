use std::fs;
use std::path::PathBuf;

use tempfile::tempdir;

use recspan::{
    FieldDefinition, MatchToken, PartialRequest, RestrictedFilter, ScanConfig, ScanCoordinator,
    SpanError, UnionFilter, UnrestrictedFilter,
};

fn demo_config() -> ScanConfig {
    ScanConfig {
        field_delimiter: Some(";".to_string()),
        record_key: FieldDefinition::delimited(2),
        new_request_token: MatchToken::literal("new"),
        request_key_fields: vec![FieldDefinition::delimited(1)],
        request_key_token: MatchToken::literal("new"),
        ..ScanConfig::default()
    }
}

fn write_request_file(dir: &std::path::Path, name: &str, keys: &[&str]) -> PathBuf {
    let mut contents = String::new();
    for key in keys {
        contents.push_str(&format!("H;{key};new\nR;{key};payload\n"));
    }
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn placeholder(key: &str) -> PartialRequest {
    PartialRequest::new("allow-list", 0, 0).with_key(key)
}

#[test]
fn parallel_scan_merges_into_one_filter() {
    let temp = tempdir().unwrap();
    let inputs: Vec<PathBuf> = (0..6)
        .map(|i| write_request_file(temp.path(), &format!("f{i}.dat"), &[&format!("K{i}")]))
        .collect();

    let config = ScanConfig {
        worker_threads: 4,
        ..demo_config()
    }
    .compile()
    .unwrap();
    let coordinator = ScanCoordinator::new(config, Box::new(UnrestrictedFilter::new())).unwrap();
    let report = coordinator.run(&inputs).unwrap();

    assert_eq!(report.files_scanned, 6);
    assert_eq!(report.requests_discovered, 6);
    assert_eq!(report.requests_accepted, 6);
    assert!(!report.cancelled);

    let mut keys: Vec<String> = coordinator
        .accepted_requests()
        .into_iter()
        .map(|request| request.request_key)
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["K0", "K1", "K2", "K3", "K4", "K5"]);
}

#[test]
fn restricted_filter_only_admits_allow_listed_keys() {
    let temp = tempdir().unwrap();
    let input = write_request_file(temp.path(), "mixed.dat", &["A", "B", "C"]);

    let filter = RestrictedFilter::new(vec![placeholder("A"), placeholder("C")], true);
    let config = demo_config().compile().unwrap();
    let coordinator = ScanCoordinator::new(config, Box::new(filter)).unwrap();
    let report = coordinator.run(&[input]).unwrap();

    assert_eq!(report.requests_discovered, 3);
    assert_eq!(report.requests_accepted, 2);
    let keys: Vec<String> = coordinator
        .accepted_requests()
        .into_iter()
        .map(|request| request.request_key)
        .collect();
    assert_eq!(keys, vec!["A", "C"]);
}

#[test]
fn union_filter_reports_expected_but_missing_keys() {
    let temp = tempdir().unwrap();
    let input = write_request_file(temp.path(), "partial.dat", &["A"]);

    let filter = UnionFilter::new(vec![placeholder("A"), placeholder("B")], true);
    let config = demo_config().compile().unwrap();
    let coordinator = ScanCoordinator::new(config, Box::new(filter)).unwrap();
    coordinator.run(&[input.clone()]).unwrap();

    let accepted = coordinator.accepted_requests();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0].request_key, "A");
    assert_eq!(accepted[0].source_file, input);
    // B was never rediscovered: the placeholder itself is synthesized.
    assert_eq!(accepted[1].request_key, "B");
    assert_eq!(accepted[1].source_file, PathBuf::from("allow-list"));
}

#[test]
fn target_cancels_early_without_an_index() {
    let temp = tempdir().unwrap();
    let inputs: Vec<PathBuf> = (0..8)
        .map(|i| write_request_file(temp.path(), &format!("f{i}.dat"), &[&format!("K{i}")]))
        .collect();

    let config = ScanConfig {
        worker_threads: 1,
        ..demo_config()
    }
    .compile()
    .unwrap();
    let coordinator = ScanCoordinator::new(config, Box::new(UnrestrictedFilter::new()))
        .unwrap()
        .with_target(1);
    let report = coordinator.run(&inputs).unwrap();

    assert!(report.cancelled);
    assert!(report.requests_accepted >= 1);
    assert!(
        report.files_scanned < inputs.len(),
        "remaining files must be skipped after the target is reached"
    );
}

#[test]
fn fatal_mode_aborts_on_unreadable_input() {
    let temp = tempdir().unwrap();
    let good = write_request_file(temp.path(), "good.dat", &["A"]);
    let missing = temp.path().join("missing.dat");

    let config = ScanConfig {
        worker_threads: 1,
        ..demo_config()
    }
    .compile()
    .unwrap();
    let coordinator =
        ScanCoordinator::new(config, Box::new(UnrestrictedFilter::new())).unwrap();
    let err = coordinator.run(&[missing, good]).unwrap_err();
    assert!(matches!(err, SpanError::ScanIo { .. }));
}

#[test]
fn tolerant_mode_retracts_only_the_failed_file() {
    let temp = tempdir().unwrap();
    let good = write_request_file(temp.path(), "good.dat", &["A", "B"]);
    let missing = temp.path().join("missing.dat");

    let config = ScanConfig {
        worker_threads: 1,
        tolerate_io_errors: true,
        ..demo_config()
    }
    .compile()
    .unwrap();
    let coordinator =
        ScanCoordinator::new(config, Box::new(UnrestrictedFilter::new())).unwrap();
    let report = coordinator.run(&[good.clone(), missing.clone()]).unwrap();

    assert_eq!(report.files_scanned, 1);
    assert_eq!(report.files_failed, vec![missing]);
    // Results merged for the healthy file are untouched.
    let keys: Vec<String> = coordinator
        .accepted_requests()
        .into_iter()
        .map(|request| request.request_key)
        .collect();
    assert_eq!(keys, vec!["A", "B"]);
}
