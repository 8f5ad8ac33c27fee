use std::fs;
use std::path::PathBuf;

use tempfile::tempdir;

use recspan::{
    compare_accepted, ComparisonOptions, FieldDefinition, IndexConfig, MatchToken,
    PartialReplayReader, PartialRequest, ScanConfig, ScanCoordinator, UnrestrictedFilter,
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

#[test]
fn index_lines_are_replayable_in_a_later_phase() {
    let temp = tempdir().unwrap();
    let input = write_request_file(temp.path(), "orders.dat", &["K1", "K2"]);
    let original = fs::read(&input).unwrap();
    let index_dir = temp.path().join("idx");

    let config = ScanConfig {
        index: Some(IndexConfig::new(&index_dir)),
        ..demo_config()
    }
    .compile()
    .unwrap();
    let coordinator =
        ScanCoordinator::new(config, Box::new(UnrestrictedFilter::new())).unwrap();
    let report = coordinator.run(&[input]).unwrap();
    assert_eq!(report.requests_accepted, 2);

    // A different "process": rebuild requests purely from the index file.
    let contents = fs::read_to_string(index_dir.join("orders.idx")).unwrap();
    let mut rebuilt = Vec::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "recspan");
        rebuilt.push(
            PartialRequest::new(
                fields[1],
                fields[3].parse().unwrap(),
                fields[4].parse().unwrap(),
            )
            .with_key(fields[5]),
        );
    }
    assert_eq!(rebuilt.len(), 2);

    let reader = PartialReplayReader::new(2);
    let mut replayed = Vec::new();
    reader.replay_all(&rebuilt, &mut replayed).unwrap();
    assert_eq!(replayed, original);
}

#[test]
fn target_is_ignored_while_an_index_is_written() {
    let temp = tempdir().unwrap();
    let inputs: Vec<PathBuf> = (0..4)
        .map(|i| write_request_file(temp.path(), &format!("f{i}.dat"), &[&format!("K{i}")]))
        .collect();
    let index_dir = temp.path().join("idx");

    let config = ScanConfig {
        worker_threads: 1,
        index: Some(IndexConfig::new(&index_dir)),
        ..demo_config()
    }
    .compile()
    .unwrap();
    let coordinator = ScanCoordinator::new(config, Box::new(UnrestrictedFilter::new()))
        .unwrap()
        .with_target(1);
    let report = coordinator.run(&inputs).unwrap();

    // The index must reflect every file, so nothing is cancelled.
    assert!(!report.cancelled);
    assert_eq!(report.files_scanned, 4);
    assert_eq!(report.requests_accepted, 4);
    for i in 0..4 {
        assert!(index_dir.join(format!("f{i}.idx")).exists());
    }
}

#[test]
fn comparison_appends_unmatched_keys_to_side_channel_file() {
    let temp = tempdir().unwrap();
    let not_found = temp.path().join("not_found.txt");

    let expected = vec![
        PartialRequest::new("run1", 0, 1).with_key("A"),
        PartialRequest::new("run1", 1, 1).with_key("B"),
    ];
    let actual = vec![PartialRequest::new("run2", 0, 1).with_key("B")];

    let options = ComparisonOptions {
        check_missing: true,
        check_unexpected: false,
        not_found_file: Some(not_found.clone()),
    };
    let outcome = compare_accepted(&expected, &actual, &options).unwrap();
    assert_eq!(outcome.missing, vec!["A".to_string()]);
    assert!(outcome.unexpected.is_empty());

    let contents = fs::read_to_string(&not_found).unwrap();
    assert_eq!(contents.lines().collect::<Vec<_>>(), vec!["A"]);

    // A second comparison appends rather than truncates.
    compare_accepted(&expected, &actual, &options).unwrap();
    let contents = fs::read_to_string(&not_found).unwrap();
    assert_eq!(contents.lines().count(), 2);
}
