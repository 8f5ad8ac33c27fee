//! Admission filters deciding which discovered requests are kept.
//!
//! All filters share one contract: `accept` is the only mutating decision
//! point, `will_accept` must stay side-effect free, and accepted requests are
//! owned by the filter until `reset` or until the caller drains the
//! collection.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::warn;

use crate::errors::SpanError;
use crate::request::PartialRequest;
use crate::types::{RequestKey, UserKey};

/// Acceptance decision and bookkeeping contract shared by every filter.
pub trait AdmissionFilter: Send {
    /// Offer a request. Returns whether it was accepted; when `ignore` is
    /// true an accepted request is not stored (decision only).
    fn accept(&mut self, request: PartialRequest, ignore: bool) -> bool;

    /// Non-mutating acceptance probe; idempotent until `accept` is invoked.
    fn will_accept(&self, request: &PartialRequest) -> bool;

    /// False once the filter can no longer accept anything (for example an
    /// exhausted consume-once allow-list).
    fn can_accept(&self) -> bool;

    /// Accept every remaining allow-list placeholder outright.
    fn accept_all(&mut self);

    /// Snapshot of accepted requests.
    fn accepted_requests(&self) -> Vec<PartialRequest>;

    /// Number of stored accepted requests.
    fn accepted_count(&self) -> usize;

    /// Allow-list placeholders not yet satisfied.
    fn remaining_requests(&self) -> Vec<PartialRequest>;

    /// Seed the allow-list from a previously produced accepted collection.
    fn set_previous_requests(&mut self, previous: Vec<PartialRequest>);

    /// Drop all state, returning the filter to its freshly built form.
    fn reset(&mut self);

    /// Retract every accepted request discovered in `source`; used when a
    /// tolerated I/O error makes that file's ranges suspect.
    fn discard_source(&mut self, source: &Path);
}

/// Filter used when no allow-list is configured: accepts everything.
#[derive(Debug, Default)]
pub struct UnrestrictedFilter {
    accepted: Vec<PartialRequest>,
}

impl UnrestrictedFilter {
    /// New empty filter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdmissionFilter for UnrestrictedFilter {
    fn accept(&mut self, request: PartialRequest, ignore: bool) -> bool {
        if !ignore {
            self.accepted.push(request);
        }
        true
    }

    fn will_accept(&self, _request: &PartialRequest) -> bool {
        true
    }

    fn can_accept(&self) -> bool {
        true
    }

    fn accept_all(&mut self) {}

    fn accepted_requests(&self) -> Vec<PartialRequest> {
        self.accepted.clone()
    }

    fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    fn remaining_requests(&self) -> Vec<PartialRequest> {
        Vec::new()
    }

    fn set_previous_requests(&mut self, _previous: Vec<PartialRequest>) {}

    fn reset(&mut self) {
        self.accepted.clear();
    }

    fn discard_source(&mut self, source: &Path) {
        self.accepted.retain(|request| request.source_file != source);
    }
}

/// Allow-list filter: accepts only requests whose key is registered.
///
/// With consume-once enabled the matched placeholder is removed on
/// acceptance, so a repeat of the same key is rejected thereafter.
#[derive(Debug, Default)]
pub struct RestrictedFilter {
    allowed: IndexMap<UserKey, Vec<PartialRequest>>,
    accepted: Vec<PartialRequest>,
    consume_once: bool,
}

impl RestrictedFilter {
    /// Build from allow-list placeholder requests keyed by their request key.
    pub fn new(allow_list: Vec<PartialRequest>, consume_once: bool) -> Self {
        let mut filter = Self {
            allowed: IndexMap::new(),
            accepted: Vec::new(),
            consume_once,
        };
        filter.seed(allow_list);
        filter
    }

    fn seed(&mut self, allow_list: Vec<PartialRequest>) {
        for placeholder in allow_list {
            self.allowed
                .entry(placeholder.request_key.clone())
                .or_default()
                .push(placeholder);
        }
    }
}

impl AdmissionFilter for RestrictedFilter {
    fn accept(&mut self, mut request: PartialRequest, ignore: bool) -> bool {
        let Some(placeholders) = self.allowed.get_mut(&request.request_key) else {
            return false;
        };
        let placeholder = if self.consume_once {
            let placeholder = placeholders.remove(0);
            if placeholders.is_empty() {
                self.allowed.shift_remove(&request.request_key);
            }
            placeholder
        } else {
            placeholders[0].clone()
        };
        if !ignore {
            request.merge_missing_from(&placeholder);
            self.accepted.push(request);
        }
        true
    }

    fn will_accept(&self, request: &PartialRequest) -> bool {
        self.allowed
            .get(&request.request_key)
            .is_some_and(|placeholders| !placeholders.is_empty())
    }

    fn can_accept(&self) -> bool {
        !self.allowed.is_empty()
    }

    fn accept_all(&mut self) {
        for (_, placeholders) in std::mem::take(&mut self.allowed) {
            self.accepted.extend(placeholders);
        }
    }

    fn accepted_requests(&self) -> Vec<PartialRequest> {
        self.accepted.clone()
    }

    fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    fn remaining_requests(&self) -> Vec<PartialRequest> {
        self.allowed.values().flatten().cloned().collect()
    }

    fn set_previous_requests(&mut self, previous: Vec<PartialRequest>) {
        self.allowed.clear();
        self.seed(previous);
    }

    fn reset(&mut self) {
        self.allowed.clear();
        self.accepted.clear();
    }

    fn discard_source(&mut self, source: &Path) {
        self.accepted.retain(|request| request.source_file != source);
    }
}

/// Sentinel filter that never accepts but counts what it was offered.
///
/// Used where the caller only needs counts, not the requests themselves;
/// `can_accept` stays true because the filter never fills up.
#[derive(Debug, Default)]
pub struct RejectAllFilter {
    offered: usize,
}

impl RejectAllFilter {
    /// New counting filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests offered so far.
    pub fn offered_count(&self) -> usize {
        self.offered
    }
}

impl AdmissionFilter for RejectAllFilter {
    fn accept(&mut self, _request: PartialRequest, _ignore: bool) -> bool {
        self.offered += 1;
        false
    }

    fn will_accept(&self, _request: &PartialRequest) -> bool {
        false
    }

    fn can_accept(&self) -> bool {
        true
    }

    fn accept_all(&mut self) {}

    fn accepted_requests(&self) -> Vec<PartialRequest> {
        Vec::new()
    }

    fn accepted_count(&self) -> usize {
        0
    }

    fn remaining_requests(&self) -> Vec<PartialRequest> {
        Vec::new()
    }

    fn set_previous_requests(&mut self, _previous: Vec<PartialRequest>) {}

    fn reset(&mut self) {
        self.offered = 0;
    }

    fn discard_source(&mut self, _source: &Path) {}
}

/// Union filter: keeps every discovered request and reports expected-but-
/// missing allow-list entries alongside them.
#[derive(Debug, Default)]
pub struct UnionFilter {
    allowed: IndexMap<UserKey, Vec<PartialRequest>>,
    accepted: Vec<PartialRequest>,
    found_keys: HashSet<UserKey>,
    consume_once: bool,
}

impl UnionFilter {
    /// Build from allow-list placeholders; discovered requests are accepted
    /// whether or not they are allow-listed.
    pub fn new(allow_list: Vec<PartialRequest>, consume_once: bool) -> Self {
        let mut filter = Self {
            consume_once,
            ..Self::default()
        };
        filter.seed(allow_list);
        filter
    }

    fn seed(&mut self, allow_list: Vec<PartialRequest>) {
        for placeholder in allow_list {
            self.allowed
                .entry(placeholder.request_key.clone())
                .or_default()
                .push(placeholder);
        }
    }
}

impl AdmissionFilter for UnionFilter {
    fn accept(&mut self, mut request: PartialRequest, ignore: bool) -> bool {
        if self.consume_once && self.found_keys.contains(&request.request_key) {
            return false;
        }
        self.found_keys.insert(request.request_key.clone());
        if !ignore {
            if let Some(placeholders) = self.allowed.get(&request.request_key) {
                if let Some(placeholder) = placeholders.first() {
                    request.merge_missing_from(placeholder);
                }
            }
            self.accepted.push(request);
        }
        true
    }

    fn will_accept(&self, request: &PartialRequest) -> bool {
        !(self.consume_once && self.found_keys.contains(&request.request_key))
    }

    fn can_accept(&self) -> bool {
        true
    }

    fn accept_all(&mut self) {
        for (key, placeholders) in std::mem::take(&mut self.allowed) {
            if !self.found_keys.contains(&key) {
                self.found_keys.insert(key);
                self.accepted.extend(placeholders);
            }
        }
    }

    /// Discovered requests plus a synthesized entry for every allow-listed
    /// key never rediscovered.
    fn accepted_requests(&self) -> Vec<PartialRequest> {
        let mut union = self.accepted.clone();
        for (key, placeholders) in &self.allowed {
            if !self.found_keys.contains(key) {
                if let Some(placeholder) = placeholders.first() {
                    union.push(placeholder.clone());
                }
            }
        }
        union
    }

    fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    fn remaining_requests(&self) -> Vec<PartialRequest> {
        self.allowed
            .iter()
            .filter(|(key, _)| !self.found_keys.contains(*key))
            .flat_map(|(_, placeholders)| placeholders.iter().cloned())
            .collect()
    }

    fn set_previous_requests(&mut self, previous: Vec<PartialRequest>) {
        self.allowed.clear();
        self.found_keys.clear();
        self.seed(previous);
    }

    fn reset(&mut self) {
        self.allowed.clear();
        self.accepted.clear();
        self.found_keys.clear();
    }

    fn discard_source(&mut self, source: &Path) {
        let mut discarded_keys = Vec::new();
        self.accepted.retain(|request| {
            if request.source_file == source {
                discarded_keys.push(request.request_key.clone());
                false
            } else {
                true
            }
        });
        // Keys only seen in the failed file count as never rediscovered again.
        for key in discarded_keys {
            if !self.accepted.iter().any(|request| request.request_key == key) {
                self.found_keys.remove(&key);
            }
        }
    }
}

/// Options for comparing two independently produced accepted sets.
#[derive(Debug, Default)]
pub struct ComparisonOptions {
    /// Report expected requests absent from the actual set.
    pub check_missing: bool,
    /// Report actual requests absent from the expected set.
    pub check_unexpected: bool,
    /// Side-channel file receiving one external key per unmatched element.
    pub not_found_file: Option<PathBuf>,
}

/// Result of a cross-filter comparison.
#[derive(Debug, Default)]
pub struct ComparisonOutcome {
    /// Keys expected but not found in the actual set.
    pub missing: Vec<RequestKey>,
    /// Keys found but not expected.
    pub unexpected: Vec<RequestKey>,
}

/// Compare two accepted sets by testing each side against a disposable
/// non-mutating filter seeded with the other side.
///
/// Every unmatched element is logged as a warning; when a `not_found_file`
/// is configured the keys are also appended there, one per line.
pub fn compare_accepted(
    expected: &[PartialRequest],
    actual: &[PartialRequest],
    options: &ComparisonOptions,
) -> Result<ComparisonOutcome, SpanError> {
    let mut outcome = ComparisonOutcome::default();
    if options.check_missing {
        outcome.missing = difference(expected, actual);
        for key in &outcome.missing {
            warn!(key = %key, "expected request was not rediscovered");
        }
    }
    if options.check_unexpected {
        outcome.unexpected = difference(actual, expected);
        for key in &outcome.unexpected {
            warn!(key = %key, "discovered request was not expected");
        }
    }
    if let Some(path) = &options.not_found_file {
        let unmatched: Vec<&RequestKey> =
            outcome.missing.iter().chain(&outcome.unexpected).collect();
        if !unmatched.is_empty() {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            for key in unmatched {
                writeln!(file, "{key}")?;
            }
        }
    }
    Ok(outcome)
}

/// Keys of `probe` elements not matched by a filter seeded with `seed`.
fn difference(probe: &[PartialRequest], seed: &[PartialRequest]) -> Vec<RequestKey> {
    let filter = RestrictedFilter::new(seed.to_vec(), false);
    probe
        .iter()
        .filter(|request| !filter.will_accept(request))
        .map(|request| request.request_key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> PartialRequest {
        PartialRequest::new("test.txt", 0, 1).with_key(key)
    }

    #[test]
    fn restricted_consume_once_rejects_repeats() {
        let mut filter = RestrictedFilter::new(vec![request("K")], true);
        assert!(filter.accept(request("K"), false));
        assert!(!filter.accept(request("K"), false));
        assert!(!filter.can_accept());
        assert_eq!(filter.accepted_count(), 1);
    }

    #[test]
    fn restricted_without_consume_once_keeps_entry() {
        let mut filter = RestrictedFilter::new(vec![request("K")], false);
        assert!(filter.accept(request("K"), false));
        assert!(filter.accept(request("K"), false));
        assert!(filter.can_accept());
        assert_eq!(filter.accepted_count(), 2);
    }

    #[test]
    fn will_accept_never_mutates() {
        let filter = RestrictedFilter::new(vec![request("K")], true);
        for _ in 0..3 {
            assert!(filter.will_accept(&request("K")));
            assert!(!filter.will_accept(&request("X")));
        }
        assert_eq!(filter.remaining_requests().len(), 1);
    }

    #[test]
    fn restricted_rolls_placeholder_attributes_forward() {
        let placeholder = request("K").with_attribute("carried", "value");
        let mut filter = RestrictedFilter::new(vec![placeholder], true);
        assert!(filter.accept(request("K").with_attribute("own", "mine"), false));
        let accepted = filter.accepted_requests();
        assert_eq!(accepted[0].attributes["carried"], "value".into());
        assert_eq!(accepted[0].attributes["own"], "mine".into());
    }

    #[test]
    fn ignore_decides_without_storing() {
        let mut filter = RestrictedFilter::new(vec![request("K")], true);
        assert!(filter.accept(request("K"), true));
        assert_eq!(filter.accepted_count(), 0);
        // Consume-once still consumed the entry.
        assert!(!filter.accept(request("K"), false));
    }

    #[test]
    fn restricted_accept_all_drains_remaining_placeholders() {
        let mut filter = RestrictedFilter::new(vec![request("A"), request("B")], true);
        assert!(filter.accept(request("A"), false));
        filter.accept_all();
        assert!(filter.remaining_requests().is_empty());
        assert!(!filter.can_accept());
        let mut keys: Vec<String> = filter
            .accepted_requests()
            .into_iter()
            .map(|request| request.request_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn restricted_set_previous_requests_replaces_allow_list() {
        let mut filter = RestrictedFilter::new(vec![request("OLD")], true);
        filter.set_previous_requests(vec![request("NEW")]);
        assert!(!filter.will_accept(&request("OLD")));
        assert!(filter.accept(request("NEW"), false));
        assert_eq!(filter.accepted_count(), 1);
    }

    #[test]
    fn reject_all_only_counts() {
        let mut filter = RejectAllFilter::new();
        assert!(!filter.accept(request("K"), false));
        assert!(!filter.accept(request("J"), false));
        assert!(filter.can_accept());
        assert_eq!(filter.offered_count(), 2);
        assert!(filter.accepted_requests().is_empty());
        assert!(filter.remaining_requests().is_empty());
    }

    #[test]
    fn union_returns_found_plus_missing() {
        let a = request("A").with_attribute("from", "allow-list");
        let b = request("B");
        let mut filter = UnionFilter::new(vec![a, b], true);
        assert!(filter.accept(request("A"), false));
        let accepted = filter.accepted_requests();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].request_key, "A");
        assert_eq!(accepted[0].attributes["from"], "allow-list".into());
        assert_eq!(accepted[1].request_key, "B");
    }

    #[test]
    fn union_consume_once_dedupes_within_round() {
        let mut filter = UnionFilter::new(Vec::new(), true);
        assert!(filter.accept(request("A"), false));
        assert!(!filter.accept(request("A"), false));
        // Unknown keys are still welcome.
        assert!(filter.accept(request("Z"), false));
    }

    #[test]
    fn union_accept_all_synthesizes_only_unfound_keys() {
        let a = request("A");
        let b = request("B").with_attribute("from", "allow-list");
        let mut filter = UnionFilter::new(vec![a, b], true);
        assert!(filter.accept(request("A"), false));
        filter.accept_all();
        assert!(filter.remaining_requests().is_empty());
        let accepted = filter.accepted_requests();
        // A stays the discovered request; only B's placeholder is promoted.
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].request_key, "A");
        assert!(accepted[0].attributes.is_empty());
        assert_eq!(accepted[1].request_key, "B");
        assert_eq!(accepted[1].attributes["from"], "allow-list".into());
    }

    #[test]
    fn union_set_previous_requests_clears_found_keys() {
        let mut filter = UnionFilter::new(Vec::new(), true);
        assert!(filter.accept(request("A"), false));
        assert!(!filter.accept(request("A"), false));
        filter.set_previous_requests(vec![request("A")]);
        // A is expected and not yet rediscovered in the new round.
        assert_eq!(filter.remaining_requests().len(), 1);
        assert!(filter.accept(request("A"), false));
        assert!(filter.remaining_requests().is_empty());
    }

    #[test]
    fn union_discard_source_resurrects_missing_placeholder() {
        let mut filter = UnionFilter::new(vec![request("A")], true);
        let mut found = request("A");
        found.source_file = "bad.txt".into();
        assert!(filter.accept(found, false));
        assert_eq!(filter.accepted_requests().len(), 1);
        filter.discard_source(Path::new("bad.txt"));
        // The placeholder for A is reported missing again.
        let accepted = filter.accepted_requests();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].source_file, PathBuf::from("test.txt"));
    }

    #[test]
    fn comparison_reports_both_directions() {
        let expected = vec![request("A"), request("B")];
        let actual = vec![request("B"), request("C")];
        let options = ComparisonOptions {
            check_missing: true,
            check_unexpected: true,
            not_found_file: None,
        };
        let outcome = compare_accepted(&expected, &actual, &options).unwrap();
        assert_eq!(outcome.missing, vec!["A".to_string()]);
        assert_eq!(outcome.unexpected, vec!["C".to_string()]);
    }
}
