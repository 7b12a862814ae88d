//! Property-based tests for eviction invariants.
//!
//! Runs entirely in memory: a recording remover stands in for the
//! filesystem, so arbitrary entry sets are cheap to generate.

use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use proptest::prelude::*;

use super::eviction::{ArtifactRemover, Evictor, sort_oldest_first};
use super::{BYTES_PER_MB, ManagedEntry, RetentionLimits};

#[derive(Default)]
struct RecordingRemover {
    removed: RefCell<Vec<PathBuf>>,
    failing: HashSet<PathBuf>,
}

impl ArtifactRemover for RecordingRemover {
    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.failing.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        }
        self.removed.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

// ──────────────────── strategies ────────────────────

fn arb_entries() -> impl Strategy<Value = Vec<ManagedEntry>> {
    // Narrow mtime range so identical timestamps are common.
    prop::collection::vec((0u64..3 * BYTES_PER_MB, 0u64..20), 0..40).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (size_bytes, secs))| ManagedEntry {
                path: PathBuf::from(format!("/dumps/e{i:03}.dmp")),
                size_bytes,
                modified_at: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            })
            .collect()
    })
}

fn arb_limits() -> impl Strategy<Value = RetentionLimits> {
    (0u64..12, 0usize..15).prop_map(|(mb, count)| RetentionLimits::from_megabytes(mb, count))
}

fn total_size(entries: &[ManagedEntry]) -> u64 {
    entries.iter().map(|e| e.size_bytes).sum()
}

// ──────────────────── property tests ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Both caps hold afterwards unless only the floor entry is left.
    #[test]
    fn eviction_respects_caps_and_floor(entries in arb_entries(), limits in arb_limits()) {
        let n = entries.len();
        let remover = RecordingRemover::default();
        let outcome = Evictor::new(limits).with_remover(&remover).evict(entries);

        let count_bound = 1usize.max(n.min(limits.max_count));
        prop_assert!(outcome.remaining_count <= count_bound);
        prop_assert!(
            outcome.remaining_size_bytes <= limits.max_size_bytes || outcome.remaining_count == 1
        );
        if n > 0 {
            prop_assert!(outcome.remaining_count >= 1);
        }
        prop_assert_eq!(outcome.remaining_count, outcome.survivors.len());
        prop_assert_eq!(outcome.remaining_size_bytes, total_size(&outcome.survivors));
    }

    /// A second run over the survivors removes nothing.
    #[test]
    fn eviction_is_idempotent(entries in arb_entries(), limits in arb_limits()) {
        let first = Evictor::new(limits)
            .with_remover(&RecordingRemover::default())
            .evict(entries);
        let remover = RecordingRemover::default();
        let second = Evictor::new(limits)
            .with_remover(&remover)
            .evict(first.survivors.clone());

        prop_assert!(second.evicted.is_empty());
        prop_assert!(remover.removed.borrow().is_empty());
        prop_assert_eq!(second.survivors, first.survivors);
    }

    /// The removed set is always a prefix of the oldest-first order.
    #[test]
    fn evicted_set_is_oldest_prefix(entries in arb_entries(), limits in arb_limits()) {
        let mut sorted = entries.clone();
        sort_oldest_first(&mut sorted);

        let remover = RecordingRemover::default();
        let outcome = Evictor::new(limits).with_remover(&remover).evict(entries);

        let k = outcome.evicted.len();
        prop_assert_eq!(&outcome.evicted[..], &sorted[..k]);
        prop_assert_eq!(&outcome.survivors[..], &sorted[k..]);
        let removed = remover.removed.borrow();
        let expected: Vec<PathBuf> = sorted[..k].iter().map(|e| e.path.clone()).collect();
        prop_assert_eq!(&*removed, &expected);
    }

    /// Failed deletions stay counted and the run still terminates with the
    /// totals matching the survivors.
    #[test]
    fn failed_deletions_stay_counted(
        entries in arb_entries(),
        limits in arb_limits(),
        fail_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let failing: HashSet<PathBuf> = entries
            .iter()
            .zip(&fail_mask)
            .filter(|(_, fail)| **fail)
            .map(|(e, _)| e.path.clone())
            .collect();
        let n = entries.len();
        let remover = RecordingRemover { failing, ..RecordingRemover::default() };
        let outcome = Evictor::new(limits).with_remover(&remover).evict(entries);

        prop_assert_eq!(outcome.evicted.len() + outcome.survivors.len(), n);
        prop_assert_eq!(outcome.remaining_count, outcome.survivors.len());
        prop_assert_eq!(outcome.remaining_size_bytes, total_size(&outcome.survivors));
        prop_assert!(outcome.failures.iter().all(|f| f.error_code == "DK-2002"));
        if n > 0 {
            prop_assert!(outcome.remaining_count >= 1);
        }
    }

    /// Dry run selects exactly what a real run would delete.
    #[test]
    fn dry_run_matches_real_selection(entries in arb_entries(), limits in arb_limits()) {
        let planned = Evictor::new(limits)
            .with_remover(&RecordingRemover::default())
            .dry_run(true)
            .evict(entries.clone());
        let real = Evictor::new(limits)
            .with_remover(&RecordingRemover::default())
            .evict(entries);
        prop_assert_eq!(planned.evicted, real.evicted);
        prop_assert_eq!(planned.remaining_count, real.remaining_count);
    }
}
