//! Segment retention
//!
//! Keeps the newest `K` segments of every stream and deletes the rest, then
//! removes directories the deletions left empty. Each stream is handled
//! independently: collect, decide, delete, prune, in that order.
//!
//! Segments are ranked by their filename timestamp; ties go to the
//! lexically later filename. Unparsable names rank as the oldest possible
//! time, so they are the first to go.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IoFailure, IoOp, RecordError, RecordResult};
use super::record_tree::{self, Segment, StreamRef};

/// Maximum number of segments kept per stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep: usize,
    /// Segments modified more recently than this are never deleted
    grace: Duration,
}

impl RetentionPolicy {
    pub fn new(keep: usize) -> RecordResult<Self> {
        if keep == 0 {
            return Err(RecordError::InvalidPolicy(
                "segment count to keep must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            keep,
            grace: Duration::ZERO,
        })
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    fn is_recent(&self, segment: &Segment, now: SystemTime) -> bool {
        if self.grace.is_zero() {
            return false;
        }
        segment
            .modified
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age < self.grace)
    }
}

/// What happened to one stream during a sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamOutcome {
    pub app: String,
    pub stream: String,
    pub segments: usize,
    pub deleted: usize,
    pub skipped_recent: usize,
    pub removed_dirs: usize,
    pub stream_removed: bool,
    /// The stream directory was gone or unreadable when its turn came
    pub skipped: bool,
    pub failures: Vec<IoFailure>,
}

/// Aggregate result of a sweep over the whole root
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub streams: usize,
    pub skipped_streams: usize,
    pub deleted: usize,
    pub skipped_recent: usize,
    pub removed_dirs: usize,
    pub removed_streams: usize,
    pub removed_apps: usize,
    pub failures: Vec<IoFailure>,
}

impl SweepSummary {
    pub fn absorb(&mut self, outcome: StreamOutcome) {
        if outcome.skipped {
            self.skipped_streams += 1;
        } else {
            self.streams += 1;
        }
        self.deleted += outcome.deleted;
        self.skipped_recent += outcome.skipped_recent;
        self.removed_dirs += outcome.removed_dirs;
        if outcome.stream_removed {
            self.removed_streams += 1;
        }
        self.failures.extend(outcome.failures);
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }
}

/// Order segments newest first and return the ones beyond `keep`
pub fn select_for_deletion(mut segments: Vec<Segment>, keep: usize) -> Vec<Segment> {
    if segments.len() <= keep {
        return Vec::new();
    }
    segments.sort_by(|a, b| {
        b.recorded_at
            .cmp(&a.recorded_at)
            .then_with(|| b.file_name.cmp(&a.file_name))
            .then_with(|| b.path.cmp(&a.path))
    });
    segments.split_off(keep)
}

/// Enforce the policy on a single stream
pub fn enforce_stream(stream: &StreamRef, policy: &RetentionPolicy, now: SystemTime) -> StreamOutcome {
    let mut outcome = StreamOutcome {
        app: stream.app.clone(),
        stream: stream.stream.clone(),
        ..Default::default()
    };

    let mut walk = match record_tree::list_segments(&stream.dir) {
        Ok(walk) => walk,
        Err(RecordError::NotFound(_)) => {
            debug!(app = %stream.app, stream = %stream.stream, "Stream directory vanished before sweep");
            outcome.skipped = true;
            return outcome;
        }
        Err(e) => {
            warn!(app = %stream.app, stream = %stream.stream, error = %e, "Cannot read stream directory");
            outcome.failures.push(IoFailure::new(&stream.dir, IoOp::ReadDir, e));
            outcome.skipped = true;
            return outcome;
        }
    };
    let segments: Vec<Segment> = walk.by_ref().collect();
    outcome.failures.extend(walk.into_failures());
    outcome.segments = segments.len();

    let doomed = select_for_deletion(segments, policy.keep());
    delete_and_prune(stream, doomed, policy, now, &mut outcome);
    outcome
}

/// Delete the selected segments, then prune what the deletions emptied
///
/// A failed deletion is recorded in `outcome` and the rest still proceed.
fn delete_and_prune(
    stream: &StreamRef,
    doomed: Vec<Segment>,
    policy: &RetentionPolicy,
    now: SystemTime,
    outcome: &mut StreamOutcome,
) {
    let mut emptied_parents = BTreeSet::new();
    for segment in doomed {
        if policy.is_recent(&segment, now) {
            debug!(path = %segment.path.display(), "Skipping recently modified segment");
            outcome.skipped_recent += 1;
            continue;
        }

        match fs::remove_file(&segment.path) {
            Ok(()) => {
                info!(
                    app = %stream.app,
                    stream = %stream.stream,
                    file = %segment.file_name,
                    "Deleted old segment"
                );
                outcome.deleted += 1;
                if let Some(parent) = segment.path.parent() {
                    emptied_parents.insert(parent.to_path_buf());
                }
            }
            Err(e) => {
                warn!(path = %segment.path.display(), error = %e, "Failed to delete segment");
                outcome.failures.push(IoFailure::new(&segment.path, IoOp::Delete, e));
            }
        }
    }

    if outcome.deleted == 0 {
        return;
    }

    // Deepest first so nested buckets collapse before their parents
    for dir in emptied_parents.iter().rev() {
        outcome.removed_dirs += remove_empty_ancestors(dir, &stream.dir);
    }

    if record_tree::contains_no_files(&stream.dir) {
        outcome.removed_dirs += remove_empty_tree(&stream.dir);
        outcome.stream_removed = !stream.dir.exists();
        if outcome.stream_removed {
            info!(app = %stream.app, stream = %stream.stream, "Removed empty stream directory");
        }
    }
}

/// Remove an application directory once it holds no stream directories
///
/// Races (already removed, or repopulated by a writer) are not errors.
pub fn prune_app_dir(app_dir: &Path) -> bool {
    let has_streams = match fs::read_dir(app_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false)),
        Err(_) => return false,
    };
    if has_streams {
        return false;
    }

    match fs::remove_dir(app_dir) {
        Ok(()) => {
            info!(path = %app_dir.display(), "Removed empty application directory");
            true
        }
        Err(e) => {
            debug!(path = %app_dir.display(), error = %e, "Application directory not removed");
            false
        }
    }
}

/// Application directories that lost a stream during the sweep
pub fn apps_to_prune<'a>(root: &Path, outcomes: impl IntoIterator<Item = &'a StreamOutcome>) -> Vec<PathBuf> {
    outcomes
        .into_iter()
        .filter(|o| o.stream_removed)
        .map(|o| root.join(&o.app))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Run a full sweep over every stream under `root`, one stream at a time
pub fn enforce(root: &Path, policy: &RetentionPolicy) -> RecordResult<SweepSummary> {
    let listing = record_tree::list_streams(root)?;
    let now = SystemTime::now();

    let outcomes: Vec<StreamOutcome> = listing
        .streams
        .iter()
        .map(|stream| enforce_stream(stream, policy, now))
        .collect();

    Ok(finish_sweep(root, listing.failures, outcomes))
}

/// Fold per-stream outcomes into a summary and prune emptied applications
pub fn finish_sweep(root: &Path, listing_failures: Vec<IoFailure>, outcomes: Vec<StreamOutcome>) -> SweepSummary {
    let mut summary = SweepSummary {
        failures: listing_failures,
        ..Default::default()
    };

    for app_dir in apps_to_prune(root, &outcomes) {
        if prune_app_dir(&app_dir) {
            summary.removed_apps += 1;
        }
    }
    for outcome in outcomes {
        summary.absorb(outcome);
    }
    summary
}

/// Remove `dir` and each parent up to (not including) `stop` while empty
fn remove_empty_ancestors(dir: &Path, stop: &Path) -> usize {
    let mut removed = 0;
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        match fs::remove_dir(dir) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(_) => break,
        }
        current = dir.parent();
    }
    removed
}

/// Remove every empty directory in a tree, bottom-up, including the top
fn remove_empty_tree(top: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(top)
        .follow_links(false)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        match fs::remove_dir(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => debug!(path = %entry.path().display(), error = %e, "Directory not removed"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::segment_time;
    use pretty_assertions::assert_eq;

    fn segment(name: &str) -> Segment {
        Segment {
            path: PathBuf::from("/rec/live/cam1").join(name),
            file_name: name.to_string(),
            size: 1,
            modified: None,
            recorded_at: segment_time::sort_key(name),
        }
    }

    fn names(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.file_name.as_str()).collect()
    }

    #[test]
    fn test_policy_rejects_zero() {
        assert!(RetentionPolicy::new(0).is_err());
        assert_eq!(RetentionPolicy::new(3).unwrap().keep(), 3);
    }

    #[test]
    fn test_select_nothing_when_within_limit() {
        let segments = vec![segment("2025-01-01-00-00-00-0.mp4"), segment("junk.mp4")];
        assert!(select_for_deletion(segments, 2).is_empty());
    }

    #[test]
    fn test_select_oldest() {
        let segments = vec![
            segment("2025-01-02-00-00-00-0.mp4"),
            segment("2025-01-01-00-00-00-0.mp4"),
            segment("2025-01-03-00-00-00-0.mp4"),
            segment("2025-1-1-0-0-1-0.mp4"),
        ];
        let doomed = select_for_deletion(segments, 2);
        assert_eq!(
            names(&doomed),
            vec!["2025-1-1-0-0-1-0.mp4", "2025-01-01-00-00-00-0.mp4"]
        );
    }

    #[test]
    fn test_select_unparsable_first() {
        let segments = vec![
            segment("2020-01-01-00-00-00-0.mp4"),
            segment("2025-13-01-00-00-00-0.mp4"),
            segment("2025-01-01-00-00-00-0.mp4"),
            segment("notes.mp4"),
        ];
        let doomed = select_for_deletion(segments, 2);
        // Both unparsable names go before the parsable 2020 segment
        assert_eq!(
            names(&doomed),
            vec!["notes.mp4", "2025-13-01-00-00-00-0.mp4"]
        );
    }

    #[test]
    fn test_select_ties_by_filename() {
        let segments = vec![
            segment("2025-01-01-00-00-00-a.mp4"),
            segment("2025-01-01-00-00-00-c.mp4"),
            segment("2025-01-01-00-00-00-b.mp4"),
        ];
        let doomed = select_for_deletion(segments, 1);
        assert_eq!(
            names(&doomed),
            vec!["2025-01-01-00-00-00-b.mp4", "2025-01-01-00-00-00-a.mp4"]
        );
    }

    #[test]
    fn test_grace_period() {
        let policy = RetentionPolicy::new(1).unwrap().with_grace(Duration::from_secs(600));
        let now = SystemTime::now();

        let mut fresh = segment("a.mp4");
        fresh.modified = Some(now - Duration::from_secs(60));
        assert!(policy.is_recent(&fresh, now));

        let mut stale = segment("b.mp4");
        stale.modified = Some(now - Duration::from_secs(3600));
        assert!(!policy.is_recent(&stale, now));

        let no_grace = RetentionPolicy::new(1).unwrap();
        assert!(!no_grace.is_recent(&fresh, now));
    }

    #[test]
    fn test_vanished_stream_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let stream = StreamRef {
            app: "live".to_string(),
            stream: "gone".to_string(),
            dir: tmp.path().join("live/gone"),
        };
        let outcome = enforce_stream(&stream, &RetentionPolicy::new(1).unwrap(), SystemTime::now());
        assert!(outcome.skipped);
        assert!(outcome.failures.is_empty());

        let mut summary = SweepSummary::default();
        summary.absorb(outcome);
        assert_eq!(summary.streams, 0);
        assert_eq!(summary.skipped_streams, 1);
    }

    #[test]
    fn test_failed_delete_does_not_stop_others() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("live/cam1");
        fs::create_dir_all(dir.join("2025-01-01")).unwrap();
        for hour in 0..4 {
            fs::write(dir.join(format!("2025-01-01/2025-01-01-{hour:02}-00-00-0.mp4")), b"x").unwrap();
        }
        let stream = StreamRef {
            app: "live".to_string(),
            stream: "cam1".to_string(),
            dir: dir.clone(),
        };
        let policy = RetentionPolicy::new(1).unwrap();

        let segments: Vec<Segment> = record_tree::list_segments(&dir).unwrap().collect();
        let doomed = select_for_deletion(segments, policy.keep());
        assert_eq!(doomed.len(), 3);
        // Another deleter wins the race for the middle segment
        fs::remove_file(&doomed[1].path).unwrap();

        let mut outcome = StreamOutcome::default();
        delete_and_prune(&stream, doomed, &policy, SystemTime::now(), &mut outcome);

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].op, IoOp::Delete);
        assert!(dir.join("2025-01-01/2025-01-01-03-00-00-0.mp4").exists());
        assert!(!outcome.stream_removed);
    }

    #[test]
    fn test_summary_absorb() {
        let mut summary = SweepSummary::default();
        summary.absorb(StreamOutcome {
            deleted: 3,
            removed_dirs: 1,
            stream_removed: true,
            failures: vec![IoFailure::new(Path::new("/x"), IoOp::Delete, "denied")],
            ..Default::default()
        });
        summary.absorb(StreamOutcome {
            deleted: 2,
            ..Default::default()
        });
        assert_eq!(summary.streams, 2);
        assert_eq!(summary.deleted, 5);
        assert_eq!(summary.removed_streams, 1);
        assert_eq!(summary.error_count(), 1);
    }
}
