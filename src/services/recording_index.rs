//! Recording index
//!
//! Builds per-stream summaries and per-day segment listings on demand by
//! walking the recording tree. Nothing is cached; every query reflects the
//! tree as it is right now.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use futures::StreamExt;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{RecordError, RecordResult};
use super::record_tree::{self, Segment, StreamRef};
use super::retention;
use super::segment_time::{TimeExtractor, TimeSource};

const SECONDS_PER_DAY: f64 = 86_400.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// How many segments are probed concurrently for a detailed listing
const PROBE_CONCURRENCY: usize = 8;

/// Estimated days of footage a stream's retention covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordDays {
    Days(f64),
    Unknown,
}

impl Serialize for RecordDays {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RecordDays::Days(days) => serializer.serialize_f64(*days),
            RecordDays::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// Aggregated view of one stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub app: String,
    pub stream: String,
    pub segment_count: usize,
    pub total_bytes: u64,
    /// Total size in GiB, rounded to two decimals
    pub total_storage_gb: f64,
    pub record_days: RecordDays,
    /// Sorted `YYYY-MM-DD` labels of date directories holding segments
    pub dates: Vec<String>,
}

/// One segment in a detailed listing
#[derive(Debug, Clone, Serialize)]
pub struct SegmentDetail {
    /// Path relative to the recording root
    pub filename: String,
    pub size: u64,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub duration: Option<f64>,
    pub time_source: Option<TimeSource>,
}

/// Result of listing one date directory
///
/// A missing directory is reported through `exists`, not as an error.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentListing {
    pub dir: PathBuf,
    pub exists: bool,
    pub segments: Vec<SegmentDetail>,
}

/// Normalize a `Y-M-D` date directory name to `YYYY-MM-DD`
///
/// Only three integer fields within 2000..=2100, 1..=12 and 1..=31 qualify.
pub fn date_label(dir_name: &str) -> Option<String> {
    let parts: Vec<&str> = dir_name.split('-').collect();
    let [year, month, day] = parts.as_slice() else {
        return None;
    };
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;

    if (2000..=2100).contains(&year) && (1..=12).contains(&month) && (1..=31).contains(&day) {
        Some(format!("{year:04}-{month:02}-{day:02}"))
    } else {
        None
    }
}

/// Snap a segment duration to the retention slot size (`86400 / keep`)
///
/// Returns 0 when the duration rounds down to no slots at all.
pub fn snap_duration(duration_secs: f64, keep: usize) -> f64 {
    let slot = SECONDS_PER_DAY / keep as f64;
    (duration_secs / slot).round() * slot
}

/// Days of footage `keep` segments of the given snapped length cover
pub fn record_days(snapped_secs: f64, keep: usize) -> f64 {
    keep as f64 * snapped_secs / SECONDS_PER_DAY
}

/// Segment length the media server should use so `keep` segments span `days`
pub fn segment_seconds_for(days: u32, keep: usize) -> f64 {
    f64::from(days) * SECONDS_PER_DAY / keep as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reject path components that could escape the recording root
pub fn validate_component(value: &str) -> RecordResult<&str> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(RecordError::InvalidComponent(value.to_string()));
    }
    Ok(value)
}

/// Query side of the recording store
#[derive(Clone)]
pub struct RecordingIndex {
    root: PathBuf,
    keep: usize,
    extractor: TimeExtractor,
}

impl RecordingIndex {
    pub fn new(root: impl Into<PathBuf>, keep: usize, extractor: TimeExtractor) -> Self {
        Self {
            root: root.into(),
            keep: keep.max(1),
            extractor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Summarize every stream that has at least one segment
    ///
    /// A stream that vanishes or cannot be read is left out of the result.
    pub async fn summarize(&self) -> RecordResult<Vec<StreamSummary>> {
        let listing = record_tree::list_streams(&self.root)?;
        for failure in &listing.failures {
            warn!(%failure, "Skipping unreadable application directory");
        }

        let mut summaries = Vec::new();
        for stream in &listing.streams {
            if let Some(summary) = self.summarize_stream(stream).await {
                summaries.push(summary);
            }
        }

        debug!(streams = summaries.len(), "Recording summary built");
        Ok(summaries)
    }

    async fn summarize_stream(&self, stream: &StreamRef) -> Option<StreamSummary> {
        let mut walk = match record_tree::list_segments(&stream.dir) {
            Ok(walk) => walk,
            Err(e) => {
                warn!(app = %stream.app, stream = %stream.stream, error = %e, "Skipping stream");
                return None;
            }
        };
        let segments: Vec<Segment> = walk.by_ref().collect();
        for failure in walk.failures() {
            warn!(app = %stream.app, stream = %stream.stream, %failure, "Partial read during summary");
        }

        if segments.is_empty() {
            return None;
        }

        let total_bytes: u64 = segments.iter().map(|s| s.size).sum();
        let dates: BTreeSet<String> = segments
            .iter()
            .filter_map(|s| s.path.parent())
            .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()))
            .filter_map(date_label)
            .collect();

        // Walk order is sorted by file name, so "first" is deterministic
        let mut snapped = 0.0;
        for segment in &segments {
            if let Some(duration) = self.extractor.duration(&segment.path).await {
                snapped = snap_duration(duration, self.keep);
                if snapped > 0.0 {
                    break;
                }
            }
        }

        Some(StreamSummary {
            app: stream.app.clone(),
            stream: stream.stream.clone(),
            segment_count: segments.len(),
            total_bytes,
            total_storage_gb: round2(total_bytes as f64 / BYTES_PER_GB),
            record_days: if snapped > 0.0 {
                RecordDays::Days(record_days(snapped, self.keep))
            } else {
                RecordDays::Unknown
            },
            dates: dates.into_iter().collect(),
        })
    }

    /// List the segments of one date directory, oldest first
    pub async fn list_detailed(&self, app: &str, stream: &str, date: &str) -> RecordResult<SegmentListing> {
        let dir = self
            .root
            .join(validate_component(app)?)
            .join(validate_component(stream)?)
            .join(validate_component(date)?);
        record_tree::ensure_root(&self.root)?;

        let walk = match record_tree::list_day_segments(&dir) {
            Ok(walk) => walk,
            Err(RecordError::NotFound(_)) => {
                debug!(path = %dir.display(), "Date directory not found");
                return Ok(SegmentListing {
                    dir,
                    exists: false,
                    segments: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };
        let segments: Vec<Segment> = walk.collect();

        let mut details: Vec<SegmentDetail> = futures::stream::iter(segments)
            .map(|segment| self.describe(segment))
            .buffered(PROBE_CONCURRENCY)
            .collect()
            .await;

        details.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.filename.cmp(&b.filename)));

        Ok(SegmentListing {
            dir,
            exists: true,
            segments: details,
        })
    }

    async fn describe(&self, segment: Segment) -> SegmentDetail {
        let timing = self.extractor.extract(&segment.path).await;
        let filename = segment
            .relative_to(&self.root)
            .unwrap_or_else(|| segment.path.to_string_lossy().to_string());

        SegmentDetail {
            filename,
            size: segment.size,
            start: timing.as_ref().map(|t| t.start),
            end: timing.as_ref().and_then(|t| t.end()),
            duration: timing.as_ref().and_then(|t| t.duration_secs),
            time_source: timing.as_ref().map(|t| t.source),
        }
    }

    /// Whether a stream directory already exists
    pub fn stream_exists(&self, app: &str, stream: &str) -> RecordResult<bool> {
        let dir = self
            .root
            .join(validate_component(app)?)
            .join(validate_component(stream)?);
        Ok(dir.exists())
    }

    /// Delete every recording of a stream
    pub async fn purge_stream(&self, app: &str, stream: &str) -> RecordResult<()> {
        let app_dir = self.root.join(validate_component(app)?);
        let dir = app_dir.join(validate_component(stream)?);
        record_tree::ensure_root(&self.root)?;
        record_tree::ensure_dir(&dir)?;

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| RecordError::io(&dir, e))?;
        info!(app, stream, "Purged stream recordings");

        retention::prune_app_dir(&app_dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_label() {
        assert_eq!(date_label("2025-01-05").as_deref(), Some("2025-01-05"));
        assert_eq!(date_label("2025-1-5").as_deref(), Some("2025-01-05"));
        assert_eq!(date_label("1999-01-05"), None);
        assert_eq!(date_label("2025-13-05"), None);
        assert_eq!(date_label("2025-01-32"), None);
        assert_eq!(date_label("2025-01"), None);
        assert_eq!(date_label("2025-01-05-x"), None);
        assert_eq!(date_label("misc"), None);
    }

    #[test]
    fn test_snap_duration() {
        // 72 slots per day -> 1200 second slots
        assert_eq!(snap_duration(1199.5, 72), 1200.0);
        assert_eq!(snap_duration(1790.0, 72), 1200.0);
        assert_eq!(snap_duration(1810.0, 72), 2400.0);
        assert_eq!(snap_duration(500.0, 72), 0.0);
    }

    #[test]
    fn test_record_days() {
        assert_eq!(record_days(1200.0, 72), 1.0);
        assert_eq!(record_days(3600.0, 72), 3.0);
        assert_eq!(segment_seconds_for(3, 72), 3600.0);
    }

    #[test]
    fn test_record_days_serialization() {
        assert_eq!(serde_json::to_string(&RecordDays::Days(1.5)).unwrap(), "1.5");
        assert_eq!(
            serde_json::to_string(&RecordDays::Unknown).unwrap(),
            "\"unknown\""
        );
    }

    #[test]
    fn test_validate_component() {
        assert!(validate_component("live").is_ok());
        assert!(validate_component("2025-01-05").is_ok());
        assert!(validate_component("").is_err());
        assert!(validate_component("..").is_err());
        assert!(validate_component("a/b").is_err());
        assert!(validate_component("a\\b").is_err());
    }
}
