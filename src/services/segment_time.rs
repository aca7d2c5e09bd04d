//! Segment timestamp extraction
//!
//! The media server names segments after the wall-clock time recording
//! started, e.g. `2025-09-22-17-31-15-0.mp4`. Fields may be one or two digits.
//! Filenames carry no duration; for that the container metadata is probed
//! (see [`super::ffmpeg`]).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::ffmpeg::MetadataProbe;

/// Timestamp assigned to segments whose recording time cannot be derived.
/// Sorts before every real timestamp so such files are evicted first.
pub const SENTINEL_OLDEST: NaiveDateTime = NaiveDateTime::MIN;

static FILENAME_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})-(\d{1,2})-(\d{1,2})-(\d{1,2})")
        .expect("segment filename pattern is valid")
});

/// Parse the leading `YYYY-M-D-H-M-S` fields of a segment filename
///
/// Returns `None` when the pattern does not match or the fields do not form a
/// valid calendar date and time (e.g. month 13).
pub fn parse_filename_time(filename: &str) -> Option<NaiveDateTime> {
    let caps = FILENAME_TIME_RE.captures(filename)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = i32::try_from(field(1)?).ok()?;
    NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?.and_hms_opt(field(4)?, field(5)?, field(6)?)
}

/// Ranking key for retention: the filename time, or [`SENTINEL_OLDEST`]
pub fn sort_key(filename: &str) -> NaiveDateTime {
    parse_filename_time(filename).unwrap_or(SENTINEL_OLDEST)
}

/// Where a segment's start time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Metadata,
    Filename,
}

/// Recording start time and duration of one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentTiming {
    pub start: DateTime<FixedOffset>,
    /// Seconds, rounded to milliseconds. `None` when only the filename was usable.
    pub duration_secs: Option<f64>,
    pub source: TimeSource,
}

impl SegmentTiming {
    /// `None` without a duration, or when start plus duration is out of range
    pub fn end(&self) -> Option<DateTime<FixedOffset>> {
        let secs = self.duration_secs?;
        let delta = TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)?;
        self.start.checked_add_signed(delta)
    }
}

/// Derives segment timing from container metadata, falling back to the filename
#[derive(Clone)]
pub struct TimeExtractor {
    probe: Arc<dyn MetadataProbe>,
    offset: FixedOffset,
}

impl TimeExtractor {
    pub fn new(probe: Arc<dyn MetadataProbe>, offset: FixedOffset) -> Self {
        Self { probe, offset }
    }

    /// Extract timing for a segment file
    ///
    /// Metadata wins when present since it is the only source of a duration.
    /// Returns `None` when neither metadata nor the filename yields a time.
    pub async fn extract(&self, path: &Path) -> Option<SegmentTiming> {
        if let Some(meta) = self.probe.probe(path).await {
            return Some(SegmentTiming {
                start: meta.creation_time.with_timezone(&self.offset),
                duration_secs: Some(meta.duration_secs),
                source: TimeSource::Metadata,
            });
        }

        let filename = path.file_name().and_then(|n| n.to_str())?;
        let naive = parse_filename_time(filename)?;
        let start = naive.and_local_timezone(self.offset).single()?;
        Some(SegmentTiming {
            start,
            duration_secs: None,
            source: TimeSource::Filename,
        })
    }

    /// Duration only, for callers that just need the recording cadence
    pub async fn duration(&self, path: &Path) -> Option<f64> {
        self.probe.probe(path).await.map(|meta| meta.duration_secs)
    }
}
