//! FFprobe-based container metadata
//!
//! Uses ffprobe (command-line) to read the container-level `creation_time`
//! tag and duration of a recorded segment. These are authoritative for
//! segment timing; the filename only carries a start time.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest duration accepted from container metadata; anything above is corrupt
pub const MAX_SEGMENT_SECS: f64 = 366.0 * 86_400.0;

/// Start time and duration read from container metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerTiming {
    pub creation_time: DateTime<Utc>,
    /// Seconds, rounded to milliseconds
    pub duration_secs: f64,
}

/// Source of container-level timing for a segment file
///
/// Returning `None` means "unparsable", never an error: a segment without
/// metadata is still a segment.
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Option<ContainerTiming>;
}

/// FFprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub tags: Option<HashMap<String, String>>,
    }
}

/// Metadata probe backed by the ffprobe executable
pub struct FfmpegService {
    /// Path to ffprobe executable
    ffprobe_path: String,
    timeout: Duration,
    /// Offset applied to `creation_time` values that carry no zone
    naive_offset: FixedOffset,
}

impl FfmpegService {
    pub fn new(ffprobe_path: impl Into<String>, timeout: Duration, naive_offset: FixedOffset) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout,
            naive_offset,
        }
    }

    /// Check if ffprobe is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run ffprobe and parse the format section
    pub async fn read_timing(&self, path: &Path) -> Result<Option<ContainerTiming>> {
        debug!(path = %path.display(), "Probing segment with ffprobe");

        let run = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet"])
            .arg("-show_format")
            .args(["-print_format", "json"])
            .arg(path)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .with_context(|| format!("ffprobe timed out for '{}'", path.display()))?
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            anyhow::bail!("ffprobe failed for '{}' (exit code {})", path.display(), exit_code);
        }

        let probe: ffprobe::FfprobeOutput = serde_json::from_slice(&output.stdout)
            .context("Failed to parse ffprobe JSON output")?;

        Ok(convert_format(probe, self.naive_offset))
    }
}

#[async_trait]
impl MetadataProbe for FfmpegService {
    async fn probe(&self, path: &Path) -> Option<ContainerTiming> {
        match self.read_timing(path).await {
            Ok(timing) => {
                if timing.is_none() {
                    debug!(path = %path.display(), "Segment has no usable creation_time/duration");
                }
                timing
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Segment probe failed");
                None
            }
        }
    }
}

fn convert_format(probe: ffprobe::FfprobeOutput, naive_offset: FixedOffset) -> Option<ContainerTiming> {
    let format = probe.format?;
    let creation_time = format
        .tags
        .as_ref()
        .and_then(|tags| tags.get("creation_time"))
        .and_then(|raw| parse_creation_time(raw, naive_offset))?;

    let duration_secs = format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && (0.0..=MAX_SEGMENT_SECS).contains(d))?;

    Some(ContainerTiming {
        creation_time,
        duration_secs: (duration_secs * 1000.0).round() / 1000.0,
    })
}

/// Parse a `creation_time` tag
///
/// Accepts RFC 3339 (`2025-09-22T09:31:15.000000Z`) and zone-less ISO values,
/// which are taken to be in `naive_offset`.
pub fn parse_creation_time(raw: &str, naive_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(naive_offset).single())
        .map(|dt| dt.with_timezone(&Utc))
}
