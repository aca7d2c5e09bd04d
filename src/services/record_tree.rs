//! Recording tree walker
//!
//! Layout on disk is `{root}/{app}/{stream}/{date buckets...}/{segment}.mp4`.
//! Only the first two levels are structural. Below a stream, segments are
//! found recursively regardless of how (or whether) they are bucketed.
//!
//! Nothing here is cached: every call re-reads the filesystem, since the
//! media server and the retention sweep both mutate the tree concurrently.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::NaiveDateTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{IoFailure, IoOp, RecordError, RecordResult};
use super::segment_time;

/// Segment file extension (compared case-insensitively)
pub const SEGMENT_EXTENSION: &str = "mp4";

/// A stream directory identified by `(app, stream)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRef {
    pub app: String,
    pub stream: String,
    pub dir: PathBuf,
}

/// A recorded media file
#[derive(Debug, Clone)]
pub struct Segment {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Filename-derived start time, or the sentinel for unparsable names
    pub recorded_at: NaiveDateTime,
}

impl Segment {
    /// Path relative to the recording root, `/`-separated
    pub fn relative_to(&self, root: &Path) -> Option<String> {
        self.path.strip_prefix(root).ok().map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
    }
}

/// Streams found under the root plus the entries that could not be read
#[derive(Debug, Default)]
pub struct StreamListing {
    pub streams: Vec<StreamRef>,
    pub failures: Vec<IoFailure>,
}

/// Check if a path has the segment extension
pub fn is_segment(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SEGMENT_EXTENSION))
}

/// Verify the root exists and is a directory
pub fn ensure_root(root: &Path) -> RecordResult<()> {
    match fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(RecordError::NotADirectory(root.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(RecordError::RootMissing(root.to_path_buf()))
        }
        Err(e) => Err(RecordError::io(root, e)),
    }
}

/// Verify a directory below the root exists and is a directory
pub fn ensure_dir(dir: &Path) -> RecordResult<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(RecordError::NotADirectory(dir.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(RecordError::NotFound(dir.to_path_buf()))
        }
        Err(e) => Err(RecordError::io(dir, e)),
    }
}

/// List every `app/stream` directory under the root
///
/// Non-directory entries at either level are skipped. An application
/// directory that vanishes or cannot be read is skipped; only an unusable
/// root is an error.
pub fn list_streams(root: &Path) -> RecordResult<StreamListing> {
    ensure_root(root)?;

    let mut listing = StreamListing::default();
    for app_dir in subdirectories(root).map_err(|e| RecordError::io(root, e))? {
        let Some(app) = dir_name(&app_dir) else {
            continue;
        };

        let stream_dirs = match subdirectories(&app_dir) {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %app_dir.display(), "Application directory vanished during listing");
                continue;
            }
            Err(e) => {
                warn!(path = %app_dir.display(), error = %e, "Cannot read application directory");
                listing.failures.push(IoFailure::new(&app_dir, IoOp::ReadDir, e));
                continue;
            }
        };

        for stream_dir in stream_dirs {
            if let Some(stream) = dir_name(&stream_dir) {
                listing.streams.push(StreamRef {
                    app: app.clone(),
                    stream,
                    dir: stream_dir,
                });
            }
        }
    }

    Ok(listing)
}

/// Walk every segment below a stream directory
///
/// The stream directory itself must exist; anything that disappears after
/// the walk starts is skipped.
pub fn list_segments(stream_dir: &Path) -> RecordResult<SegmentWalk> {
    walk_segments(WalkDir::new(stream_dir), stream_dir)
}

/// Segments directly inside one date directory, without descending further
pub fn list_day_segments(date_dir: &Path) -> RecordResult<SegmentWalk> {
    walk_segments(WalkDir::new(date_dir).max_depth(1), date_dir)
}

fn walk_segments(walker: WalkDir, dir: &Path) -> RecordResult<SegmentWalk> {
    ensure_dir(dir)?;
    Ok(SegmentWalk {
        inner: walker.follow_links(false).sort_by_file_name().into_iter(),
        failures: Vec::new(),
    })
}

/// Lazy iterator over the segments of one stream
///
/// Entries that could not be read (other than vanished ones) are collected
/// and available from [`SegmentWalk::failures`] once iteration is done.
pub struct SegmentWalk {
    inner: walkdir::IntoIter,
    failures: Vec<IoFailure>,
}

impl SegmentWalk {
    pub fn failures(&self) -> &[IoFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<IoFailure> {
        self.failures
    }
}

impl Iterator for SegmentWalk {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    match e.io_error().map(io::Error::kind) {
                        Some(io::ErrorKind::NotFound) => {
                            debug!(path = %path.display(), "Entry vanished during walk");
                        }
                        _ => {
                            warn!(path = %path.display(), error = %e, "Cannot read entry during walk");
                            self.failures.push(IoFailure::new(&path, IoOp::ReadDir, e));
                        }
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() || !is_segment(entry.path()) {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    if e.io_error().map(io::Error::kind) != Some(io::ErrorKind::NotFound) {
                        self.failures.push(IoFailure::new(entry.path(), IoOp::Stat, e));
                    }
                    continue;
                }
            };

            let file_name = entry.file_name().to_string_lossy().to_string();
            let recorded_at = segment_time::sort_key(&file_name);
            return Some(Segment {
                path: entry.into_path(),
                file_name,
                size: meta.len(),
                modified: meta.modified().ok(),
                recorded_at,
            });
        }
    }
}

/// Whether a directory holds no files at any depth
///
/// A directory that vanished counts as empty.
pub fn contains_no_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .all(|e| e.file_type().is_dir())
}

fn subdirectories(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn test_is_segment() {
        assert!(is_segment(Path::new("a/b/2025-01-01-00-00-00-0.mp4")));
        assert!(is_segment(Path::new("SEG.MP4")));
        assert!(!is_segment(Path::new("seg.mp4.tmp")));
        assert!(!is_segment(Path::new("seg.mkv")));
        assert!(!is_segment(Path::new("mp4")));
    }

    #[test]
    fn test_list_streams_skips_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("live/cam1")).unwrap();
        fs::create_dir_all(root.join("live/cam2")).unwrap();
        fs::create_dir_all(root.join("rtp/door")).unwrap();
        touch(&root.join("stray.txt"), 1);
        touch(&root.join("live/notes.mp4"), 1);

        let listing = list_streams(root).unwrap();
        let names: Vec<(String, String)> = listing
            .streams
            .iter()
            .map(|s| (s.app.clone(), s.stream.clone()))
            .collect();

        assert_eq!(
            names,
            vec![
                ("live".to_string(), "cam1".to_string()),
                ("live".to_string(), "cam2".to_string()),
                ("rtp".to_string(), "door".to_string()),
            ]
        );
        assert!(listing.failures.is_empty());
    }

    #[test]
    fn test_list_streams_missing_root() {
        let tmp = TempDir::new().unwrap();
        let err = list_streams(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, RecordError::RootMissing(_)));

        let file = tmp.path().join("file");
        touch(&file, 1);
        let err = list_streams(&file).unwrap_err();
        assert!(matches!(err, RecordError::NotADirectory(_)));
    }

    #[test]
    fn test_list_segments_recursive() {
        let tmp = TempDir::new().unwrap();
        let stream = tmp.path().join("live/cam1");
        touch(&stream.join("2025-01-01/2025-01-01-00-00-00-0.mp4"), 10);
        touch(&stream.join("2025-01-02/deep/nested/2025-01-02-00-00-00-0.MP4"), 20);
        touch(&stream.join("loose.mp4"), 5);
        touch(&stream.join("2025-01-01/thumb.jpg"), 5);

        let walk = list_segments(&stream).unwrap();
        let mut segments: Vec<Segment> = walk.collect();
        segments.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        assert_eq!(segments.len(), 3);
        assert_eq!(segments.iter().map(|s| s.size).sum::<u64>(), 35);
        let loose = segments.iter().find(|s| s.file_name == "loose.mp4").unwrap();
        assert_eq!(loose.recorded_at, segment_time::SENTINEL_OLDEST);
        assert_eq!(loose.relative_to(tmp.path()).as_deref(), Some("live/cam1/loose.mp4"));
    }

    #[test]
    fn test_list_day_segments_one_level() {
        let tmp = TempDir::new().unwrap();
        let day = tmp.path().join("live/cam1/2025-01-01");
        touch(&day.join("2025-01-01-00-00-00-0.mp4"), 1);
        touch(&day.join("sub/2025-01-01-01-00-00-0.mp4"), 1);

        let names: Vec<String> = list_day_segments(&day).unwrap().map(|s| s.file_name).collect();
        assert_eq!(names, vec!["2025-01-01-00-00-00-0.mp4"]);
        assert!(matches!(
            list_day_segments(&tmp.path().join("live/cam1/2025-01-02")),
            Err(RecordError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_segments_missing_stream() {
        let tmp = TempDir::new().unwrap();
        let err = list_segments(&tmp.path().join("live/gone")).err().unwrap();
        assert!(matches!(err, RecordError::NotFound(_)));
    }

    #[test]
    fn test_contains_no_files() {
        let tmp = TempDir::new().unwrap();
        let stream = tmp.path().join("live/cam1");
        fs::create_dir_all(stream.join("2025-01-01/empty")).unwrap();
        assert!(contains_no_files(&stream));

        touch(&stream.join("2025-01-01/x.txt"), 1);
        assert!(!contains_no_files(&stream));
        assert!(contains_no_files(&tmp.path().join("missing")));
    }
}
