//! Recording store services

pub mod ffmpeg;
pub mod record_tree;
pub mod recording_index;
pub mod retention;
pub mod segment_time;

pub use ffmpeg::{ContainerTiming, FfmpegService, MetadataProbe};
pub use record_tree::{Segment, SegmentWalk, StreamListing, StreamRef, list_segments, list_streams};
pub use recording_index::{
    RecordDays, RecordingIndex, SegmentDetail, SegmentListing, StreamSummary, segment_seconds_for,
};
pub use retention::{RetentionPolicy, StreamOutcome, SweepSummary, enforce, enforce_stream};
pub use segment_time::{SegmentTiming, TimeExtractor, TimeSource, parse_filename_time};
