//! NanoNVR backend - recording store engine
//!
//! Tracks and prunes the segment files a media server writes under
//! `{root}/{app}/{stream}/{date}/*.mp4`: a daily retention sweep keeps the
//! newest segments per stream, and an on-demand index summarizes what is on
//! disk.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod services;

pub use app::{AppState, build_app};
pub use error::{IoFailure, IoOp, RecordError, RecordResult};
