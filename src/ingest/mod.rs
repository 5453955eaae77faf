//! Frame ingestion.
//!
//! Input is always a finite recorded video on local disk (or a `stub://`
//! synthetic video). Frames come out 0-indexed, in order, with no gaps.

pub mod file;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{open_failure, FileSource, OpenFailure, SourceOpenError, SyntheticVideo};
