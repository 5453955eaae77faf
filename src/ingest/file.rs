//! Finite local video source.
//!
//! `FileSource` opens one recorded video and hands out frames in order until
//! end of stream. Two backends:
//! - `stub://name?frames=N&fps=F&width=W&height=H`: synthetic video, always available
//! - any other local path: decoded with FFmpeg (feature `video-ffmpeg`)
//!
//! Remote URLs are refused; input must be a file on disk.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::path::Path;
use url::Url;

#[cfg(feature = "video-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::Frame;
use crate::{ErrorKind, PipelineError, PipelineStage};

const STUB_SCHEME: &str = "stub://";
const DEFAULT_STUB_FRAMES: u64 = 10;
const DEFAULT_STUB_FPS: f64 = 10.0;
const DEFAULT_STUB_WIDTH: u32 = 64;
const DEFAULT_STUB_HEIGHT: u32 = 48;

/// Why a video could not be opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenFailure {
    NotFound,
    Unreadable,
}

/// Root cause attached under the `Input` [`PipelineError`] when opening fails.
#[derive(Clone, Debug)]
pub struct SourceOpenError {
    pub failure: OpenFailure,
    pub path: String,
    pub detail: String,
}

impl std::fmt::Display for SourceOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.failure {
            OpenFailure::NotFound => write!(f, "video not found: {}", self.path),
            OpenFailure::Unreadable => write!(f, "video unreadable: {} ({})", self.path, self.detail),
        }
    }
}

impl std::error::Error for SourceOpenError {}

/// Open failure recorded in an error chain, if any.
pub fn open_failure(err: &anyhow::Error) -> Option<OpenFailure> {
    err.downcast_ref::<SourceOpenError>()
        .or_else(|| err.chain().find_map(|c| c.downcast_ref::<SourceOpenError>()))
        .map(|e| e.failure)
}

fn open_error(failure: OpenFailure, path: &str, detail: impl Into<String>) -> anyhow::Error {
    let root = SourceOpenError {
        failure,
        path: path.to_string(),
        detail: detail.into(),
    };
    let message = root.to_string();
    anyhow::Error::new(root).context(PipelineError::new(
        ErrorKind::Input,
        PipelineStage::Opening,
        message,
    ))
}

pub struct FileSource {
    path: String,
    backend: FileBackend,
    frames_read: u64,
}

enum FileBackend {
    Synthetic(SyntheticVideo),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(open_error(OpenFailure::NotFound, path, "empty path"));
        }
        let backend = if trimmed.starts_with(STUB_SCHEME) {
            let video = SyntheticVideo::parse(trimmed)
                .map_err(|e| open_error(OpenFailure::Unreadable, trimmed, format!("{:#}", e)))?;
            FileBackend::Synthetic(video)
        } else if trimmed.contains("://") {
            return Err(open_error(
                OpenFailure::Unreadable,
                trimmed,
                "remote sources are not supported, use a local file",
            ));
        } else {
            let local = Path::new(trimmed);
            if !local.exists() {
                return Err(open_error(OpenFailure::NotFound, trimmed, "no such file"));
            }
            if !local.is_file() {
                return Err(open_error(OpenFailure::Unreadable, trimmed, "not a regular file"));
            }
            open_decoder(trimmed)?
        };

        let source = Self {
            path: trimmed.to_string(),
            backend,
            frames_read: 0,
        };
        log::info!(
            "opened {} ({}x{} @ {:.2} fps)",
            source.path,
            source.width(),
            source.height(),
            source.frame_rate()
        );
        Ok(source)
    }

    /// Next frame in order, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let image = match &mut self.backend {
            FileBackend::Synthetic(video) => video.next_image(),
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_image()?,
        };
        let Some(image) = image else {
            return Ok(None);
        };
        let frame = Frame::new(self.frames_read, self.frame_rate(), image);
        self.frames_read += 1;
        Ok(Some(frame))
    }

    pub fn frame_rate(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(video) => video.fps,
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_rate(),
        }
    }

    pub fn width(&self) -> u32 {
        match &self.backend {
            FileBackend::Synthetic(video) => video.width,
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.backend {
            FileBackend::Synthetic(video) => video.height,
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.height(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Release the decoder. Dropping the source has the same effect.
    pub fn close(self) {
        log::debug!("closed {} after {} frames", self.path, self.frames_read);
    }
}

#[cfg(feature = "video-ffmpeg")]
fn open_decoder(path: &str) -> Result<FileBackend> {
    FfmpegFileSource::open(path)
        .map(FileBackend::Ffmpeg)
        .map_err(|e| open_error(OpenFailure::Unreadable, path, format!("{:#}", e)))
}

#[cfg(not(feature = "video-ffmpeg"))]
fn open_decoder(path: &str) -> Result<FileBackend> {
    Err(open_error(
        OpenFailure::Unreadable,
        path,
        "decoding video files requires the video-ffmpeg feature",
    ))
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

/// Finite synthetic video described entirely by its URI.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticVideo {
    pub name: String,
    pub frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    next_index: u64,
}

impl SyntheticVideo {
    /// URI for a synthetic video with the given shape.
    pub fn uri(name: &str, frames: u64, fps: f64, width: u32, height: u32) -> String {
        format!(
            "{}{}?frames={}&fps={}&width={}&height={}",
            STUB_SCHEME, name, frames, fps, width, height
        )
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let parsed = Url::parse(uri).map_err(|e| anyhow!("invalid stub uri: {}", e))?;
        if parsed.scheme() != "stub" {
            return Err(anyhow!("not a stub uri: {}", uri));
        }
        let mut video = Self {
            name: parsed
                .host_str()
                .filter(|host| !host.is_empty())
                .unwrap_or("synthetic")
                .to_string(),
            frames: DEFAULT_STUB_FRAMES,
            fps: DEFAULT_STUB_FPS,
            width: DEFAULT_STUB_WIDTH,
            height: DEFAULT_STUB_HEIGHT,
            next_index: 0,
        };
        for (key, value) in parsed.query_pairs() {
            let bad = || anyhow!("invalid stub parameter {}={}", key, value);
            match key.as_ref() {
                "frames" => video.frames = value.parse().map_err(|_| bad())?,
                "fps" => video.fps = value.parse().map_err(|_| bad())?,
                "width" => video.width = value.parse().map_err(|_| bad())?,
                "height" => video.height = value.parse().map_err(|_| bad())?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if !(video.fps.is_finite() && video.fps > 0.0) {
            return Err(anyhow!("stub fps must be positive"));
        }
        if video.width == 0 || video.height == 0 {
            return Err(anyhow!("stub resolution must be non-zero"));
        }
        Ok(video)
    }

    fn next_image(&mut self) -> Option<RgbImage> {
        if self.next_index >= self.frames {
            return None;
        }
        let shift = (self.next_index * 7 % 256) as u32;
        self.next_index += 1;
        Some(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind;

    #[test]
    fn stub_yields_exactly_the_declared_frames() {
        let mut source = FileSource::open(&SyntheticVideo::uri("demo", 4, 25.0, 32, 24)).unwrap();
        assert_eq!((source.width(), source.height()), (32, 24));
        assert_eq!(source.frame_rate(), 25.0);

        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!((frame.width(), frame.height()), (32, 24));
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn stub_defaults_apply() {
        let video = SyntheticVideo::parse("stub://clip").unwrap();
        assert_eq!(video.name, "clip");
        assert_eq!((video.frames, video.width, video.height), (10, 64, 48));
        assert_eq!(video.fps, 10.0);
    }

    #[test]
    fn bad_stub_parameter_is_unreadable() {
        let err = FileSource::open("stub://clip?frames=many").err().unwrap();
        assert_eq!(error_kind(&err), Some(ErrorKind::Input));
        assert_eq!(open_failure(&err), Some(OpenFailure::Unreadable));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.mp4");
        let err = FileSource::open(missing.to_str().unwrap()).err().unwrap();
        assert_eq!(error_kind(&err), Some(ErrorKind::Input));
        assert_eq!(open_failure(&err), Some(OpenFailure::NotFound));
    }

    #[test]
    fn remote_urls_are_refused() {
        let err = FileSource::open("rtsp://camera.local/stream").err().unwrap();
        assert_eq!(open_failure(&err), Some(OpenFailure::Unreadable));
    }

    #[test]
    fn garbage_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk.mp4");
        std::fs::write(&junk, b"definitely not a video").unwrap();
        let err = FileSource::open(junk.to_str().unwrap()).err().unwrap();
        assert_eq!(error_kind(&err), Some(ErrorKind::Input));
        assert_eq!(open_failure(&err), Some(OpenFailure::Unreadable));
    }
}
