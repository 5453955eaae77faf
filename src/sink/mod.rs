//! Annotated output video.
//!
//! One output frame per input frame, at the source's resolution and frame rate.

mod jpeg_sequence;
#[cfg(feature = "video-ffmpeg")]
mod video_ffmpeg;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::config::VideoEncoder;
#[cfg(feature = "video-ffmpeg")]
use video_ffmpeg::FfmpegVideoWriter;

pub use jpeg_sequence::{read_manifest, JpegSequenceWriter, SequenceManifest};

pub struct AnnotatedVideoWriter {
    backend: WriterBackend,
    output_path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
}

enum WriterBackend {
    JpegSequence(JpegSequenceWriter),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegVideoWriter),
}

impl AnnotatedVideoWriter {
    /// Open a writer for `path`.
    ///
    /// The JPEG-sequence encoder writes into a directory named after the path
    /// stem (`output/helmet_output.mp4` becomes `output/helmet_output/`).
    pub fn open(
        path: &Path,
        encoder: VideoEncoder,
        codec: &str,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("output video needs a non-zero resolution"));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(anyhow!("output video needs a positive frame rate"));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let (backend, output_path) = match encoder {
            VideoEncoder::JpegSequence => {
                let dir = path.with_extension("");
                let writer = JpegSequenceWriter::create(&dir, fps, width, height)?;
                (WriterBackend::JpegSequence(writer), dir)
            }
            VideoEncoder::Ffmpeg => (open_ffmpeg(path, codec, fps, width, height)?, path.to_path_buf()),
        };
        log::debug!(
            "writing {:?} output to {} ({}x{} @ {:.2} fps)",
            encoder,
            output_path.display(),
            width,
            height,
            fps
        );
        Ok(Self {
            backend,
            output_path,
            width,
            height,
            frames_written: 0,
        })
    }

    pub fn write(&mut self, image: &RgbImage) -> Result<()> {
        if image.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame is {}x{}, output video is {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            ));
        }
        match &mut self.backend {
            WriterBackend::JpegSequence(writer) => writer.write(image)?,
            #[cfg(feature = "video-ffmpeg")]
            WriterBackend::Ffmpeg(writer) => writer.write(image)?,
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Flush and close the output. Returns the number of frames written.
    pub fn close(self) -> Result<u64> {
        match self.backend {
            WriterBackend::JpegSequence(writer) => writer.finish()?,
            #[cfg(feature = "video-ffmpeg")]
            WriterBackend::Ffmpeg(writer) => writer.finish()?,
        }
        Ok(self.frames_written)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// The file (or frame directory) the video is written to.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

#[cfg(feature = "video-ffmpeg")]
fn open_ffmpeg(path: &Path, codec: &str, fps: f64, width: u32, height: u32) -> Result<WriterBackend> {
    Ok(WriterBackend::Ffmpeg(FfmpegVideoWriter::open(
        path, codec, fps, width, height,
    )?))
}

#[cfg(not(feature = "video-ffmpeg"))]
fn open_ffmpeg(_path: &Path, _codec: &str, _fps: f64, _w: u32, _h: u32) -> Result<WriterBackend> {
    Err(anyhow!(
        "the ffmpeg encoder requires the video-ffmpeg feature; use encoder = \"jpeg-sequence\""
    ))
}
