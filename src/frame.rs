//! Decoded video frames.
//!
//! - `Frame`: one decoded picture with its position in the stream.
//!
//! Frames are produced by the ingestion layer, owned by the orchestrator for one
//! loop iteration and dropped afterwards. There is no mutable access to the pixels;
//! annotation always works on a copy.

use image::RgbImage;
use std::time::Duration;

/// One decoded video frame. Immutable once built.
pub struct Frame {
    index: u64,
    frame_rate: f64,
    image: RgbImage,
}

impl Frame {
    /// Create a frame. `index` is the 0-based position in the stream.
    pub fn new(index: u64, frame_rate: f64, image: RgbImage) -> Self {
        Self {
            index,
            frame_rate,
            image,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Offset from the start of the video, derived from index and frame rate.
    pub fn timestamp(&self) -> Duration {
        if self.frame_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.index as f64 / self.frame_rate)
    }

    /// Read-only RGB pixels.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB24 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("frame_rate", &self.frame_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_follows_index_and_frame_rate() {
        let frame = Frame::new(25, 10.0, RgbImage::new(4, 4));
        assert_eq!(frame.timestamp(), Duration::from_millis(2500));
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.pixels().len(), 4 * 4 * 3);
    }

    #[test]
    fn zero_frame_rate_yields_zero_timestamp() {
        let frame = Frame::new(3, 0.0, RgbImage::new(1, 1));
        assert_eq!(frame.timestamp(), Duration::ZERO);
    }
}
