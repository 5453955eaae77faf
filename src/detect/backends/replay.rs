use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// On-disk detection log: `{"frames": {"<index>": [Detection, ...]}}`.
#[derive(Debug, Deserialize, Default)]
struct DetectionLogFile {
    #[serde(default)]
    frames: HashMap<u64, Vec<Detection>>,
}

/// Replays detections recorded by an external detector.
///
/// Frames missing from the log yield no detections.
pub struct ReplayBackend {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection log {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid detection log {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: DetectionLogFile = serde_json::from_str(raw)?;
        Ok(Self { frames: file.frames })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.frames.get(&frame.index()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::ObjectClass;
    use image::RgbImage;

    #[test]
    fn replays_logged_frames() {
        let raw = r#"{
            "frames": {
                "2": [
                    {"label": "person", "bbox": {"x1": 1, "y1": 2, "x2": 3, "y2": 4}, "confidence": 0.7}
                ]
            }
        }"#;
        let mut backend = ReplayBackend::from_json(raw).unwrap();
        assert_eq!(backend.frame_count(), 1);

        let empty = backend
            .detect(&Frame::new(1, 10.0, RgbImage::new(4, 4)))
            .unwrap();
        assert!(empty.is_empty());

        let dets = backend
            .detect(&Frame::new(2, 10.0, RgbImage::new(4, 4)))
            .unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, ObjectClass::Person);
    }

    #[test]
    fn unknown_labels_replay_as_other() {
        let raw = r#"{
            "frames": {
                "0": [
                    {"label": "truck", "bbox": {"x1": 0, "y1": 0, "x2": 9, "y2": 9}, "confidence": 0.8},
                    {"label": "motorcycle", "bbox": {"x1": 1, "y1": 1, "x2": 5, "y2": 5}, "confidence": 0.9}
                ]
            }
        }"#;
        let mut backend = ReplayBackend::from_json(raw).unwrap();
        let dets = backend
            .detect(&Frame::new(0, 10.0, RgbImage::new(4, 4)))
            .unwrap();
        assert_eq!(dets[0].label, ObjectClass::Other);
        assert_eq!(dets[1].label, ObjectClass::Motorcycle);
    }

    #[test]
    fn rejects_malformed_log() {
        assert!(ReplayBackend::from_json("{\"frames\": [1, 2]}").is_err());
    }
}
