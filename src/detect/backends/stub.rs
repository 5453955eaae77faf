use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Scripted backend for tests and demos.
///
/// Returns pre-programmed detections keyed by frame index and nothing for other
/// frames. Can be told to fail at a given frame to exercise the fatal inference path.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    frames: HashMap<u64, Vec<Detection>>,
    fail_at: BTreeSet<u64>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detections to return for one frame. Replaces anything set before.
    pub fn with_frame(mut self, index: u64, detections: Vec<Detection>) -> Self {
        self.frames.insert(index, detections);
        self
    }

    /// Same detections for several frames.
    pub fn with_frames(mut self, indices: &[u64], detections: Vec<Detection>) -> Self {
        for &index in indices {
            self.frames.insert(index, detections.clone());
        }
        self
    }

    /// Fail inference when this frame index is reached.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at.insert(index);
        self
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_dry_run(&self) -> bool {
        self.frames.is_empty() && self.fail_at.is_empty()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        if self.fail_at.contains(&frame.index()) {
            return Err(anyhow!(
                "scripted inference failure at frame {}",
                frame.index()
            ));
        }
        Ok(self.frames.get(&frame.index()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, ObjectClass};
    use image::RgbImage;

    fn frame(index: u64) -> Frame {
        Frame::new(index, 10.0, RgbImage::new(8, 8))
    }

    #[test]
    fn scripted_backend_replays_programmed_frames() {
        let person = Detection::new(
            ObjectClass::Person,
            BoundingBox::new(1.0, 1.0, 4.0, 6.0),
            0.9,
        );
        let mut backend = ScriptedBackend::new().with_frames(&[1, 3], vec![person.clone()]);

        assert!(backend.detect(&frame(0)).unwrap().is_empty());
        assert_eq!(backend.detect(&frame(1)).unwrap(), vec![person.clone()]);
        assert!(backend.detect(&frame(2)).unwrap().is_empty());
        assert_eq!(backend.detect(&frame(3)).unwrap(), vec![person]);
        assert_eq!(backend.calls(), 4);
    }

    #[test]
    fn empty_script_is_a_dry_run() {
        assert!(ScriptedBackend::new().is_dry_run());
        assert!(!ScriptedBackend::new().with_frame(0, Vec::new()).is_dry_run());
        assert!(!ScriptedBackend::new().failing_at(3).is_dry_run());
    }

    #[test]
    fn scripted_backend_fails_where_told() {
        let mut backend = ScriptedBackend::new().failing_at(2);
        assert!(backend.detect(&frame(1)).is_ok());
        assert!(backend.detect(&frame(2)).is_err());
    }
}
