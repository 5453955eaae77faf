use std::collections::VecDeque;

use crate::detect::Detection;

/// Default number of past frames kept for temporal rules.
pub const DEFAULT_HISTORY_FRAMES: usize = 5;

/// Minimum IoU for a past detection to count as the same physical object.
const MATCH_MIN_IOU: f32 = 0.3;

struct HistoryEntry {
    frame_index: u64,
    detections: Vec<Detection>,
}

/// Bounded ring of the detections seen in the most recent frames.
///
/// Temporal rules (zone entry, stop-line crossing) compare a current detection
/// with its match in this history. The orchestrator pushes each frame's
/// detections after classification, so during `classify` the history only
/// holds strictly earlier frames.
pub struct DetectionHistory {
    frames: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a frame's detections, evicting the oldest frame at capacity.
    pub fn push(&mut self, frame_index: u64, detections: Vec<Detection>) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(HistoryEntry {
            frame_index,
            detections,
        });
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Index of the most recent recorded frame.
    pub fn latest_frame(&self) -> Option<u64> {
        self.frames.back().map(|entry| entry.frame_index)
    }

    /// Most recent past detection of the same class overlapping `current`.
    ///
    /// Frames are searched newest first so a detector that drops an object for
    /// a frame or two still finds its last known position.
    pub fn previous_match(&self, current: &Detection) -> Option<&Detection> {
        for entry in self.frames.iter().rev() {
            let best = entry
                .detections
                .iter()
                .filter(|past| past.label == current.label)
                .map(|past| (past, past.bbox.iou(&current.bbox)))
                .filter(|(_, iou)| *iou >= MATCH_MIN_IOU)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((past, _)) = best {
                return Some(past);
            }
        }
        None
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, ObjectClass};

    fn car(x: f32) -> Detection {
        Detection::new(
            ObjectClass::Vehicle,
            BoundingBox::new(x, 0.0, x + 10.0, 10.0),
            0.9,
        )
    }

    #[test]
    fn history_is_bounded() {
        let mut history = DetectionHistory::new(2);
        for i in 0..5 {
            history.push(i, vec![car(i as f32)]);
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest_frame(), Some(4));
    }

    #[test]
    fn matches_same_class_by_overlap() {
        let mut history = DetectionHistory::default();
        history.push(0, vec![car(0.0), car(100.0)]);

        let matched = history.previous_match(&car(2.0)).unwrap();
        assert_eq!(matched.bbox.x1, 0.0);
        assert!(history.previous_match(&car(50.0)).is_none());

        let person = Detection::new(
            ObjectClass::Person,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            0.9,
        );
        assert!(history.previous_match(&person).is_none());
    }

    #[test]
    fn match_survives_a_dropped_frame() {
        let mut history = DetectionHistory::default();
        history.push(0, vec![car(0.0)]);
        history.push(1, vec![]);
        assert!(history.previous_match(&car(1.0)).is_some());
    }
}
