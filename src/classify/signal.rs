use std::collections::BTreeMap;

use super::geometry::LineSegment;
use super::{DetectionHistory, FrameDetections, RuleMetadata, ViolationCandidate, ViolationClassifier};
use crate::config::RedPhase;
use crate::ViolationCategory;

/// Road vehicle crossing the stop line while the signal is red.
///
/// The red phases are given in video time. A crossing is the bottom centre of
/// the vehicle moving across the stop line between its matched previous
/// position and the current one.
pub struct SignalClassifier {
    confidence_threshold: f32,
    stop_line: LineSegment,
    red_phases: Vec<RedPhase>,
}

impl SignalClassifier {
    pub fn new(confidence_threshold: f32, stop_line: LineSegment, red_phases: Vec<RedPhase>) -> Self {
        Self {
            confidence_threshold,
            stop_line,
            red_phases,
        }
    }

    fn is_red(&self, t_s: f64) -> bool {
        self.red_phases.iter().any(|phase| phase.contains(t_s))
    }
}

impl ViolationClassifier for SignalClassifier {
    fn category(&self) -> ViolationCategory {
        ViolationCategory::SignalJump
    }

    fn classify(
        &mut self,
        observation: &FrameDetections<'_>,
        history: &DetectionHistory,
    ) -> Vec<ViolationCandidate> {
        let t_s = observation.timestamp.as_secs_f64();
        if !self.is_red(t_s) {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for vehicle in observation
            .detections
            .iter()
            .filter(|det| det.label.is_road_vehicle() && det.confidence > self.confidence_threshold)
        {
            let Some(previous) = history.previous_match(vehicle) else {
                continue;
            };
            let from = previous.bbox.bottom_center();
            let to = vehicle.bbox.bottom_center();
            if !self.stop_line.crossed_by(from, to) {
                continue;
            }

            let mut values = BTreeMap::new();
            values.insert("video_time_s", t_s as f32);
            values.insert("confidence", vehicle.confidence);
            candidates.push(ViolationCandidate::new(
                ViolationCategory::SignalJump,
                observation,
                RuleMetadata {
                    rule: "stop_line_crossed_on_red",
                    subject: vehicle.bbox,
                    related: Some(previous.bbox),
                    values,
                },
            ));
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, ObjectClass};
    use std::time::Duration;

    fn car(y2: f32) -> Detection {
        Detection::new(
            ObjectClass::Vehicle,
            BoundingBox::new(40.0, y2 - 40.0, 80.0, y2),
            0.9,
        )
    }

    fn classifier() -> SignalClassifier {
        SignalClassifier::new(
            0.5,
            LineSegment::new((0.0, 100.0), (200.0, 100.0)),
            vec![RedPhase {
                start_s: 1.0,
                end_s: 2.0,
            }],
        )
    }

    fn observe(t_ms: u64, detections: &[Detection]) -> FrameDetections<'_> {
        FrameDetections {
            frame_index: t_ms / 100,
            timestamp: Duration::from_millis(t_ms),
            detections,
        }
    }

    #[test]
    fn crossing_on_red_is_flagged() {
        let mut classifier = classifier();
        let mut history = DetectionHistory::default();
        history.push(14, vec![car(110.0)]);
        let current = [car(95.0)];
        let candidates = classifier.classify(&observe(1500, &current), &history);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].category, ViolationCategory::SignalJump);
    }

    #[test]
    fn crossing_on_green_is_ignored() {
        let mut classifier = classifier();
        let mut history = DetectionHistory::default();
        history.push(24, vec![car(110.0)]);
        let current = [car(95.0)];
        assert!(classifier
            .classify(&observe(2500, &current), &history)
            .is_empty());
    }

    #[test]
    fn waiting_at_the_line_is_not_a_crossing() {
        let mut classifier = classifier();
        let mut history = DetectionHistory::default();
        history.push(14, vec![car(112.0)]);
        let current = [car(108.0)];
        assert!(classifier
            .classify(&observe(1500, &current), &history)
            .is_empty());
    }

    #[test]
    fn unmatched_vehicle_cannot_cross() {
        let mut classifier = classifier();
        let current = [car(95.0)];
        assert!(classifier
            .classify(&observe(1500, &current), &DetectionHistory::default())
            .is_empty());
    }
}
