use std::collections::BTreeMap;

use super::{
    confident_persons, motorcycles, rides_on, DetectionHistory, FrameDetections, RuleMetadata,
    ViolationCandidate, ViolationClassifier,
};
use crate::detect::{BoundingBox, Detection, ObjectClass};
use crate::ViolationCategory;

/// Rider on a motorcycle with no helmet detected on the head.
pub struct HelmetClassifier {
    confidence_threshold: f32,
    tolerance: f32,
}

impl HelmetClassifier {
    pub fn new(confidence_threshold: f32, tolerance: f32) -> Self {
        Self {
            confidence_threshold,
            tolerance,
        }
    }

    fn wears_helmet(&self, person: &BoundingBox, helmets: &[&Detection]) -> bool {
        // Head region: upper third of the person box.
        let head = BoundingBox::new(
            person.x1,
            person.y1,
            person.x2,
            person.y1 + person.height() / 3.0,
        );
        helmets
            .iter()
            .any(|helmet| head.contains_point(helmet.bbox.center()))
    }
}

impl ViolationClassifier for HelmetClassifier {
    fn category(&self) -> ViolationCategory {
        ViolationCategory::Helmet
    }

    fn classify(
        &mut self,
        observation: &FrameDetections<'_>,
        _history: &DetectionHistory,
    ) -> Vec<ViolationCandidate> {
        let persons = confident_persons(observation.detections, self.confidence_threshold);
        let helmets: Vec<&Detection> = observation
            .detections
            .iter()
            .filter(|det| {
                det.label == ObjectClass::Helmet && det.confidence > self.confidence_threshold
            })
            .collect();
        let mut claimed = vec![false; persons.len()];
        let mut candidates = Vec::new();

        for moto in motorcycles(observation.detections) {
            for (i, person) in persons.iter().enumerate() {
                if claimed[i] || !rides_on(&person.bbox, &moto.bbox, self.tolerance) {
                    continue;
                }
                if self.wears_helmet(&person.bbox, &helmets) {
                    continue;
                }
                claimed[i] = true;
                let mut values = BTreeMap::new();
                values.insert("person_confidence", person.confidence);
                candidates.push(ViolationCandidate::new(
                    ViolationCategory::Helmet,
                    observation,
                    RuleMetadata {
                        rule: "rider_without_helmet",
                        subject: person.bbox,
                        related: Some(moto.bbox),
                        values,
                    },
                ));
                // One candidate per motorcycle.
                break;
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn det(label: ObjectClass, x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> Detection {
        Detection::new(label, BoundingBox::new(x1, y1, x2, y2), conf)
    }

    fn run(detections: &[Detection]) -> Vec<ViolationCandidate> {
        let mut classifier = HelmetClassifier::new(0.5, 40.0);
        let observation = FrameDetections {
            frame_index: 7,
            timestamp: Duration::from_millis(700),
            detections,
        };
        classifier.classify(&observation, &DetectionHistory::default())
    }

    #[test]
    fn rider_inside_motorcycle_box_is_flagged() {
        let dets = [
            det(ObjectClass::Motorcycle, 0.0, 0.0, 100.0, 100.0, 0.9),
            det(ObjectClass::Person, 20.0, 10.0, 80.0, 95.0, 0.9),
        ];
        let candidates = run(&dets);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].frame_index, 7);
        assert_eq!(candidates[0].evidence_frame, 7);
        assert_eq!(candidates[0].category, ViolationCategory::Helmet);
        assert_eq!(candidates[0].metadata.related, Some(dets[0].bbox));
    }

    #[test]
    fn person_sticking_out_is_not_a_rider() {
        let dets = [
            det(ObjectClass::Motorcycle, 0.0, 0.0, 100.0, 100.0, 0.9),
            det(ObjectClass::Person, 20.0, 10.0, 110.0, 95.0, 0.9),
        ];
        assert!(run(&dets).is_empty());
    }

    #[test]
    fn low_confidence_person_is_ignored() {
        let dets = [
            det(ObjectClass::Motorcycle, 0.0, 0.0, 100.0, 100.0, 0.9),
            det(ObjectClass::Person, 20.0, 10.0, 80.0, 95.0, 0.5),
        ];
        assert!(run(&dets).is_empty());
    }

    #[test]
    fn helmet_on_head_suppresses_candidate() {
        let dets = [
            det(ObjectClass::Motorcycle, 0.0, 0.0, 100.0, 100.0, 0.9),
            det(ObjectClass::Person, 20.0, 10.0, 80.0, 95.0, 0.9),
            det(ObjectClass::Helmet, 40.0, 10.0, 60.0, 30.0, 0.8),
        ];
        assert!(run(&dets).is_empty());

        // Helmet held at waist height does not count.
        let dets = [
            det(ObjectClass::Motorcycle, 0.0, 0.0, 100.0, 100.0, 0.9),
            det(ObjectClass::Person, 20.0, 10.0, 80.0, 95.0, 0.9),
            det(ObjectClass::Helmet, 40.0, 60.0, 60.0, 80.0, 0.8),
        ];
        assert_eq!(run(&dets).len(), 1);
    }

    #[test]
    fn empty_frame_yields_nothing() {
        assert!(run(&[]).is_empty());
    }

    #[test]
    fn person_joins_at_most_one_candidate() {
        // Two overlapping motorcycle boxes around the same rider.
        let dets = [
            det(ObjectClass::Motorcycle, 0.0, 0.0, 100.0, 100.0, 0.9),
            det(ObjectClass::Motorcycle, 5.0, 0.0, 105.0, 100.0, 0.8),
            det(ObjectClass::Person, 20.0, 10.0, 80.0, 95.0, 0.9),
        ];
        assert_eq!(run(&dets).len(), 1);
    }

    #[test]
    fn distinct_pairs_yield_distinct_candidates() {
        let dets = [
            det(ObjectClass::Motorcycle, 0.0, 0.0, 100.0, 100.0, 0.9),
            det(ObjectClass::Person, 20.0, 10.0, 80.0, 95.0, 0.9),
            det(ObjectClass::Motorcycle, 200.0, 0.0, 300.0, 100.0, 0.9),
            det(ObjectClass::Person, 220.0, 10.0, 280.0, 95.0, 0.9),
        ];
        let candidates = run(&dets);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].metadata.subject.x1, 20.0);
        assert_eq!(candidates[1].metadata.subject.x1, 220.0);
    }
}
