use std::collections::BTreeMap;

use super::{
    confident_persons, motorcycles, rides_on, DetectionHistory, FrameDetections, RuleMetadata,
    ViolationCandidate, ViolationClassifier,
};
use crate::detect::BoundingBox;
use crate::ViolationCategory;

/// Motorcycle carrying `min_riders` or more persons.
pub struct TripleRidingClassifier {
    confidence_threshold: f32,
    tolerance: f32,
    min_riders: usize,
}

impl TripleRidingClassifier {
    pub fn new(confidence_threshold: f32, tolerance: f32, min_riders: usize) -> Self {
        Self {
            confidence_threshold,
            tolerance,
            min_riders,
        }
    }
}

impl ViolationClassifier for TripleRidingClassifier {
    fn category(&self) -> ViolationCategory {
        ViolationCategory::TripleRiding
    }

    fn classify(
        &mut self,
        observation: &FrameDetections<'_>,
        _history: &DetectionHistory,
    ) -> Vec<ViolationCandidate> {
        let persons = confident_persons(observation.detections, self.confidence_threshold);
        // A person counts toward the first motorcycle that contains them.
        let mut claimed = vec![false; persons.len()];
        let mut candidates = Vec::new();

        for moto in motorcycles(observation.detections) {
            let riders: Vec<usize> = persons
                .iter()
                .enumerate()
                .filter(|(i, person)| {
                    !claimed[*i] && rides_on(&person.bbox, &moto.bbox, self.tolerance)
                })
                .map(|(i, _)| i)
                .collect();
            for &i in &riders {
                claimed[i] = true;
            }
            if riders.len() < self.min_riders {
                continue;
            }

            let riders_box = riders.iter().map(|&i| persons[i].bbox).reduce(|a, b| {
                BoundingBox::new(a.x1.min(b.x1), a.y1.min(b.y1), a.x2.max(b.x2), a.y2.max(b.y2))
            });
            let mut values = BTreeMap::new();
            values.insert("riders", riders.len() as f32);
            candidates.push(ViolationCandidate::new(
                ViolationCategory::TripleRiding,
                observation,
                RuleMetadata {
                    rule: "too_many_riders",
                    subject: moto.bbox,
                    related: riders_box,
                    values,
                },
            ));
        }
        candidates
    }
}
