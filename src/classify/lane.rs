use std::collections::BTreeMap;

use super::geometry::Polygon;
use super::{DetectionHistory, FrameDetections, RuleMetadata, ViolationCandidate, ViolationClassifier};
use crate::ViolationCategory;

/// Road vehicle entering a restricted lane zone.
///
/// A vehicle's position is the bottom centre of its box (its wheels). An event
/// fires on entry: the matched previous position was outside the zone, or the
/// vehicle has no match in history and is first seen inside.
pub struct LaneClassifier {
    confidence_threshold: f32,
    zones: Vec<Polygon>,
}

impl LaneClassifier {
    pub fn new(confidence_threshold: f32, zones: Vec<Polygon>) -> Self {
        Self {
            confidence_threshold,
            zones,
        }
    }
}

impl ViolationClassifier for LaneClassifier {
    fn category(&self) -> ViolationCategory {
        ViolationCategory::Lane
    }

    fn classify(
        &mut self,
        observation: &FrameDetections<'_>,
        history: &DetectionHistory,
    ) -> Vec<ViolationCandidate> {
        let mut candidates = Vec::new();
        for vehicle in observation
            .detections
            .iter()
            .filter(|det| det.label.is_road_vehicle() && det.confidence > self.confidence_threshold)
        {
            let position = vehicle.bbox.bottom_center();
            let Some(zone_index) = self.zones.iter().position(|zone| zone.contains(position))
            else {
                continue;
            };
            let zone = &self.zones[zone_index];
            let previous = history.previous_match(vehicle);
            if previous.is_some_and(|prev| zone.contains(prev.bbox.bottom_center())) {
                continue;
            }

            let mut values = BTreeMap::new();
            values.insert("zone", zone_index as f32);
            values.insert("confidence", vehicle.confidence);
            candidates.push(ViolationCandidate::new(
                ViolationCategory::Lane,
                observation,
                RuleMetadata {
                    rule: "restricted_zone_entry",
                    subject: vehicle.bbox,
                    related: previous.map(|prev| prev.bbox),
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

    fn zone() -> Polygon {
        // Right half of a 200x100 frame.
        Polygon::new(vec![(100.0, 0.0), (200.0, 0.0), (200.0, 100.0), (100.0, 100.0)])
    }

    fn car(x: f32) -> Detection {
        Detection::new(
            ObjectClass::Vehicle,
            BoundingBox::new(x, 40.0, x + 40.0, 90.0),
            0.9,
        )
    }

    fn classify(
        classifier: &mut LaneClassifier,
        frame_index: u64,
        detections: &[Detection],
        history: &DetectionHistory,
    ) -> Vec<ViolationCandidate> {
        let observation = FrameDetections {
            frame_index,
            timestamp: Duration::ZERO,
            detections,
        };
        classifier.classify(&observation, history)
    }

    #[test]
    fn entry_fires_once() {
        let mut classifier = LaneClassifier::new(0.5, vec![zone()]);
        let mut history = DetectionHistory::default();
        let positions = [50.0, 70.0, 90.0, 95.0];
        let mut fired = Vec::new();
        for (i, x) in positions.iter().enumerate() {
            let dets = vec![car(*x)];
            let candidates = classify(&mut classifier, i as u64, &dets, &history);
            fired.extend(candidates.iter().map(|c| c.frame_index));
            history.push(i as u64, dets);
        }
        // Bottom centre sits at x1 + 20, so the car enters the zone at x1 = 90.
        assert_eq!(fired, vec![2]);
    }

    #[test]
    fn first_sighting_inside_zone_counts() {
        let mut classifier = LaneClassifier::new(0.5, vec![zone()]);
        let candidates = classify(&mut classifier, 0, &[car(150.0)], &DetectionHistory::default());
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].metadata.related.is_none());
    }

    #[test]
    fn persons_are_not_vehicles() {
        let mut classifier = LaneClassifier::new(0.5, vec![zone()]);
        let walker = Detection::new(
            ObjectClass::Person,
            BoundingBox::new(150.0, 40.0, 170.0, 90.0),
            0.9,
        );
        assert!(classify(&mut classifier, 0, &[walker], &DetectionHistory::default()).is_empty());
    }
}
