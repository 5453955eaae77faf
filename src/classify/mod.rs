//! Violation classifiers.
//!
//! One strategy per [`ViolationCategory`]. A classifier looks at one frame's
//! detections (plus a short history for temporal rules) and returns
//! candidates. Candidates are provisional: the snapshot manager decides which
//! of them become durable evidence.
//!
//! Rules shared by every strategy:
//! - zero detections yields zero candidates
//! - one candidate at most per physically distinct violating pair per frame
//! - candidates come out in detection order, so runs are reproducible

pub mod geometry;
mod helmet;
mod history;
mod lane;
mod signal;
mod triple;

use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{config_error, PipelineConfig};
use crate::detect::{BoundingBox, Detection, ObjectClass};
use crate::ViolationCategory;

pub use helmet::HelmetClassifier;
pub use history::{DetectionHistory, DEFAULT_HISTORY_FRAMES};
pub use lane::LaneClassifier;
pub use signal::SignalClassifier;
pub use triple::TripleRidingClassifier;

/// What a classifier sees for one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameDetections<'a> {
    pub frame_index: u64,
    pub timestamp: Duration,
    pub detections: &'a [Detection],
}

/// Why a candidate was raised. Drawn on the annotated frame, never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleMetadata {
    pub rule: &'static str,
    /// Box that gets the violation marker.
    pub subject: BoundingBox,
    /// Partner box (e.g. the motorcycle a rider sits on).
    pub related: Option<BoundingBox>,
    pub values: BTreeMap<&'static str, f32>,
}

/// Provisional violation signal.
#[derive(Clone, Debug, PartialEq)]
pub struct ViolationCandidate {
    pub category: ViolationCategory,
    pub frame_index: u64,
    pub timestamp: Duration,
    /// Frame the evidence image is taken from.
    pub evidence_frame: u64,
    pub metadata: RuleMetadata,
}

impl ViolationCandidate {
    pub(crate) fn new(
        category: ViolationCategory,
        observation: &FrameDetections<'_>,
        metadata: RuleMetadata,
    ) -> Self {
        Self {
            category,
            frame_index: observation.frame_index,
            timestamp: observation.timestamp,
            evidence_frame: observation.frame_index,
            metadata,
        }
    }
}

/// Category rule over one frame's detections.
pub trait ViolationClassifier: Send {
    fn category(&self) -> ViolationCategory;

    fn classify(
        &mut self,
        observation: &FrameDetections<'_>,
        history: &DetectionHistory,
    ) -> Vec<ViolationCandidate>;
}

/// Pick the strategy for a category.
///
/// Fails with a configuration error when the category needs zone geometry the
/// config does not provide.
pub fn classifier_for(
    category: ViolationCategory,
    cfg: &PipelineConfig,
) -> Result<Box<dyn ViolationClassifier>> {
    match category {
        ViolationCategory::Helmet => Ok(Box::new(HelmetClassifier::new(
            cfg.confidence_threshold,
            cfg.containment_tolerance_px as f32,
        ))),
        ViolationCategory::TripleRiding => Ok(Box::new(TripleRidingClassifier::new(
            cfg.confidence_threshold,
            cfg.containment_tolerance_px as f32,
            cfg.triple.min_riders,
        ))),
        ViolationCategory::Lane => {
            if cfg.lane.restricted_zones.is_empty() {
                return Err(config_error(
                    "lane category requires at least one lane.restricted_zones polygon",
                ));
            }
            Ok(Box::new(LaneClassifier::new(
                cfg.confidence_threshold,
                cfg.lane.restricted_zones.clone(),
            )))
        }
        ViolationCategory::SignalJump => {
            let stop_line = cfg
                .signal
                .stop_line
                .ok_or_else(|| config_error("signal category requires signal.stop_line"))?;
            if cfg.signal.red_phases.is_empty() {
                return Err(config_error(
                    "signal category requires at least one signal.red_phases entry",
                ));
            }
            Ok(Box::new(SignalClassifier::new(
                cfg.confidence_threshold,
                stop_line,
                cfg.signal.red_phases.clone(),
            )))
        }
    }
}

/// Containment rule: a rider's box sits horizontally inside the motorcycle box
/// and its bottom edge is no more than `tolerance` below the motorcycle's.
pub fn rides_on(person: &BoundingBox, motorcycle: &BoundingBox, tolerance: f32) -> bool {
    person.x1 > motorcycle.x1 && person.x2 < motorcycle.x2 && person.y2 < motorcycle.y2 + tolerance
}

/// Persons above the confidence threshold, in detection order.
pub(crate) fn confident_persons(detections: &[Detection], threshold: f32) -> Vec<&Detection> {
    detections
        .iter()
        .filter(|det| det.label == ObjectClass::Person && det.confidence > threshold)
        .collect()
}

pub(crate) fn motorcycles(detections: &[Detection]) -> impl Iterator<Item = &Detection> {
    detections
        .iter()
        .filter(|det| det.label == ObjectClass::Motorcycle)
}
