//! Traffic Sentinel
//!
//! This crate implements a per-video traffic violation detection pipeline.
//!
//! # Architecture
//!
//! One *run* processes one recorded video for one violation category:
//!
//! 1. **Frame source** (`ingest`): decodes a finite file into ordered frames.
//! 2. **Detector** (`detect`): returns labeled boxes for a frame. Injected per run.
//! 3. **Classifier** (`classify`): category rules turn detections into candidates.
//! 4. **Snapshot manager** (`snapshot`): quota-bounded evidence images + store records.
//! 5. **Annotated writer** (`annotate`, `sink`): one output frame per input frame.
//! 6. **Violation store** (`storage`): append-only, unique monotonic ids.
//! 7. **Orchestrator** (`pipeline`): the state machine that wires it all.
//!
//! Runs share no mutable state. Several categories over the same video may run
//! concurrently as long as each writes to its own category-scoped paths.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub mod annotate;
pub mod classify;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod sink;
pub mod snapshot;
pub mod storage;

pub use classify::{classifier_for, DetectionHistory, ViolationCandidate, ViolationClassifier};
pub use config::{OnQuotaExhausted, PipelineConfig, SnapshotLayout, VideoEncoder};
pub use detect::{BoundingBox, Detection, DetectorBackend, ObjectClass, ScriptedBackend};
pub use frame::Frame;
pub use ingest::{open_failure, FileSource, OpenFailure, SyntheticVideo};
pub use notify::{LogNotifier, ViolationNotifier};
pub use pipeline::{
    run, run_with_cancellation, CancellationFlag, FrameProgress, Pipeline, PipelineState,
    RunComponents, RunContext, RunOutcome, RunSummary, StopReason,
};
pub use sink::AnnotatedVideoWriter;
pub use snapshot::{SnapshotManager, SnapshotOutcome, SnapshotQuota};
pub use storage::{
    InMemoryViolationStore, NewViolation, SqliteViolationStore, ViolationEvent, ViolationFilter,
    ViolationStore,
};

// -------------------- Violation Categories --------------------

/// Violation category selected for a run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    Helmet,
    SignalJump,
    Lane,
    TripleRiding,
}

impl ViolationCategory {
    pub const ALL: [ViolationCategory; 4] = [
        ViolationCategory::Helmet,
        ViolationCategory::SignalJump,
        ViolationCategory::Lane,
        ViolationCategory::TripleRiding,
    ];

    /// Short name used in output paths (`output/{slug}_output.mp4`).
    pub fn slug(self) -> &'static str {
        match self {
            ViolationCategory::Helmet => "helmet",
            ViolationCategory::SignalJump => "signal",
            ViolationCategory::Lane => "lane",
            ViolationCategory::TripleRiding => "triple",
        }
    }

    /// Value stored in the `type` column of the violation record.
    pub fn record_type(self) -> &'static str {
        match self {
            ViolationCategory::Helmet => "Helmet Violation",
            ViolationCategory::SignalJump => "Signal Jumping Violation",
            ViolationCategory::Lane => "Lane Violation",
            ViolationCategory::TripleRiding => "Triple Riding Violation",
        }
    }

    /// Short overlay text drawn next to a violation marker.
    pub fn marker_label(self) -> &'static str {
        match self {
            ViolationCategory::Helmet => "No Helmet",
            ViolationCategory::SignalJump => "Signal Jump",
            ViolationCategory::Lane => "Lane Violation",
            ViolationCategory::TripleRiding => "Triple Riding",
        }
    }
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ViolationCategory {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "helmet" => Ok(ViolationCategory::Helmet),
            "signal" | "signal_jump" | "signal_jumping" | "signal_detection" => {
                Ok(ViolationCategory::SignalJump)
            }
            "lane" | "lane_violation" => Ok(ViolationCategory::Lane),
            "triple" | "triple_riding" => Ok(ViolationCategory::TripleRiding),
            other => Err(PipelineError::new(
                ErrorKind::Configuration,
                PipelineStage::Opening,
                format!("unknown violation category '{}'", other),
            )
            .into()),
        }
    }
}

// -------------------- Error Taxonomy --------------------

/// Error classes a run can fail with.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input video missing or undecodable.
    Input,
    /// Detector failure.
    Inference,
    /// Write failure on video, snapshot or store.
    Io,
    /// Invalid category, thresholds or zone geometry.
    Configuration,
}

/// Pipeline stage an error surfaced in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Opening,
    Processing,
    Finalizing,
}

/// Classified pipeline error. Travels inside `anyhow::Error`; recover with [`error_kind`].
#[derive(Clone, Debug)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub stage: PipelineStage,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} error during {:?}: {}", self.kind, self.stage, self.message)
    }
}

impl std::error::Error for PipelineError {}

/// Find the classified error in an `anyhow` chain, if any.
pub fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    // `downcast_ref` on the anyhow error also sees a `PipelineError` attached as context.
    err.downcast_ref::<PipelineError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>()))
}

pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    pipeline_error(err).map(|e| e.kind)
}

/// Wrap an arbitrary error as a classified pipeline error, keeping its message chain.
pub(crate) fn classify_err(
    kind: ErrorKind,
    stage: PipelineStage,
) -> impl FnOnce(anyhow::Error) -> anyhow::Error {
    move |err| {
        if pipeline_error(&err).is_some() {
            return err;
        }
        anyhow!(PipelineError::new(kind, stage, format!("{:#}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_source_module_names() {
        assert_eq!(
            "signal_detection".parse::<ViolationCategory>().unwrap(),
            ViolationCategory::SignalJump
        );
        assert_eq!(
            "Triple-Riding".parse::<ViolationCategory>().unwrap(),
            ViolationCategory::TripleRiding
        );
        assert_eq!("helmet".parse::<ViolationCategory>().unwrap().slug(), "helmet");
    }

    #[test]
    fn unknown_category_is_configuration_error() {
        let err = "speeding".parse::<ViolationCategory>().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Configuration));
    }

    #[test]
    fn classify_err_keeps_existing_classification() {
        let original: anyhow::Error =
            PipelineError::new(ErrorKind::Input, PipelineStage::Opening, "missing").into();
        let wrapped = classify_err(ErrorKind::Io, PipelineStage::Processing)(original);
        assert_eq!(error_kind(&wrapped), Some(ErrorKind::Input));

        let plain = anyhow!("disk full");
        let wrapped = classify_err(ErrorKind::Io, PipelineStage::Processing)(plain);
        let classified = pipeline_error(&wrapped).unwrap();
        assert_eq!(classified.kind, ErrorKind::Io);
        assert_eq!(classified.stage, PipelineStage::Processing);
        assert!(classified.message.contains("disk full"));
    }
}
