//! Per-video pipeline orchestrator.
//!
//! One `Pipeline` drives one run: one video, one category. States:
//!
//! ```text
//! Idle -> Opening -> Processing -> Finalizing -> Completed | Failed
//!            \____________________________________/  (open failure)
//! ```
//!
//! `Finalizing` runs whenever `Opening` succeeded, even after a fatal error in
//! `Processing`, so the writer and the source are always closed.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::annotate::Annotator;
use crate::classify::{classifier_for, DetectionHistory, FrameDetections, ViolationClassifier};
use crate::config::{config_error, OnQuotaExhausted, PipelineConfig};
use crate::detect::{open_backend, DetectorBackend};
use crate::ingest::FileSource;
use crate::notify::{LogNotifier, ViolationNotifier};
use crate::sink::AnnotatedVideoWriter;
use crate::snapshot::{evidence_dir, SnapshotManager, SnapshotOutcome};
use crate::storage::{SqliteViolationStore, ViolationStore};
use crate::{classify_err, pipeline_error, ErrorKind, PipelineStage, ViolationCategory};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opening,
    Processing,
    Finalizing,
    Completed,
    Failed,
}

/// Shared stop request, checked between frames.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    /// Quota used up with `on_quota_exhausted = "stop"`.
    QuotaReached,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed {
        stop_reason: StopReason,
    },
    Failed {
        stage: PipelineStage,
        kind: ErrorKind,
        detail: String,
    },
}

/// What a run reports back. Not persisted.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub category: ViolationCategory,
    /// Frames read, annotated and written to the output video.
    pub total_frames_processed: u64,
    /// Evidence images written (each backed by one store record).
    pub violations_detected: u32,
    pub output_video_path: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub outcome: RunOutcome,
    pub candidates: u64,
    pub suppressed: u64,
    pub snapshot_failures: u64,
    pub event_ids: Vec<i64>,
}

impl RunSummary {
    /// Summary for a run that never opened its video.
    pub fn not_started(category: ViolationCategory, outcome: RunOutcome) -> Self {
        Self {
            category,
            total_frames_processed: 0,
            violations_detected: 0,
            output_video_path: None,
            snapshot_dir: None,
            outcome,
            candidates: 0,
            suppressed: 0,
            snapshot_failures: 0,
            event_ids: Vec::new(),
        }
    }

    fn failed_before_open(category: ViolationCategory, err: &anyhow::Error) -> Self {
        Self::not_started(category, failed_outcome(PipelineStage::Opening, err))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.outcome {
            RunOutcome::Completed { stop_reason } => Some(stop_reason),
            RunOutcome::Failed { .. } => None,
        }
    }
}

fn failed_outcome(fallback_stage: PipelineStage, err: &anyhow::Error) -> RunOutcome {
    match pipeline_error(err) {
        Some(classified) => RunOutcome::Failed {
            stage: classified.stage,
            kind: classified.kind,
            detail: format!("{:#}", err),
        },
        None => RunOutcome::Failed {
            stage: fallback_stage,
            kind: ErrorKind::Io,
            detail: format!("{:#}", err),
        },
    }
}

/// Everything a run needs to know about where it writes.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub category: ViolationCategory,
    pub config: PipelineConfig,
    pub started_at: DateTime<Local>,
    pub output_video_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub cancel: CancellationFlag,
}

impl RunContext {
    pub fn new(category: ViolationCategory, config: PipelineConfig) -> Self {
        Self::starting_at(category, config, Local::now())
    }

    pub fn starting_at(
        category: ViolationCategory,
        config: PipelineConfig,
        started_at: DateTime<Local>,
    ) -> Self {
        let output_video_path = config
            .output_root
            .join(format!("{}_output.mp4", category.slug()));
        let snapshot_dir = evidence_dir(
            config.snapshot_layout,
            category,
            &config.output_root,
            &config.snapshot_root,
            &started_at,
        );
        Self {
            category,
            config,
            started_at,
            output_video_path,
            snapshot_dir,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Collaborators injected into a run.
pub struct RunComponents {
    pub detector: Box<dyn DetectorBackend>,
    pub store: Arc<dyn ViolationStore>,
    pub notifier: Arc<dyn ViolationNotifier>,
}

impl RunComponents {
    pub fn new(detector: Box<dyn DetectorBackend>, store: Arc<dyn ViolationStore>) -> Self {
        Self {
            detector,
            store,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ViolationNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Detector and SQLite store as configured, with the log notifier.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let detector = open_backend(&config.detector)
            .map_err(classify_err(ErrorKind::Configuration, PipelineStage::Opening))?;
        let store = SqliteViolationStore::open(&config.db_path)
            .map_err(classify_err(ErrorKind::Io, PipelineStage::Opening))?;
        Ok(Self::new(detector, Arc::new(store)))
    }
}

/// Progress reported after each written frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameProgress {
    pub category: ViolationCategory,
    pub frame_index: u64,
    pub violations: u32,
}

type ProgressFn = Box<dyn FnMut(&FrameProgress) + Send>;

/// Per-run state that exists between `Opening` and `Finalizing`.
struct OpenRun {
    source: FileSource,
    writer: AnnotatedVideoWriter,
    classifier: Box<dyn ViolationClassifier>,
    snapshots: SnapshotManager,
    annotator: Annotator,
    history: DetectionHistory,
}

#[derive(Default)]
struct RunCounters {
    frames: u64,
    candidates: u64,
    suppressed: u64,
    snapshot_failures: u64,
    event_ids: Vec<i64>,
}

pub struct Pipeline {
    ctx: RunContext,
    components: RunComponents,
    state: PipelineState,
    progress: Option<ProgressFn>,
}

impl Pipeline {
    pub fn new(ctx: RunContext, components: RunComponents) -> Self {
        Self {
            ctx,
            components,
            state: PipelineState::Idle,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: impl FnMut(&FrameProgress) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!(
            "[{}] {:?} -> {:?}",
            self.ctx.category,
            self.state,
            next
        );
        self.state = next;
    }

    /// Process `video_path` to completion and report the outcome.
    pub fn run(mut self, video_path: &str) -> RunSummary {
        let category = self.ctx.category;
        log::info!("[{}] run started on {}", category, video_path);

        self.transition(PipelineState::Opening);
        let mut open = match self.open(video_path) {
            Ok(open) => open,
            Err(err) => {
                log::error!("[{}] open failed: {:#}", category, err);
                self.transition(PipelineState::Failed);
                return RunSummary::failed_before_open(category, &err);
            }
        };

        self.transition(PipelineState::Processing);
        let mut counters = RunCounters::default();
        let processed = self.process(&mut open, &mut counters);

        self.transition(PipelineState::Finalizing);
        let violations = open.snapshots.quota().written();
        let output_video_path = open.writer.output_path().to_path_buf();
        let snapshot_dir = open.snapshots.dir().to_path_buf();
        let finalized = finalize(open);

        let outcome = match (processed, finalized) {
            (Ok(stop_reason), Ok(())) => RunOutcome::Completed { stop_reason },
            (Err(err), finalized) => {
                if let Err(close_err) = finalized {
                    log::warn!("[{}] close after failure: {:#}", category, close_err);
                }
                failed_outcome(PipelineStage::Processing, &err)
            }
            (Ok(_), Err(err)) => failed_outcome(PipelineStage::Finalizing, &err),
        };

        match &outcome {
            RunOutcome::Completed { stop_reason } => {
                self.transition(PipelineState::Completed);
                log::info!(
                    "[{}] completed ({:?}): {} frames, {} violations",
                    category,
                    stop_reason,
                    counters.frames,
                    violations
                );
            }
            RunOutcome::Failed { stage, kind, detail } => {
                self.transition(PipelineState::Failed);
                log::error!(
                    "[{}] failed during {:?} ({:?}) after {} frames: {}",
                    category,
                    stage,
                    kind,
                    counters.frames,
                    detail
                );
            }
        }

        RunSummary {
            category,
            total_frames_processed: counters.frames,
            violations_detected: violations,
            output_video_path: Some(output_video_path),
            snapshot_dir: Some(snapshot_dir),
            outcome,
            candidates: counters.candidates,
            suppressed: counters.suppressed,
            snapshot_failures: counters.snapshot_failures,
            event_ids: counters.event_ids,
        }
    }

    fn open(&mut self, video_path: &str) -> Result<OpenRun> {
        let cfg = &self.ctx.config;
        cfg.validate()?;
        let classifier = classifier_for(self.ctx.category, cfg)?;
        if self.components.detector.is_dry_run() && !is_synthetic(video_path) {
            return Err(config_error(format!(
                "the {} detector reports nothing for {}; configure the replay or tract detector",
                self.components.detector.name(),
                video_path.trim()
            )));
        }
        let source = FileSource::open(video_path)?;

        self.components
            .detector
            .warm_up()
            .with_context(|| format!("{} detector warm-up", self.components.detector.name()))
            .map_err(classify_err(ErrorKind::Inference, PipelineStage::Opening))?;

        let snapshots = SnapshotManager::new(
            self.ctx.category,
            self.ctx.snapshot_dir.clone(),
            cfg.max_snapshots,
            Arc::clone(&self.components.store),
            Arc::clone(&self.components.notifier),
            Some(source.path().to_string()),
            self.ctx.started_at,
        );
        snapshots
            .prepare()
            .map_err(classify_err(ErrorKind::Io, PipelineStage::Opening))?;

        let writer = match AnnotatedVideoWriter::open(
            &self.ctx.output_video_path,
            cfg.video.encoder,
            &cfg.video.codec,
            source.frame_rate(),
            source.width(),
            source.height(),
        ) {
            Ok(writer) => writer,
            Err(err) => {
                // Only removes the directory if this run left it empty.
                let _ = std::fs::remove_dir(snapshots.dir());
                return Err(classify_err(ErrorKind::Io, PipelineStage::Opening)(err));
            }
        };

        Ok(OpenRun {
            source,
            writer,
            classifier,
            snapshots,
            annotator: Annotator::new(cfg.video.font_path.as_deref()),
            history: DetectionHistory::default(),
        })
    }

    fn process(&mut self, open: &mut OpenRun, counters: &mut RunCounters) -> Result<StopReason> {
        let category = self.ctx.category;
        let threshold = self.ctx.config.confidence_threshold;
        let stop_on_quota = self.ctx.config.on_quota_exhausted == OnQuotaExhausted::Stop;

        loop {
            if self.ctx.cancel.is_cancelled() {
                log::info!("[{}] cancelled at frame {}", category, counters.frames);
                return Ok(StopReason::Cancelled);
            }

            let frame = match open
                .source
                .next_frame()
                .map_err(classify_err(ErrorKind::Input, PipelineStage::Processing))?
            {
                Some(frame) => frame,
                None => return Ok(StopReason::EndOfStream),
            };
            let frame_index = frame.index();

            let detections = self
                .components
                .detector
                .detect(&frame)
                .with_context(|| format!("detection failed on frame {}", frame_index))
                .map_err(classify_err(ErrorKind::Inference, PipelineStage::Processing))?;

            let observation = FrameDetections {
                frame_index,
                timestamp: frame.timestamp(),
                detections: &detections,
            };
            let candidates = open.classifier.classify(&observation, &open.history);
            counters.candidates += candidates.len() as u64;

            let annotated = open
                .annotator
                .annotate(&frame, &detections, &candidates, threshold);
            for candidate in &candidates {
                match open.snapshots.consider(candidate, &annotated) {
                    SnapshotOutcome::EvidenceWritten(event) => counters.event_ids.push(event.id),
                    SnapshotOutcome::Suppressed => counters.suppressed += 1,
                    SnapshotOutcome::Failed(_) => counters.snapshot_failures += 1,
                }
            }

            open.writer
                .write(&annotated)
                .with_context(|| format!("failed to write output frame {}", frame_index))
                .map_err(classify_err(ErrorKind::Io, PipelineStage::Processing))?;
            counters.frames += 1;
            open.history.push(frame_index, detections);

            log::debug!(
                "[{}] frame {}: {} candidates",
                category,
                frame_index,
                candidates.len()
            );
            let violations = open.snapshots.quota().written();
            if let Some(progress) = self.progress.as_mut() {
                progress(&FrameProgress {
                    category,
                    frame_index,
                    violations,
                });
            }

            if stop_on_quota && open.snapshots.quota().is_exhausted() {
                log::info!("[{}] snapshot quota reached, stopping", category);
                return Ok(StopReason::QuotaReached);
            }
        }
    }
}

fn is_synthetic(video_path: &str) -> bool {
    video_path.trim().starts_with("stub://")
}

fn finalize(open: OpenRun) -> Result<()> {
    let OpenRun { source, writer, .. } = open;
    source.close();
    let written = writer
        .close()
        .map_err(classify_err(ErrorKind::Io, PipelineStage::Finalizing))?;
    log::debug!("output video closed with {} frames", written);
    Ok(())
}

/// Run one category over one video with the detector, store and notifier
/// built from `config`.
pub fn run(category: ViolationCategory, video_path: &str, config: &PipelineConfig) -> RunSummary {
    run_with_cancellation(category, video_path, config, CancellationFlag::new())
}

pub fn run_with_cancellation(
    category: ViolationCategory,
    video_path: &str,
    config: &PipelineConfig,
    cancel: CancellationFlag,
) -> RunSummary {
    let components = match RunComponents::from_config(config) {
        Ok(components) => components,
        Err(err) => {
            log::error!("[{}] setup failed: {:#}", category, err);
            return RunSummary::failed_before_open(category, &err);
        }
    };
    let ctx = RunContext::new(category, config.clone()).with_cancellation(cancel);
    Pipeline::new(ctx, components).run(video_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoEncoder;
    use crate::detect::{BoundingBox, Detection, ObjectClass, ScriptedBackend};
    use crate::ingest::SyntheticVideo;
    use crate::storage::{InMemoryViolationStore, ViolationFilter};
    use std::path::Path;

    fn config(root: &Path, max_snapshots: u32) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.max_snapshots = max_snapshots;
        cfg.output_root = root.join("output");
        cfg.snapshot_root = root.join("snapshots");
        cfg.video.encoder = VideoEncoder::JpegSequence;
        cfg.video.font_path = None;
        cfg
    }

    fn helmet_pair() -> Vec<Detection> {
        vec![
            Detection::new(
                ObjectClass::Motorcycle,
                BoundingBox::new(0.0, 0.0, 40.0, 40.0),
                0.9,
            ),
            Detection::new(
                ObjectClass::Person,
                BoundingBox::new(10.0, 5.0, 30.0, 38.0),
                0.9,
            ),
        ]
    }

    fn pipeline(
        cfg: PipelineConfig,
        detector: ScriptedBackend,
        store: Arc<InMemoryViolationStore>,
    ) -> Pipeline {
        let ctx = RunContext::new(ViolationCategory::Helmet, cfg);
        Pipeline::new(ctx, RunComponents::new(Box::new(detector), store))
    }

    #[test]
    fn quota_stop_cuts_the_loop_short() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 1);
        cfg.on_quota_exhausted = OnQuotaExhausted::Stop;
        let detector = ScriptedBackend::new().with_frame(2, helmet_pair());
        let store = Arc::new(InMemoryViolationStore::new());

        let summary = pipeline(cfg, detector, store).run(&SyntheticVideo::uri("q", 10, 10.0, 64, 48));
        assert_eq!(summary.stop_reason(), Some(StopReason::QuotaReached));
        assert_eq!(summary.total_frames_processed, 3);
        assert_eq!(summary.violations_detected, 1);
    }

    #[test]
    fn cancelled_run_finalizes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 5);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let ctx = RunContext::new(ViolationCategory::Helmet, cfg).with_cancellation(cancel);
        let summary = Pipeline::new(
            ctx,
            RunComponents::new(
                Box::new(ScriptedBackend::new()),
                Arc::new(InMemoryViolationStore::new()),
            ),
        )
        .run("stub://cancel");
        assert_eq!(summary.stop_reason(), Some(StopReason::Cancelled));
        assert_eq!(summary.total_frames_processed, 0);
        let manifest = crate::sink::read_manifest(summary.output_video_path.as_ref().unwrap()).unwrap();
        assert_eq!(manifest.frame_count, 0);
    }

    #[test]
    fn inference_failure_still_finalizes_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 5);
        let detector = ScriptedBackend::new()
            .with_frame(1, helmet_pair())
            .failing_at(4);
        let store = Arc::new(InMemoryViolationStore::new());

        let summary = pipeline(cfg, detector, store.clone()).run("stub://fail?frames=10");
        match &summary.outcome {
            RunOutcome::Failed { stage, kind, detail } => {
                assert_eq!(*stage, PipelineStage::Processing);
                assert_eq!(*kind, ErrorKind::Inference);
                assert!(detail.contains("frame 4"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(summary.total_frames_processed, 4);
        assert_eq!(summary.violations_detected, 1);
        assert_eq!(store.query(&ViolationFilter::default()).unwrap().len(), 1);
        let manifest = crate::sink::read_manifest(summary.output_video_path.as_ref().unwrap()).unwrap();
        assert_eq!(manifest.frame_count, 4);
    }

    #[test]
    fn missing_geometry_fails_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 5);
        let ctx = RunContext::new(ViolationCategory::Lane, cfg);
        let summary = Pipeline::new(
            ctx,
            RunComponents::new(
                Box::new(ScriptedBackend::new()),
                Arc::new(InMemoryViolationStore::new()),
            ),
        )
        .run("stub://lane");
        assert!(matches!(
            summary.outcome,
            RunOutcome::Failed {
                stage: PipelineStage::Opening,
                kind: ErrorKind::Configuration,
                ..
            }
        ));
        assert!(summary.output_video_path.is_none());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn progress_reports_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 5);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let summary = pipeline(
            cfg,
            ScriptedBackend::new(),
            Arc::new(InMemoryViolationStore::new()),
        )
        .with_progress(move |p| sink.lock().unwrap().push(p.frame_index))
        .run("stub://progress?frames=4");
        assert!(summary.is_success());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
