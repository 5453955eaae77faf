//! sentinel - traffic violation detection over a recorded video
//!
//! For each requested category this binary:
//! 1. Opens the video and the configured detector
//! 2. Runs the category rule on every frame
//! 3. Writes the annotated output video and up to `max_snapshots` evidence images
//! 4. Records each violation in the SQLite store
//!
//! Several categories run concurrently, one thread each, over the same video.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use traffic_sentinel::config::DetectorKind;
use traffic_sentinel::detect::open_backend;
use traffic_sentinel::{
    CancellationFlag, ErrorKind, OnQuotaExhausted, Pipeline, PipelineConfig, PipelineStage,
    RunComponents, RunContext, RunOutcome, RunSummary, SqliteViolationStore, ViolationCategory,
    ViolationStore,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file to analyse (`stub://name?frames=N` for a synthetic clip).
    video: String,
    /// Violation category (helmet|signal|lane|triple). Repeat to run several.
    #[arg(long = "category", short = 'c', required = true, value_name = "CATEGORY")]
    categories: Vec<String>,
    /// Config file (.toml or .json).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Evidence images per run.
    #[arg(long)]
    max_snapshots: Option<u32>,
    /// Detector backend (scripted|replay|tract).
    #[arg(long)]
    detector: Option<String>,
    /// Detection log for the replay detector.
    #[arg(long, value_name = "FILE")]
    detections: Option<PathBuf>,
    /// What to do once the snapshot quota is used up (continue|stop).
    #[arg(long, value_name = "MODE")]
    on_quota: Option<String>,
    /// Override the output root directory.
    #[arg(long)]
    output_root: Option<PathBuf>,
    /// Override the violation database path.
    #[arg(long)]
    db_path: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let categories = parse_categories(&args.categories)?;
    let cfg = {
        let _stage = ui.stage("Load configuration");
        resolve_config(&args)?
    };
    let store: Arc<dyn ViolationStore> = {
        let _stage = ui.stage("Open violation store");
        Arc::new(SqliteViolationStore::open(&cfg.db_path)?)
    };

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received, stopping after the current frame");
            cancel.cancel();
        })?;
    }

    let summaries: Vec<RunSummary> = {
        let _stage = ui.stage("Process video");
        std::thread::scope(|scope| {
            let handles: Vec<_> = categories
                .iter()
                .map(|&category| {
                    let store = Arc::clone(&store);
                    let cfg = &cfg;
                    let cancel = cancel.clone();
                    let video = args.video.as_str();
                    let counter = ui.frames(category.slug());
                    scope.spawn(move || run_one(category, video, cfg, store, cancel, counter))
                })
                .collect();
            handles
                .into_iter()
                .zip(&categories)
                .map(|(handle, &category)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| panicked_summary(category))
                })
                .collect()
        })
    };

    let mut failed = 0;
    for summary in &summaries {
        println!("{}", describe(summary));
        if !summary.is_success() {
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(anyhow!("{} of {} runs failed", failed, summaries.len()));
    }
    Ok(())
}

fn parse_categories(raw: &[String]) -> Result<Vec<ViolationCategory>> {
    let mut out: Vec<ViolationCategory> = Vec::new();
    for value in raw {
        let category: ViolationCategory = value.parse()?;
        if !out.contains(&category) {
            out.push(category);
        }
    }
    Ok(out)
}

fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let mut cfg = PipelineConfig::load_from(args.config.as_deref())?;
    if let Some(max) = args.max_snapshots {
        cfg.max_snapshots = max;
    }
    if let Some(kind) = &args.detector {
        cfg.detector.kind = kind.parse()?;
    }
    if let Some(path) = &args.detections {
        cfg.detector.detections_path = Some(path.clone());
        if args.detector.is_none() {
            cfg.detector.kind = DetectorKind::Replay;
        }
    }
    if let Some(mode) = &args.on_quota {
        cfg.on_quota_exhausted = mode.parse::<OnQuotaExhausted>()?;
    }
    if let Some(root) = &args.output_root {
        cfg.output_root = root.clone();
    }
    if let Some(db_path) = &args.db_path {
        cfg.db_path = db_path.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn run_one(
    category: ViolationCategory,
    video: &str,
    cfg: &PipelineConfig,
    store: Arc<dyn ViolationStore>,
    cancel: CancellationFlag,
    counter: ui::FrameCounter,
) -> RunSummary {
    let detector = match open_backend(&cfg.detector) {
        Ok(detector) => detector,
        Err(err) => {
            return RunSummary::not_started(
                category,
                RunOutcome::Failed {
                    stage: PipelineStage::Opening,
                    kind: ErrorKind::Configuration,
                    detail: format!("{:#}", err),
                },
            )
        }
    };
    let ctx = RunContext::new(category, cfg.clone()).with_cancellation(cancel);
    Pipeline::new(ctx, RunComponents::new(detector, store))
        .with_progress(move |progress| counter.update(progress.frame_index, progress.violations))
        .run(video)
}

fn panicked_summary(category: ViolationCategory) -> RunSummary {
    RunSummary::not_started(
        category,
        RunOutcome::Failed {
            stage: PipelineStage::Processing,
            kind: ErrorKind::Io,
            detail: "run thread panicked".to_string(),
        },
    )
}

fn describe(summary: &RunSummary) -> String {
    let paths = format!(
        "video={} snapshots={}",
        summary
            .output_video_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into()),
        summary
            .snapshot_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into()),
    );
    match &summary.outcome {
        RunOutcome::Completed { stop_reason } => format!(
            "{}: completed ({:?}) frames={} violations={} suppressed={} {}",
            summary.category,
            stop_reason,
            summary.total_frames_processed,
            summary.violations_detected,
            summary.suppressed,
            paths
        ),
        RunOutcome::Failed {
            stage,
            kind,
            detail,
        } => format!(
            "{}: FAILED during {:?} ({:?}) after {} frames: {}",
            summary.category, stage, kind, summary.total_frames_processed, detail
        ),
    }
}
