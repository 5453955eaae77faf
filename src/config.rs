use anyhow::{anyhow, Result};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::classify::geometry::{LineSegment, Polygon};
use crate::{ErrorKind, PipelineError, PipelineStage};

const DEFAULT_MAX_SNAPSHOTS: u32 = 5;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_CONTAINMENT_TOLERANCE_PX: u32 = 40;
const DEFAULT_OUTPUT_ROOT: &str = "output";
const DEFAULT_SNAPSHOT_ROOT: &str = "snapshots";
const DEFAULT_DB_PATH: &str = "data/violations.db";
const DEFAULT_CODEC: &str = "mpeg4";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_MIN_RIDERS: usize = 3;

// -------------------- Choices --------------------

/// Where evidence images land.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotLayout {
    /// `{snapshot_root}/{category}/{YYYY-MM-DD}/`
    Partitioned,
    /// `{output_root}/{category}_violations/`
    Flat,
}

/// What the frame loop does once the snapshot quota is used up.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OnQuotaExhausted {
    /// Keep annotating and writing every frame; only evidence capture stops.
    Continue,
    /// End the frame loop; the output video is cut short.
    Stop,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VideoEncoder {
    Ffmpeg,
    JpegSequence,
}

impl Default for VideoEncoder {
    fn default() -> Self {
        if cfg!(feature = "video-ffmpeg") {
            VideoEncoder::Ffmpeg
        } else {
            VideoEncoder::JpegSequence
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Returns no detections. Only accepted for synthetic `stub://` inputs.
    Scripted,
    /// Replays a JSON detection log.
    Replay,
    /// YOLOv8 ONNX model via tract.
    Tract,
}

impl Default for DetectorKind {
    fn default() -> Self {
        if cfg!(feature = "backend-tract") {
            DetectorKind::Tract
        } else {
            DetectorKind::Scripted
        }
    }
}

fn parse_choice<T: DeserializeOwned>(value: &str) -> Result<T> {
    let de: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        value.trim().into_deserializer();
    T::deserialize(de).map_err(|e| config_error(format!("invalid value '{}': {}", value, e)))
}

impl FromStr for SnapshotLayout {
    type Err = anyhow::Error;
    fn from_str(value: &str) -> Result<Self> {
        parse_choice(value)
    }
}

impl FromStr for OnQuotaExhausted {
    type Err = anyhow::Error;
    fn from_str(value: &str) -> Result<Self> {
        parse_choice(value)
    }
}

impl FromStr for VideoEncoder {
    type Err = anyhow::Error;
    fn from_str(value: &str) -> Result<Self> {
        parse_choice(value)
    }
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;
    fn from_str(value: &str) -> Result<Self> {
        parse_choice(value)
    }
}

// -------------------- File Format --------------------

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    max_snapshots: Option<u32>,
    confidence_threshold: Option<f32>,
    containment_tolerance_px: Option<u32>,
    output_root: Option<PathBuf>,
    snapshot_root: Option<PathBuf>,
    snapshot_layout: Option<SnapshotLayout>,
    db_path: Option<String>,
    on_quota_exhausted: Option<OnQuotaExhausted>,
    video: Option<VideoConfigFile>,
    detector: Option<DetectorConfigFile>,
    triple: Option<TripleConfigFile>,
    lane: Option<LaneConfigFile>,
    signal: Option<SignalConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    encoder: Option<VideoEncoder>,
    codec: Option<String>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    model_input: Option<u32>,
    helmet_class: Option<usize>,
    detections_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TripleConfigFile {
    min_riders: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LaneConfigFile {
    restricted_zones: Option<Vec<Polygon>>,
}

#[derive(Debug, Deserialize, Default)]
struct SignalConfigFile {
    stop_line: Option<LineSegment>,
    red_phases: Option<Vec<RedPhase>>,
}

// -------------------- Resolved Config --------------------

/// Run configuration shared by every component of one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_snapshots: u32,
    pub confidence_threshold: f32,
    pub containment_tolerance_px: u32,
    pub output_root: PathBuf,
    pub snapshot_root: PathBuf,
    pub snapshot_layout: SnapshotLayout,
    pub db_path: String,
    pub on_quota_exhausted: OnQuotaExhausted,
    pub video: VideoSettings,
    pub detector: DetectorSettings,
    pub triple: TripleSettings,
    pub lane: LaneSettings,
    pub signal: SignalSettings,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub encoder: VideoEncoder,
    /// Encoder name handed to ffmpeg (`mpeg4` is the `mp4v` fourcc).
    pub codec: String,
    /// TrueType font for overlay labels. Falls back to common system fonts.
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub model_input: u32,
    pub helmet_class: Option<usize>,
    pub detections_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TripleSettings {
    /// Riders on one motorcycle at or above which a violation is raised.
    pub min_riders: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LaneSettings {
    pub restricted_zones: Vec<Polygon>,
}

#[derive(Debug, Clone, Default)]
pub struct SignalSettings {
    pub stop_line: Option<LineSegment>,
    pub red_phases: Vec<RedPhase>,
}

/// Interval of video time, in seconds from the first frame, during which the signal is red.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RedPhase {
    pub start_s: f64,
    pub end_s: f64,
}

impl RedPhase {
    pub fn contains(&self, t_s: f64) -> bool {
        t_s >= self.start_s && t_s < self.end_s
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Defaults, then the file named by `SENTINEL_CONFIG`, then `SENTINEL_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`PipelineConfig::load`] with an explicit file instead of `SENTINEL_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a config document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PipelineConfigFile =
            toml::from_str(raw).map_err(|e| config_error(format!("invalid config: {}", e)))?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let video = file.video.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let signal = file.signal.unwrap_or_default();
        Self {
            max_snapshots: file.max_snapshots.unwrap_or(DEFAULT_MAX_SNAPSHOTS),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            containment_tolerance_px: file
                .containment_tolerance_px
                .unwrap_or(DEFAULT_CONTAINMENT_TOLERANCE_PX),
            output_root: file
                .output_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
            snapshot_root: file
                .snapshot_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_ROOT)),
            snapshot_layout: file.snapshot_layout.unwrap_or(SnapshotLayout::Partitioned),
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            on_quota_exhausted: file
                .on_quota_exhausted
                .unwrap_or(OnQuotaExhausted::Continue),
            video: VideoSettings {
                encoder: video.encoder.unwrap_or_default(),
                codec: video.codec.unwrap_or_else(|| DEFAULT_CODEC.to_string()),
                font_path: video.font_path,
            },
            detector: DetectorSettings {
                kind: detector.kind.unwrap_or_default(),
                model_path: detector
                    .model_path
                    .or_else(|| Some(PathBuf::from(DEFAULT_MODEL_PATH))),
                model_input: detector.model_input.unwrap_or(DEFAULT_MODEL_INPUT),
                helmet_class: detector.helmet_class,
                detections_path: detector.detections_path,
            },
            triple: TripleSettings {
                min_riders: file
                    .triple
                    .and_then(|triple| triple.min_riders)
                    .unwrap_or(DEFAULT_MIN_RIDERS),
            },
            lane: LaneSettings {
                restricted_zones: file
                    .lane
                    .and_then(|lane| lane.restricted_zones)
                    .unwrap_or_default(),
            },
            signal: SignalSettings {
                stop_line: signal.stop_line,
                red_phases: signal.red_phases.unwrap_or_default(),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value("SENTINEL_MAX_SNAPSHOTS") {
            self.max_snapshots = value.parse().map_err(|_| {
                config_error("SENTINEL_MAX_SNAPSHOTS must be a non-negative integer")
            })?;
        }
        if let Some(value) = env_value("SENTINEL_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = value
                .parse()
                .map_err(|_| config_error("SENTINEL_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_value("SENTINEL_CONTAINMENT_TOLERANCE_PX") {
            self.containment_tolerance_px = value.parse().map_err(|_| {
                config_error("SENTINEL_CONTAINMENT_TOLERANCE_PX must be a non-negative integer")
            })?;
        }
        if let Some(value) = env_value("SENTINEL_OUTPUT_ROOT") {
            self.output_root = PathBuf::from(value);
        }
        if let Some(value) = env_value("SENTINEL_SNAPSHOT_ROOT") {
            self.snapshot_root = PathBuf::from(value);
        }
        if let Some(value) = env_value("SENTINEL_DB_PATH") {
            self.db_path = value;
        }
        if let Some(value) = env_value("SENTINEL_ON_QUOTA") {
            self.on_quota_exhausted = value.parse()?;
        }
        if let Some(value) = env_value("SENTINEL_DETECTOR") {
            self.detector.kind = value.parse()?;
        }
        if let Some(value) = env_value("SENTINEL_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_snapshots == 0 {
            return Err(config_error("max_snapshots must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(config_error("confidence_threshold must be within [0, 1]"));
        }
        if self.video.codec.trim().is_empty() {
            return Err(config_error("video codec must not be empty"));
        }
        if self.detector.model_input == 0 {
            return Err(config_error("detector model_input must be greater than zero"));
        }
        if self.triple.min_riders < 2 {
            return Err(config_error("triple min_riders must be at least 2"));
        }
        for (i, zone) in self.lane.restricted_zones.iter().enumerate() {
            if zone.vertices.len() < 3 {
                return Err(config_error(format!(
                    "lane restricted zone {} needs at least 3 vertices",
                    i
                )));
            }
        }
        if let Some(line) = &self.signal.stop_line {
            if line.length() <= 0.0 {
                return Err(config_error("signal stop_line must have non-zero length"));
            }
        }
        for phase in &self.signal.red_phases {
            if phase.start_s < 0.0 || phase.start_s >= phase.end_s {
                return Err(config_error(format!(
                    "signal red phase [{}, {}) must satisfy 0 <= start < end",
                    phase.start_s, phase.end_s
                )));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        config_error(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| config_error(format!("invalid config file {}: {}", path.display(), e)))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn config_error(message: impl Into<String>) -> anyhow::Error {
    anyhow!(PipelineError::new(
        ErrorKind::Configuration,
        PipelineStage::Opening,
        message
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_snapshots, 5);
        assert_eq!(cfg.confidence_threshold, 0.5);
        assert_eq!(cfg.containment_tolerance_px, 40);
        assert_eq!(cfg.output_root, PathBuf::from("output"));
        assert_eq!(cfg.snapshot_root, PathBuf::from("snapshots"));
        assert_eq!(cfg.snapshot_layout, SnapshotLayout::Partitioned);
        assert_eq!(cfg.on_quota_exhausted, OnQuotaExhausted::Continue);
        assert_eq!(cfg.triple.min_riders, 3);
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_toml_zone_geometry() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            max_snapshots = 2
            on_quota_exhausted = "stop"
            snapshot_layout = "flat"

            [video]
            encoder = "jpeg-sequence"

            [lane]
            restricted_zones = [[[0, 0], [100, 0], [100, 50]]]

            [signal]
            stop_line = { start = [0, 300], end = [640, 300] }
            red_phases = [{ start_s = 2.0, end_s = 8.5 }]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_snapshots, 2);
        assert_eq!(cfg.on_quota_exhausted, OnQuotaExhausted::Stop);
        assert_eq!(cfg.snapshot_layout, SnapshotLayout::Flat);
        assert_eq!(cfg.video.encoder, VideoEncoder::JpegSequence);
        assert_eq!(cfg.lane.restricted_zones.len(), 1);
        assert!(cfg.signal.red_phases[0].contains(3.0));
        assert!(!cfg.signal.red_phases[0].contains(8.5));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = PipelineConfig::from_toml_str("confidence_threshold = 1.5").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Configuration));
    }

    #[test]
    fn rejects_inverted_red_phase() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [signal]
            red_phases = [{ start_s = 5.0, end_s = 1.0 }]
            "#,
        )
        .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Configuration));
    }

    #[test]
    fn choices_parse_from_kebab_case() {
        assert_eq!(
            "jpeg-sequence".parse::<VideoEncoder>().unwrap(),
            VideoEncoder::JpegSequence
        );
        assert_eq!(
            "stop".parse::<OnQuotaExhausted>().unwrap(),
            OnQuotaExhausted::Stop
        );
        assert!("sometimes".parse::<OnQuotaExhausted>().is_err());
    }
}
