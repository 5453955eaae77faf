//! Evidence capture under a per-run quota.
//!
//! A candidate becomes evidence only when the quota has room. Evidence is
//! one JPEG (written atomically) plus one store record; if either half fails
//! the other is rolled back, so a run never leaves an image without a record
//! or a record pointing at a missing image.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::classify::ViolationCandidate;
use crate::config::SnapshotLayout;
use crate::notify::ViolationNotifier;
use crate::storage::{NewViolation, ViolationEvent, ViolationStore};
use crate::ViolationCategory;

const JPEG_QUALITY: u8 = 90;

/// Per-run cap on evidence images. `written <= max` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotQuota {
    max: u32,
    written: u32,
}

impl SnapshotQuota {
    pub fn new(max: u32) -> Self {
        Self { max, written: 0 }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.written)
    }

    pub fn is_exhausted(&self) -> bool {
        self.written >= self.max
    }

    fn record(&mut self) {
        if self.written < self.max {
            self.written += 1;
        }
    }
}

#[derive(Debug)]
pub enum SnapshotOutcome {
    EvidenceWritten(ViolationEvent),
    /// Quota exhausted; nothing written.
    Suppressed,
    /// Image or record could not be written. Nothing durable remains.
    Failed(anyhow::Error),
}

/// Directory evidence for one run lands in.
pub fn evidence_dir(
    layout: SnapshotLayout,
    category: ViolationCategory,
    output_root: &Path,
    snapshot_root: &Path,
    started_at: &DateTime<Local>,
) -> PathBuf {
    match layout {
        SnapshotLayout::Partitioned => snapshot_root
            .join(category.slug())
            .join(started_at.format("%Y-%m-%d").to_string()),
        SnapshotLayout::Flat => output_root.join(format!("{}_violations", category.slug())),
    }
}

pub struct SnapshotManager {
    category: ViolationCategory,
    dir: PathBuf,
    quota: SnapshotQuota,
    store: Arc<dyn ViolationStore>,
    notifier: Arc<dyn ViolationNotifier>,
    video: Option<String>,
    started_at: DateTime<Local>,
    /// Frame of the last attempt and how many attempts it has had.
    frame_slot: Option<(u64, u32)>,
}

impl SnapshotManager {
    pub fn new(
        category: ViolationCategory,
        dir: PathBuf,
        max_snapshots: u32,
        store: Arc<dyn ViolationStore>,
        notifier: Arc<dyn ViolationNotifier>,
        video: Option<String>,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            category,
            dir,
            quota: SnapshotQuota::new(max_snapshots),
            store,
            notifier,
            video,
            started_at,
            frame_slot: None,
        }
    }

    /// Create the evidence directory.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create snapshot directory {}", self.dir.display())
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn quota(&self) -> SnapshotQuota {
        self.quota
    }

    pub fn consider(&mut self, candidate: &ViolationCandidate, image: &RgbImage) -> SnapshotOutcome {
        if self.quota.is_exhausted() {
            log::debug!(
                "frame {}: {} candidate suppressed, quota {} reached",
                candidate.frame_index,
                self.category,
                self.quota.max()
            );
            return SnapshotOutcome::Suppressed;
        }

        let path = self.next_free_path(candidate.evidence_frame);
        if let Err(err) = write_jpeg_atomic(&path, image) {
            log::warn!("snapshot write failed for {}: {:#}", path.display(), err);
            return SnapshotOutcome::Failed(err);
        }

        let record = NewViolation {
            category: self.category,
            timestamp: self.event_timestamp(candidate),
            image_path: Some(path.to_string_lossy().into_owned()),
            video: self.video.clone(),
        };
        let event = match self.store.append(&record) {
            Ok(event) => event,
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&path) {
                    log::warn!(
                        "failed to remove orphaned snapshot {}: {}",
                        path.display(),
                        remove_err
                    );
                }
                log::warn!("violation store append failed: {:#}", err);
                return SnapshotOutcome::Failed(err);
            }
        };

        self.quota.record();
        log::info!(
            "{} evidence #{} written: {} ({}/{})",
            self.category,
            event.id,
            path.display(),
            self.quota.written(),
            self.quota.max()
        );
        if let Err(err) = self.notifier.notify(&event) {
            log::warn!("violation notifier failed for #{}: {:#}", event.id, err);
        }
        SnapshotOutcome::EvidenceWritten(event)
    }

    /// First unused evidence path for `frame_index`. Earlier runs sharing the
    /// directory keep their files; this run takes the next `_n` suffix instead.
    fn next_free_path(&mut self, frame_index: u64) -> PathBuf {
        let mut attempt = match self.frame_slot {
            Some((frame, n)) if frame == frame_index => n,
            _ => 0,
        };
        loop {
            let path = self.dir.join(self.file_name(frame_index, attempt));
            attempt += 1;
            if !path.exists() {
                self.frame_slot = Some((frame_index, attempt));
                return path;
            }
        }
    }

    fn file_name(&self, frame_index: u64, attempt: u32) -> String {
        let slug = self.category.slug();
        if attempt == 0 {
            format!("{}_violation_{}.jpg", slug, frame_index)
        } else {
            format!("{}_violation_{}_{}.jpg", slug, frame_index, attempt)
        }
    }

    /// Run start wall-clock plus the candidate's offset into the video.
    fn event_timestamp(&self, candidate: &ViolationCandidate) -> String {
        let offset = chrono::Duration::from_std(candidate.timestamp)
            .unwrap_or_else(|_| chrono::Duration::zero());
        (self.started_at + offset).to_rfc3339()
    }
}

fn write_jpeg_atomic(path: &Path, image: &RgbImage) -> Result<()> {
    let mut data = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY))
        .context("failed to encode snapshot")?;

    let tmp_path = path.with_extension("jpg.tmp");
    let written = write_then_rename(&tmp_path, path, &data);
    if written.is_err() && tmp_path.exists() {
        if let Err(err) = fs::remove_file(&tmp_path) {
            log::warn!("failed to remove {}: {}", tmp_path.display(), err);
        }
    }
    written
}

fn write_then_rename(tmp_path: &Path, path: &Path, data: &[u8]) -> Result<()> {
    {
        let mut file = File::create(tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
        .with_context(|| format!("failed to move snapshot into {}", path.display()))?;
    Ok(())
}
