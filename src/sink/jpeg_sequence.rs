use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";
const JPEG_QUALITY: u8 = 90;

/// Written next to the frames when the sequence is closed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SequenceManifest {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
}

/// Output "video" as numbered JPEG files plus a manifest.
pub struct JpegSequenceWriter {
    dir: PathBuf,
    fps: f64,
    width: u32,
    height: u32,
    next_index: u64,
}

impl JpegSequenceWriter {
    /// Create (or replace) the frame directory.
    pub fn create(dir: &Path, fps: f64, width: u32, height: u32) -> Result<Self> {
        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("failed to clear previous output {}", dir.display()))?;
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create frame directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            fps,
            width,
            height,
            next_index: 0,
        })
    }

    pub fn write(&mut self, image: &RgbImage) -> Result<()> {
        let path = self.dir.join(format!("frame_{:06}.jpg", self.next_index));
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        image
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
            .with_context(|| format!("failed to encode {}", path.display()))?;
        out.flush()?;
        self.next_index += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        let manifest = SequenceManifest {
            fps: self.fps,
            width: self.width,
            height: self.height,
            frame_count: self.next_index,
        };
        let path = self.dir.join(MANIFEST_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&manifest)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

pub fn read_manifest(dir: &Path) -> Result<SequenceManifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(serde_json::from_slice(&raw)?)
}
