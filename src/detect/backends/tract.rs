#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, ObjectClass};
use crate::frame::Frame;

const NMS_IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single `[1, 4 + classes, anchors]` output with `cx, cy, w, h` rows
/// followed by per-class scores, COCO class order. Frames are letterboxed to the
/// square model input and boxes are mapped back to frame coordinates.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_floor: f32,
    helmet_class: Option<usize>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_floor: 0.25,
            helmet_class: None,
        })
    }

    /// Drop raw detections below this score before NMS.
    pub fn with_confidence_floor(mut self, floor: f32) -> Self {
        self.confidence_floor = floor;
        self
    }

    /// Class index a custom model uses for helmets.
    pub fn with_helmet_class(mut self, class: Option<usize>) -> Self {
        self.helmet_class = class;
        self
    }

    fn map_class(&self, class: usize) -> ObjectClass {
        if self.helmet_class == Some(class) {
            return ObjectClass::Helmet;
        }
        match class {
            0 => ObjectClass::Person,
            3 => ObjectClass::Motorcycle,
            2 | 5 | 7 => ObjectClass::Vehicle,
            9 => ObjectClass::TrafficLight,
            _ => ObjectClass::Other,
        }
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has zero size"));
        }
        let size = self.input_size;
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        let pad_x = (size - scaled_w) / 2;
        let pad_y = (size - scaled_h) / 2;

        let resized = imageops::resize(
            frame.image(),
            scaled_w,
            scaled_h,
            imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(size, size, LETTERBOX_FILL);
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: Letterbox,
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let rows = shape[1];
        let anchors = shape[2];

        let mut detections = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..rows - 4 {
                let score = view[[0, 4 + class, i]];
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            if best_score < self.confidence_floor {
                continue;
            }
            let label = self.map_class(best_class);
            if label == ObjectClass::Other {
                continue;
            }

            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let w = view[[0, 2, i]];
            let h = view[[0, 3, i]];
            let bbox = BoundingBox::new(
                (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale,
                (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale,
                (cx + w / 2.0 - letterbox.pad_x) / letterbox.scale,
                (cy + h / 2.0 - letterbox.pad_y) / letterbox.scale,
            )
            .clamped(width, height);

            detections.push(Detection::new(label, bbox, best_score.min(1.0)));
        }

        Ok(nms(detections, NMS_IOU_THRESHOLD))
    }
}

#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, letterbox, frame.width(), frame.height())
    }
}

/// Per-class greedy non-maximum suppression, highest confidence first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|kept| kept.label == det.label && kept.bbox.iou(&det.bbox) >= iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}
