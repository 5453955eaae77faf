//! Frame overlay: detection boxes, confidence labels and violation markers.

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::classify::ViolationCandidate;
use crate::detect::{BoundingBox, Detection, ObjectClass};
use crate::frame::Frame;

const VIOLATION_COLOR: Rgb<u8> = Rgb([220, 20, 20]);
const RELATED_COLOR: Rgb<u8> = Rgb([255, 140, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_SCALE: f32 = 16.0;
const BOX_THICKNESS: i32 = 2;
const MARKER_THICKNESS: i32 = 4;

const SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

fn class_color(label: ObjectClass) -> Rgb<u8> {
    match label {
        ObjectClass::Person => Rgb([0, 200, 0]),
        ObjectClass::Motorcycle => Rgb([0, 120, 255]),
        ObjectClass::Vehicle => Rgb([255, 200, 0]),
        ObjectClass::Helmet => Rgb([0, 220, 220]),
        ObjectClass::TrafficLight => Rgb([200, 0, 200]),
        ObjectClass::Other => Rgb([160, 160, 160]),
    }
}

/// Draws overlays onto copies of frames.
///
/// Text needs a TrueType font. Without one, labels are drawn as solid tag
/// bars so markers stay visible.
pub struct Annotator {
    font: Option<FontVec>,
    font_scale: f32,
}

impl Annotator {
    /// Use `font_path` when given and loadable, else the first system font found.
    pub fn new(font_path: Option<&Path>) -> Self {
        if let Some(path) = font_path {
            match load_font(path) {
                Some(font) => return Self::with_font(font),
                None => log::warn!("could not load font {}, trying system fonts", path.display()),
            }
        }
        for candidate in SYSTEM_FONTS {
            if let Some(font) = load_font(Path::new(candidate)) {
                log::debug!("overlay font: {}", candidate);
                return Self::with_font(font);
            }
        }
        log::debug!("no overlay font found, labels drawn without text");
        Self::without_font()
    }

    pub fn without_font() -> Self {
        Self {
            font: None,
            font_scale: LABEL_SCALE,
        }
    }

    fn with_font(font: FontVec) -> Self {
        Self {
            font: Some(font),
            font_scale: LABEL_SCALE,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Annotated copy of `frame`. The input frame is left untouched.
    pub fn annotate(
        &self,
        frame: &Frame,
        detections: &[Detection],
        candidates: &[ViolationCandidate],
        confidence_floor: f32,
    ) -> RgbImage {
        let mut canvas = frame.image().clone();

        for det in detections.iter().filter(|det| det.confidence >= confidence_floor) {
            let color = class_color(det.label);
            draw_box(&mut canvas, &det.bbox, color, BOX_THICKNESS);
            self.draw_label(
                &mut canvas,
                &det.bbox,
                &format!("{} {:.2}", det.label.name(), det.confidence),
                color,
            );
        }

        for candidate in candidates {
            if let Some(related) = &candidate.metadata.related {
                draw_box(&mut canvas, related, RELATED_COLOR, BOX_THICKNESS);
            }
            let subject = &candidate.metadata.subject;
            draw_box(&mut canvas, subject, VIOLATION_COLOR, MARKER_THICKNESS);
            self.draw_label(
                &mut canvas,
                subject,
                candidate.category.marker_label(),
                VIOLATION_COLOR,
            );
        }
        canvas
    }

    /// Tag bar above the box (inside it when the box touches the top edge).
    fn draw_label(&self, canvas: &mut RgbImage, anchor: &BoundingBox, text: &str, color: Rgb<u8>) {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let anchor = anchor.clamped(width, height);
        let bar_height = self.font_scale.ceil() as u32 + 4;
        let bar_width = match &self.font {
            Some(font) => text_width(font, self.font_scale, text).ceil() as u32 + 6,
            None => (text.chars().count() as u32 * 7).max(12),
        };
        let x = anchor.x1.round() as i32;
        let top = anchor.y1.round() as i32;
        let y = if top >= bar_height as i32 {
            top - bar_height as i32
        } else {
            top
        };

        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(bar_width, bar_height), color);
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x + 3,
                y + 2,
                PxScale::from(self.font_scale),
                font,
                text,
            );
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(None)
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = std::fs::read(path).ok()?;
    FontVec::try_from_vec(data).ok()
}

fn text_width(font: &FontVec, scale: f32, text: &str) -> f32 {
    let scaled = font.as_scaled(PxScale::from(scale));
    text.chars()
        .map(|ch| scaled.h_advance(scaled.glyph_id(ch)))
        .sum()
}

/// Hollow box of the given thickness, clipped to the canvas. Degenerate boxes are skipped.
fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i32) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let b = bbox.clamped(width, height);
    let x = b.x1.round() as i32;
    let y = b.y1.round() as i32;
    let w = (b.x2.round() as i32 - x).max(0) as u32;
    let h = (b.y2.round() as i32 - y).max(0) as u32;
    if w == 0 || h == 0 {
        return;
    }
    for t in 0..thickness {
        let rect = Rect::at(x - t, y - t).of_size(w + 2 * t as u32, h + 2 * t as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}
