use serde::{Deserialize, Serialize};

/// Object classes the pipeline reasons about. Anything else maps to `Other`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Person,
    Motorcycle,
    Vehicle,
    Helmet,
    TrafficLight,
    #[serde(other)]
    Other,
}

impl ObjectClass {
    pub fn name(self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Motorcycle => "motorcycle",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::Helmet => "helmet",
            ObjectClass::TrafficLight => "traffic light",
            ObjectClass::Other => "object",
        }
    }

    /// Road users that can commit lane or signal violations.
    pub fn is_road_vehicle(self) -> bool {
        matches!(self, ObjectClass::Motorcycle | ObjectClass::Vehicle)
    }
}

/// Axis-aligned box in frame pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Ground contact point of an upright object.
    pub fn bottom_center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, self.y2)
    }

    pub fn contains_point(&self, (x, y): (f32, f32)) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Clamp to `[0, width) x [0, height)`.
    pub fn clamped(&self, width: u32, height: u32) -> BoundingBox {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        BoundingBox {
            x1: self.x1.clamp(0.0, max_x),
            y1: self.y1.clamp(0.0, max_y),
            x2: self.x2.clamp(0.0, max_x),
            y2: self.y2.clamp(0.0, max_y),
        }
    }
}

/// One labeled box returned by a detector. Never mutated after creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub label: ObjectClass,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: ObjectClass, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            label,
            bbox,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((b.iou(&b) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn half_overlap_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn clamped_stays_inside_frame() {
        let b = BoundingBox::new(-5.0, -1.0, 700.0, 500.0).clamped(640, 480);
        assert_eq!(b, BoundingBox::new(0.0, 0.0, 639.0, 479.0));
    }

    #[test]
    fn detection_round_trips_through_json_labels() {
        let json = r#"{"label":"motorcycle","bbox":{"x1":0,"y1":0,"x2":100,"y2":100},"confidence":0.8}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.label, ObjectClass::Motorcycle);
        assert_eq!(det.bbox.x2, 100.0);
    }
}
