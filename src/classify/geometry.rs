//! Zone geometry shared by the lane and signal rules.

use serde::{Deserialize, Serialize};

pub type Point = (f32, f32);

/// Closed polygon in frame pixel coordinates. Vertices in drawing order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Polygon {
    pub vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    /// Even-odd ray casting. Points on an edge may land either way.
    pub fn contains(&self, (px, py): Point) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.vertices[i];
            let (xj, yj) = self.vertices[j];
            if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Directed segment, e.g. a stop line.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl LineSegment {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f32 {
        let dx = self.end.0 - self.start.0;
        let dy = self.end.1 - self.start.1;
        (dx * dx + dy * dy).sqrt()
    }

    /// Sign of the cross product: which side of the infinite line `point` is on.
    pub fn side(&self, point: Point) -> f32 {
        let (ax, ay) = self.start;
        let (bx, by) = self.end;
        (bx - ax) * (point.1 - ay) - (by - ay) * (point.0 - ax)
    }

    /// True when the motion `from -> to` crosses this segment.
    pub fn crossed_by(&self, from: Point, to: Point) -> bool {
        let s1 = self.side(from);
        let s2 = self.side(to);
        if s1 == 0.0 || s1.signum() == s2.signum() {
            return false;
        }
        // The motion must also straddle the segment itself, not just its extension.
        let motion = LineSegment::new(from, to);
        let m1 = motion.side(self.start);
        let m2 = motion.side(self.end);
        m1.signum() != m2.signum() || m1 == 0.0 || m2 == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::new(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)])
    }

    #[test]
    fn polygon_contains_interior_point() {
        assert!(square().contains((5.0, 5.0)));
        assert!(!square().contains((15.0, 5.0)));
        assert!(!square().contains((5.0, -1.0)));
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        let line = Polygon::new(vec![(0.0, 0.0), (10.0, 10.0)]);
        assert!(!line.contains((5.0, 5.0)));
    }

    #[test]
    fn crossing_requires_side_change_within_segment() {
        let stop = LineSegment::new((0.0, 50.0), (100.0, 50.0));
        assert!(stop.crossed_by((50.0, 60.0), (50.0, 40.0)));
        assert!(!stop.crossed_by((50.0, 60.0), (50.0, 55.0)));
        // Passes the line's extension, outside the segment.
        assert!(!stop.crossed_by((150.0, 60.0), (150.0, 40.0)));
    }

    #[test]
    fn polygon_deserializes_from_point_list() {
        let poly: Polygon = serde_json::from_str("[[0,0],[4,0],[4,4]]").unwrap();
        assert_eq!(poly.vertices.len(), 3);
        assert!(poly.contains((3.0, 1.0)));
    }
}
