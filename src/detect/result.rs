/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Build from float corner coordinates, rounding outward to whole pixels.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let left = x1.min(x2).floor();
        let top = y1.min(y2).floor();
        let right = x1.max(x2).ceil();
        let bottom = y1.max(y2).ceil();
        Self {
            left: left as i32,
            top: top as i32,
            width: (right - left).max(0.0) as u32,
            height: (bottom - top).max(0.0) as u32,
        }
    }

    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Self) -> f32 {
        let left = self.left.max(other.left) as i64;
        let top = self.top.max(other.top) as i64;
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return 0.0;
        }
        let intersection = ((right - left) * (bottom - top)) as f64;
        let union = self.area() as f64 + other.area() as f64 - intersection;
        if union <= 0.0 {
            0.0
        } else {
            (intersection / union) as f32
        }
    }
}

/// One labeled, scored box produced by the detector for a single frame.
///
/// Detections are immutable once returned: fields are only readable.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    label: String,
    confidence: f32,
    bounding_box: BoundingBox,
}

impl Detection {
    /// Confidence is clamped into `[0, 1]`; NaN becomes 0.
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: BoundingBox) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            label: label.into(),
            confidence,
            bounding_box,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }
}

/// Greedy non-maximum suppression, applied per label.
///
/// Keeps the highest-confidence detection of each overlapping group whose IoU
/// exceeds `iou_threshold`. Output is ordered by descending confidence.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let mut drop = false;
        for prev in 0..kept {
            let (a, b) = (&detections[prev], &detections[index]);
            if a.label == b.label && a.bounding_box.iou(&b.bounding_box) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
