use serde::{Deserialize, Serialize};

/// Axis-aligned box in integer pixel coordinates, `x1 <= x2`, `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Restricts the box to an image of `width` x `height` pixels.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as i32;
        let h = height as i32;
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    pub fn as_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// One located book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
}

/// Thresholds forwarded to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub conf: f32,
    pub iou: f32,
}

/// Orders detections left to right along the shelf, then top to bottom.
pub fn sort_reading_order(detections: &mut [Detection]) {
    detections.sort_by(|a, b| a.bbox.x1.cmp(&b.bbox.x1).then(a.bbox.y1.cmp(&b.bbox.y1)));
}
