//! Per-frame detection records.
//!

/// Axis-aligned box in frame pixel coordinates.
///
/// `(x, y)` is the top-left corner, the coordinate frame basis is the top-left
/// corner of the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from its top-left and bottom-right corners, clamped to a
    /// frame of `frame_width` x `frame_height` pixels.
    ///
    /// Swapped corners result in an empty box instead of a negative size.
    pub fn from_corners(
        x_tl: f32,
        y_tl: f32,
        x_br: f32,
        y_br: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let (max_x, max_y) = (frame_width as f32, frame_height as f32);
        let x_tl = x_tl.clamp(0.0, max_x);
        let y_tl = y_tl.clamp(0.0, max_y);
        let x_br = x_br.clamp(0.0, max_x);
        let y_br = y_br.clamp(0.0, max_y);

        Self {
            x: x_tl,
            y: y_tl,
            width: (x_br - x_tl).max(0.0),
            height: (y_br - y_tl).max(0.0),
        }
    }

    /// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`
    pub fn corners(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One detected object in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Class label, e.g. `person`.
    pub class: String,
    /// Confidence score in `0.0..=1.0`.
    pub score: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: impl Into<String>, score: f32, bbox: BoundingBox) -> Self {
        Self {
            class: class.into(),
            score,
            bbox,
        }
    }

    /// Label drawn next to the box: class name and confidence percentage with
    /// one decimal, e.g. `person (92.0%)`.
    pub fn label(&self) -> String {
        format!("{} ({:.1}%)", self.class, self.score * 100.0)
    }
}
