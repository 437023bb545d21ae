//! A/B compare options and spatial layouts.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// How two (or more) sources are presented together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareMode {
    #[default]
    A,
    B,
    Wipe,
    Overlay,
    Difference,
    Horizontal,
    Vertical,
    Tile,
}

impl CompareMode {
    /// Modes that show every source side by side instead of blending.
    pub fn is_layout(&self) -> bool {
        matches!(self, CompareMode::Horizontal | CompareMode::Vertical | CompareMode::Tile)
    }
}

/// Per-layer blend descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    pub mode: CompareMode,
    /// Wipe pivot in normalized image coordinates.
    pub wipe_center: Vec2,
    /// Wipe line rotation in degrees.
    pub wipe_rotation: f32,
    /// Overlay opacity of B over A, `0.0..=1.0`.
    pub overlay: f32,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::A,
            wipe_center: Vec2::new(0.5, 0.5),
            wipe_rotation: 0.0,
            overlay: 0.5,
        }
    }
}

impl CompareOptions {
    pub fn with_mode(mode: CompareMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Overlay alpha clamped to `[0, 1]`.
    pub fn overlay_alpha(&self) -> f32 {
        self.overlay.clamp(0.0, 1.0)
    }
}

/// Axis-aligned destination rectangle in output pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }
}

/// Destination rectangles for `sizes` under `mode`.
///
/// Blending modes stack every source at the origin; layout modes place them
/// left to right, top to bottom, or in a square-ish grid.
pub fn compare_boxes(mode: CompareMode, sizes: &[(usize, usize)]) -> Vec<Rect> {
    let mut out = Vec::with_capacity(sizes.len());
    match mode {
        CompareMode::Horizontal => {
            let mut x = 0.0;
            for &(w, h) in sizes {
                out.push(Rect::new(x, 0.0, w as f32, h as f32));
                x += w as f32;
            }
        }
        CompareMode::Vertical => {
            let mut y = 0.0;
            for &(w, h) in sizes {
                out.push(Rect::new(0.0, y, w as f32, h as f32));
                y += h as f32;
            }
        }
        CompareMode::Tile => {
            if sizes.is_empty() {
                return out;
            }
            let columns = (sizes.len() as f32).sqrt().ceil() as usize;
            let cell_w = sizes.iter().map(|s| s.0).max().unwrap_or(0) as f32;
            let cell_h = sizes.iter().map(|s| s.1).max().unwrap_or(0) as f32;
            for (i, &(w, h)) in sizes.iter().enumerate() {
                let col = (i % columns) as f32;
                let row = (i / columns) as f32;
                out.push(Rect::new(col * cell_w, row * cell_h, w as f32, h as f32));
            }
        }
        _ => {
            for &(w, h) in sizes {
                out.push(Rect::new(0.0, 0.0, w as f32, h as f32));
            }
        }
    }
    out
}

/// Bounding size of a set of boxes.
pub fn boxes_size(boxes: &[Rect]) -> (usize, usize) {
    let w = boxes.iter().map(|b| b.right()).fold(0.0f32, f32::max);
    let h = boxes.iter().map(|b| b.bottom()).fold(0.0f32, f32::max);
    (w.ceil() as usize, h.ceil() as usize)
}
