//! Timeline compositor - turns the tracks at one time into ordered output layers.
//!
//! `Compositor::compose()` is a pure function of (timeline, time, compare
//! options, frame source): the same inputs always give the same
//! `CompositeFrame`. The GPU layer draws the layers as-is; `CpuCompositor`
//! flattens them in software.
//!
//! Video track 0 is the "A" source, track 1 the "B" source. Layout modes
//! (Horizontal/Vertical/Tile) show every track.

use glam::Vec2;
use log::{debug, trace};
use rayon::prelude::*;
use std::sync::Arc;

use super::compare::{boxes_size, compare_boxes, CompareMode, CompareOptions, Rect};
use super::media::{Image, PixelBuffer};
use super::time::RationalTime;
use super::timeline::{Clip, Timeline};

/// Read-only access to decoded frames.
pub trait FrameSource {
    fn image(&self, clip: &Clip, media_time: RationalTime) -> Option<Arc<Image>>;
}

/// How an output layer combines with what is below it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LayerBlend {
    Normal,
    Difference,
    /// Drawn only on the positive side of the line through `center`
    /// (normalized) rotated by `rotation` degrees.
    Wipe { center: Vec2, rotation: f32 },
}

/// One drawable layer of the output.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputLayer {
    pub image: Arc<Image>,
    pub rect: Rect,
    pub blend: LayerBlend,
    pub opacity: f32,
}

/// Output of one compositor pass, layers ordered bottom to top.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositeFrame {
    pub time: RationalTime,
    pub size: (usize, usize),
    pub layers: Vec<OutputLayer>,
    /// False when at least one needed frame was not available.
    pub complete: bool,
}

impl CompositeFrame {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Frames of one track: (image, opacity), bottom first.
type TrackLayers = Vec<(Arc<Image>, f32)>;

#[derive(Clone, Debug, Default)]
pub struct Compositor;

impl Compositor {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        timeline: &Timeline,
        time: RationalTime,
        compare: &CompareOptions,
        source: &dyn FrameSource,
    ) -> CompositeFrame {
        let mut complete = true;
        let mut tracks: Vec<TrackLayers> = Vec::new();

        for sample in timeline.video_samples(time) {
            let mut layers = TrackLayers::new();
            for (i, clip_sample) in sample.clips.iter().enumerate() {
                let Some(clip) = timeline.clip(clip_sample.clip) else {
                    continue;
                };
                match source.image(clip, clip_sample.media_time) {
                    Some(image) => {
                        // Dissolve: the incoming clip is drawn over the outgoing one.
                        let opacity = if i == 0 { 1.0 } else { clip_sample.weight };
                        layers.push((image, opacity));
                    }
                    None => {
                        trace!("Missing frame {} @ {}", clip.path, clip_sample.media_time);
                        complete = false;
                    }
                }
            }
            tracks.push(layers);
        }

        let mut frame = match compare.mode {
            CompareMode::A => Self::single(tracks.first()),
            CompareMode::B => Self::single(tracks.get(1).or(tracks.first())),
            CompareMode::Wipe => Self::pair(
                &tracks,
                LayerBlend::Wipe {
                    center: compare.wipe_center,
                    rotation: compare.wipe_rotation,
                },
                1.0,
            ),
            CompareMode::Overlay => Self::pair(&tracks, LayerBlend::Normal, compare.overlay_alpha()),
            CompareMode::Difference => Self::pair(&tracks, LayerBlend::Difference, 1.0),
            CompareMode::Horizontal | CompareMode::Vertical | CompareMode::Tile => {
                Self::layout(compare.mode, &tracks)
            }
        };
        frame.time = time;
        frame.complete = complete;
        frame
    }

    fn track_size(layers: &TrackLayers) -> Option<(usize, usize)> {
        layers.first().map(|(img, _)| img.size())
    }

    fn push_track(out: &mut Vec<OutputLayer>, layers: &TrackLayers, rect: Rect, blend: LayerBlend, opacity: f32) {
        for (image, layer_opacity) in layers {
            out.push(OutputLayer {
                image: Arc::clone(image),
                rect,
                blend,
                opacity: layer_opacity * opacity,
            });
        }
    }

    fn single(track: Option<&TrackLayers>) -> CompositeFrame {
        let mut frame = CompositeFrame::default();
        if let Some(layers) = track {
            if let Some(size) = Self::track_size(layers) {
                let rect = Rect::new(0.0, 0.0, size.0 as f32, size.1 as f32);
                Self::push_track(&mut frame.layers, layers, rect, LayerBlend::Normal, 1.0);
                frame.size = size;
            }
        }
        frame
    }

    /// A at full opacity, B blended on top.
    fn pair(tracks: &[TrackLayers], blend: LayerBlend, opacity: f32) -> CompositeFrame {
        let mut frame = Self::single(tracks.first());
        let Some(b) = tracks.get(1) else {
            return frame;
        };
        let Some(b_size) = Self::track_size(b) else {
            return frame;
        };
        if frame.size == (0, 0) {
            frame.size = b_size;
        }
        let rect = Rect::new(0.0, 0.0, frame.size.0 as f32, frame.size.1 as f32);
        match blend {
            LayerBlend::Difference => {
                // Difference needs one flattened B, dissolves inside B are pre-mixed.
                let flat = if b.len() == 1 {
                    Arc::clone(&b[0].0)
                } else {
                    let mut inner = Vec::new();
                    let b_rect = Rect::new(0.0, 0.0, b_size.0 as f32, b_size.1 as f32);
                    Self::push_track(&mut inner, b, b_rect, LayerBlend::Normal, 1.0);
                    Arc::new(CpuCompositor::flatten_layers(&inner, b_size))
                };
                frame.layers.push(OutputLayer {
                    image: flat,
                    rect,
                    blend,
                    opacity,
                });
            }
            _ => Self::push_track(&mut frame.layers, b, rect, blend, opacity),
        }
        frame
    }

    fn layout(mode: CompareMode, tracks: &[TrackLayers]) -> CompositeFrame {
        let visible: Vec<&TrackLayers> = tracks.iter().filter(|t| !t.is_empty()).collect();
        let sizes: Vec<(usize, usize)> = visible
            .iter()
            .filter_map(|t| Self::track_size(t))
            .collect();
        let boxes = compare_boxes(mode, &sizes);
        let mut frame = CompositeFrame {
            size: boxes_size(&boxes),
            ..Default::default()
        };
        for (layers, rect) in visible.iter().zip(boxes) {
            Self::push_track(&mut frame.layers, layers, rect, LayerBlend::Normal, 1.0);
        }
        frame
    }
}

/// Software renderer for `CompositeFrame`.
#[derive(Clone, Debug, Default)]
pub struct CpuCompositor;

impl CpuCompositor {
    /// Render all layers into one F32 RGBA image.
    pub fn flatten(frame: &CompositeFrame) -> Image {
        debug!(
            "CpuCompositor::flatten() {} layers into {}x{}",
            frame.layers.len(),
            frame.size.0,
            frame.size.1
        );
        Self::flatten_layers(&frame.layers, frame.size)
    }

    fn flatten_layers(layers: &[OutputLayer], size: (usize, usize)) -> Image {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Image::filled(0, 0, [0.0; 4]);
        }
        let mut out = vec![0.0f32; width * height * 4];

        out.par_chunks_mut(width * 4).enumerate().for_each(|(y, row)| {
            for x in 0..width {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let mut dst = [0.0f32; 4];
                for layer in layers {
                    if !layer.rect.contains(p) || layer.rect.width <= 0.0 || layer.rect.height <= 0.0 {
                        continue;
                    }
                    let local = Vec2::new(
                        (p.x - layer.rect.x) / layer.rect.width,
                        (p.y - layer.rect.y) / layer.rect.height,
                    );
                    let img = &layer.image;
                    if img.width() == 0 || img.height() == 0 {
                        continue;
                    }
                    let sx = ((local.x * img.width() as f32) as usize).min(img.width() - 1);
                    let sy = ((local.y * img.height() as f32) as usize).min(img.height() - 1);
                    let src = img.pixel(sx, sy);

                    match layer.blend {
                        LayerBlend::Normal => over(&mut dst, &src, layer.opacity),
                        LayerBlend::Difference => {
                            for c in 0..3 {
                                let diff = (dst[c] - src[c]).abs();
                                dst[c] = dst[c] + (diff - dst[c]) * layer.opacity;
                            }
                            dst[3] = dst[3].max(src[3]);
                        }
                        LayerBlend::Wipe { center, rotation } => {
                            let radians = rotation.to_radians();
                            let dir = Vec2::new(radians.cos(), radians.sin());
                            if (local - center).dot(dir) >= 0.0 {
                                over(&mut dst, &src, layer.opacity);
                            }
                        }
                    }
                }
                row[x * 4..x * 4 + 4].copy_from_slice(&dst);
            }
        });

        Image::new(width, height, PixelBuffer::F32(out)).unwrap_or_else(|| Image::filled(width, height, [0.0; 4]))
    }
}

/// Alpha "over" with extra opacity.
#[inline]
fn over(dst: &mut [f32; 4], src: &[f32; 4], opacity: f32) {
    let a = src[3] * opacity;
    let inv = 1.0 - a;
    for c in 0..3 {
        dst[c] = src[c] * a + dst[c] * inv;
    }
    dst[3] = a + dst[3] * inv;
}
