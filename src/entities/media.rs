//! Decoded media payloads: images, video/audio frames and file info.
//!
//! Pixel precision depends on the source:
//! - 8-bit movies and PNG/JPEG: `PixelBuffer::U8`
//! - EXR HALF: `PixelBuffer::F16`
//! - EXR FLOAT and composited output: `PixelBuffer::F32`
//!
//! All buffers are RGBA, row-major, top row first. Decoded frames are shared
//! read-only (`Arc<Image>`) once they enter the cache.

use half::f16 as F16;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::audio::{AudioBuffer, AudioInfo};
use super::time::{RationalTime, TimeRange};

/// Pixel storage, RGBA interleaved.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    F16(Vec<F16>),
    F32(Vec<f32>),
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8,
    RgbaF16,
    RgbaF32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::RgbaF16 => 8,
            PixelFormat::RgbaF32 => 16,
        }
    }
}

/// Decoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: PixelBuffer,
}

impl Image {
    /// Build an image; returns `None` when the buffer length does not match.
    pub fn new(width: usize, height: usize, pixels: PixelBuffer) -> Option<Self> {
        let len = match &pixels {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F16(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
        };
        if len != width * height * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Solid F32 image.
    pub fn filled(width: usize, height: usize, rgba: [f32; 4]) -> Self {
        let mut buf = Vec::with_capacity(width * height * 4);
        for _ in 0..width * height {
            buf.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels: PixelBuffer::F32(buf),
        }
    }

    /// Solid 8-bit image.
    pub fn filled_u8(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let mut buf = vec![0u8; width * height * 4];
        for px in buf.chunks_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels: PixelBuffer::U8(buf),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn format(&self) -> PixelFormat {
        match self.pixels {
            PixelBuffer::U8(_) => PixelFormat::Rgba8,
            PixelBuffer::F16(_) => PixelFormat::RgbaF16,
            PixelBuffer::F32(_) => PixelFormat::RgbaF32,
        }
    }

    /// Memory footprint used as cache weight.
    pub fn byte_size(&self) -> usize {
        self.width * self.height * self.format().bytes_per_pixel()
    }

    /// Pixel at `(x, y)` as normalized f32 RGBA.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 4] {
        let i = (y * self.width + x) * 4;
        match &self.pixels {
            PixelBuffer::U8(v) => [
                v[i] as f32 / 255.0,
                v[i + 1] as f32 / 255.0,
                v[i + 2] as f32 / 255.0,
                v[i + 3] as f32 / 255.0,
            ],
            PixelBuffer::F16(v) => [
                v[i].to_f32(),
                v[i + 1].to_f32(),
                v[i + 2].to_f32(),
                v[i + 3].to_f32(),
            ],
            PixelBuffer::F32(v) => [v[i], v[i + 1], v[i + 2], v[i + 3]],
        }
    }
}

/// Image layer description inside a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub name: String,
    pub width: usize,
    pub height: usize,
}

/// File information reported by a reader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    pub video: Vec<ImageInfo>,
    pub video_time: TimeRange,
    pub audio: Option<AudioInfo>,
    pub audio_time: TimeRange,
    pub tags: BTreeMap<String, String>,
}

impl Info {
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_none()
    }
}

/// Format options passed through to decoders (e.g. `"exr/channels" = "RGBA"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReadOptions(BTreeMap<String, String>);

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One decoded video frame. An empty frame (`image == None`) means the
/// request was cancelled or the decode failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoData {
    pub time: RationalTime,
    pub layer: u16,
    pub image: Option<Arc<Image>>,
    pub tags: BTreeMap<String, String>,
}

impl VideoData {
    pub fn new(time: RationalTime, layer: u16, image: Image) -> Self {
        Self {
            time,
            layer,
            image: Some(Arc::new(image)),
            tags: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_none()
    }

    pub fn byte_size(&self) -> usize {
        self.image.as_ref().map(|i| i.byte_size()).unwrap_or(0)
    }
}

/// One second of decoded audio (`seconds` is the media-time second index).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioData {
    pub seconds: i64,
    pub audio: Option<Arc<AudioBuffer>>,
}

impl AudioData {
    pub fn new(seconds: i64, audio: AudioBuffer) -> Self {
        Self {
            seconds,
            audio: Some(Arc::new(audio)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none()
    }

    pub fn byte_size(&self) -> usize {
        self.audio.as_ref().map(|a| a.byte_size()).unwrap_or(0)
    }
}
