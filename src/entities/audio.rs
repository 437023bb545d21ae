//! PCM audio buffers.
//!
//! Samples are interleaved (`[L, R, L, R, ...]`). A buffer is created by a
//! decoder, moved into the cache behind an `Arc`, and read by the mixer; it is
//! never mutated after creation.

use serde::{Deserialize, Serialize};

/// Sample storage type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    I16,
    I32,
    #[default]
    F32,
}

impl SampleType {
    pub fn byte_count(&self) -> usize {
        match self {
            SampleType::I16 => 2,
            SampleType::I32 | SampleType::F32 => 4,
        }
    }
}

/// Audio format description.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_type: SampleType,
}

impl AudioInfo {
    pub fn new(channels: u16, sample_rate: u32, sample_type: SampleType) -> Self {
        Self {
            channels,
            sample_rate,
            sample_type,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.channels > 0 && self.sample_rate > 0
    }
}

/// Interleaved sample data.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleData {
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl SampleData {
    pub fn len(&self) -> usize {
        match self {
            SampleData::I16(v) => v.len(),
            SampleData::I32(v) => v.len(),
            SampleData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `index` normalized to `-1.0..=1.0`.
    #[inline]
    pub fn get_f32(&self, index: usize) -> f32 {
        match self {
            SampleData::I16(v) => v[index] as f32 / i16::MAX as f32,
            SampleData::I32(v) => v[index] as f32 / i32::MAX as f32,
            SampleData::F32(v) => v[index],
        }
    }
}

/// Fixed PCM chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    info: AudioInfo,
    data: SampleData,
}

impl AudioBuffer {
    /// Wrap interleaved samples; trailing partial frames are dropped.
    pub fn new(info: AudioInfo, data: SampleData) -> Self {
        let channels = info.channels.max(1) as usize;
        let whole = data.len() / channels * channels;
        let data = match data {
            SampleData::I16(mut v) => {
                v.truncate(whole);
                SampleData::I16(v)
            }
            SampleData::I32(mut v) => {
                v.truncate(whole);
                SampleData::I32(v)
            }
            SampleData::F32(mut v) => {
                v.truncate(whole);
                SampleData::F32(v)
            }
        };
        let info = AudioInfo {
            sample_type: match data {
                SampleData::I16(_) => SampleType::I16,
                SampleData::I32(_) => SampleType::I32,
                SampleData::F32(_) => SampleType::F32,
            },
            ..info
        };
        Self { info, data }
    }

    pub fn from_f32(channels: u16, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(
            AudioInfo::new(channels, sample_rate, SampleType::F32),
            SampleData::F32(samples),
        )
    }

    /// Zero-filled buffer of `frames` frames.
    pub fn silence(info: AudioInfo, frames: usize) -> Self {
        let len = frames * info.channels as usize;
        let data = match info.sample_type {
            SampleType::I16 => SampleData::I16(vec![0; len]),
            SampleType::I32 => SampleData::I32(vec![0; len]),
            SampleType::F32 => SampleData::F32(vec![0.0; len]),
        };
        Self { info, data }
    }

    pub fn info(&self) -> AudioInfo {
        self.info
    }

    pub fn data(&self) -> &SampleData {
        &self.data
    }

    pub fn frame_count(&self) -> usize {
        if self.info.channels == 0 {
            0
        } else {
            self.data.len() / self.info.channels as usize
        }
    }

    pub fn byte_size(&self) -> usize {
        self.data.len() * self.info.sample_type.byte_count()
    }

    /// Sample of `channel` at `frame`, normalized to f32.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.data
            .get_f32(frame * self.info.channels as usize + channel)
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match &self.data {
            SampleData::F32(v) => v.clone(),
            other => (0..other.len()).map(|i| other.get_f32(i)).collect(),
        }
    }

    /// Convert to another sample type (clamping on integer conversion).
    pub fn convert(&self, sample_type: SampleType) -> AudioBuffer {
        if sample_type == self.info.sample_type {
            return self.clone();
        }
        let samples = self.to_f32();
        let data = match sample_type {
            SampleType::F32 => SampleData::F32(samples),
            SampleType::I16 => SampleData::I16(
                samples
                    .iter()
                    .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect(),
            ),
            SampleType::I32 => SampleData::I32(
                samples
                    .iter()
                    .map(|s| (s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32)
                    .collect(),
            ),
        };
        AudioBuffer {
            info: AudioInfo {
                sample_type,
                ..self.info
            },
            data,
        }
    }
}
