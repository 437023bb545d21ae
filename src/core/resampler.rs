//! Streaming audio resampler.
//!
//! Converts interleaved f32 at the mixer's input format to the device
//! format: channel layout first, then sample rate through
//! `rubato::FastFixedIn`. Input that does not fill a whole rubato chunk is
//! kept until the next call; `flush()` drops it and resets filter state.

use log::{debug, trace};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};

use super::audio_mixer::DeviceError;
use crate::entities::AudioInfo;

/// Input frames per rubato chunk.
const CHUNK_FRAMES: usize = 1024;

pub struct Resampler {
    input: AudioInfo,
    output: AudioInfo,
    /// `None` when the rates match.
    inner: Option<FastFixedIn<f32>>,
    /// Planar input waiting for a full chunk, already at output channels.
    pending: Vec<Vec<f32>>,
}

impl std::fmt::Debug for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("passthrough", &self.inner.is_none())
            .field("pending_frames", &self.pending_frames())
            .finish()
    }
}

impl Resampler {
    pub fn new(input: AudioInfo, output: AudioInfo) -> Result<Self, DeviceError> {
        if !input.is_valid() || !output.is_valid() {
            return Err(DeviceError::Unsupported(format!(
                "resample {}ch@{} -> {}ch@{}",
                input.channels, input.sample_rate, output.channels, output.sample_rate
            )));
        }
        let inner = if input.sample_rate == output.sample_rate {
            None
        } else {
            let ratio = output.sample_rate as f64 / input.sample_rate as f64;
            let resampler = FastFixedIn::<f32>::new(
                ratio,
                1.0,
                PolynomialDegree::Septic,
                CHUNK_FRAMES,
                output.channels as usize,
            )
            .map_err(|e| DeviceError::Unsupported(format!("resampler: {}", e)))?;
            Some(resampler)
        };
        debug!(
            "Resampler {}ch@{} -> {}ch@{}{}",
            input.channels,
            input.sample_rate,
            output.channels,
            output.sample_rate,
            if inner.is_none() { " (passthrough)" } else { "" }
        );
        Ok(Self {
            input,
            output,
            inner,
            pending: vec![Vec::new(); output.channels as usize],
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Input frames buffered but not yet resampled.
    pub fn pending_frames(&self) -> usize {
        self.pending.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Resample interleaved input; returns interleaved output (possibly empty
    /// while a chunk is filling).
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, DeviceError> {
        let converted = convert_channels(interleaved, self.input.channels as usize, self.output.channels as usize);
        let Some(inner) = self.inner.as_mut() else {
            return Ok(converted);
        };

        let channels = self.output.channels as usize;
        for frame in converted.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.pending[ch].push(*sample);
            }
        }

        let mut out = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map(|c| c.drain(..needed).collect()).collect();
            let planar = inner
                .process(&chunk, None)
                .map_err(|e| DeviceError::Backend(format!("resample: {}", e)))?;
            interleave_into(&planar, &mut out);
        }
        trace!(
            "Resampler: {} in -> {} out frames, {} pending",
            interleaved.len() / self.input.channels.max(1) as usize,
            out.len() / channels,
            self.pending_frames()
        );
        Ok(out)
    }

    /// Drop buffered input and filter history.
    pub fn flush(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
        for channel in &mut self.pending {
            channel.clear();
        }
    }
}

fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let Some(frames) = planar.first().map(|c| c.len()) else {
        return;
    };
    out.reserve(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
}

/// Remap interleaved channels.
///
/// Mono is copied to the first two outputs, stereo to mono is averaged,
/// otherwise shared channels are copied and extra outputs are zero.
pub fn convert_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut out = vec![0.0f32; frames * to];
    for (frame, dst) in samples.chunks_exact(from).zip(out.chunks_exact_mut(to)) {
        match (from, to) {
            (1, _) => {
                dst[0] = frame[0];
                dst[1] = frame[0];
            }
            (2, 1) => dst[0] = 0.5 * (frame[0] + frame[1]),
            _ => {
                let shared = from.min(to);
                dst[..shared].copy_from_slice(&frame[..shared]);
            }
        }
    }
    out
}
