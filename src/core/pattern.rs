//! Synthetic media source.
//!
//! `PatternDecoderFactory` opens any path and produces solid frames that
//! encode their own frame number, plus a tone (or constant level) for audio.
//! Used by the headless runner and throughout the tests; real codecs plug
//! in through the same `DecoderFactory` trait.

use crossbeam_channel::Receiver;
use std::collections::HashSet;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::reader::{DecodeError, DecoderFactory, MediaDecoder, OpenError};
use crate::entities::{
    AudioBuffer, AudioInfo, Image, ImageInfo, Info, Path, RationalTime, ReadOptions, SampleType, TimeRange,
};

/// Shape of the generated media.
#[derive(Clone, Debug)]
pub struct PatternMedia {
    pub width: usize,
    pub height: usize,
    pub rate: f64,
    pub first_frame: i64,
    pub frames: i64,
    pub audio: Option<AudioInfo>,
    /// Tone frequency; 0 gives a constant level.
    pub tone_hz: f32,
    pub amplitude: f32,
    /// Simulated decode latency.
    pub delay: Duration,
}

impl Default for PatternMedia {
    fn default() -> Self {
        Self {
            width: 8,
            height: 4,
            rate: 24.0,
            first_frame: 0,
            frames: 240,
            audio: Some(AudioInfo::new(2, 48000, SampleType::F32)),
            tone_hz: 440.0,
            amplitude: 0.25,
            delay: Duration::ZERO,
        }
    }
}

struct Inner {
    media: PatternMedia,
    gate: Option<Receiver<()>>,
    panic_frame: Option<i64>,
    video_decodes: AtomicUsize,
    audio_decodes: AtomicUsize,
}

/// Factory for `PatternDecoder`s.
pub struct PatternDecoderFactory {
    inner: Arc<Inner>,
    missing: HashSet<String>,
}

impl PatternDecoderFactory {
    pub fn new(media: PatternMedia) -> Self {
        Self {
            inner: Arc::new(Inner {
                media,
                gate: None,
                panic_frame: None,
                video_decodes: AtomicUsize::new(0),
                audio_decodes: AtomicUsize::new(0),
            }),
            missing: HashSet::new(),
        }
    }

    fn inner_mut(&mut self) -> Option<&mut Inner> {
        Arc::get_mut(&mut self.inner)
    }

    /// Paths that fail to open.
    pub fn with_missing(mut self, path: &str) -> Self {
        self.missing.insert(Path::new(path).to_string());
        self
    }

    /// Every video decode waits for one token from `gate`.
    pub fn with_gate(mut self, gate: Receiver<()>) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.gate = Some(gate);
        }
        self
    }

    /// Decoding this frame panics.
    pub fn with_panic_frame(mut self, frame: i64) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.panic_frame = Some(frame);
        }
        self
    }

    pub fn media(&self) -> &PatternMedia {
        &self.inner.media
    }

    pub fn video_decodes(&self) -> usize {
        self.inner.video_decodes.load(Ordering::SeqCst)
    }

    pub fn audio_decodes(&self) -> usize {
        self.inner.audio_decodes.load(Ordering::SeqCst)
    }

    /// Recover the frame number encoded in a pattern image.
    pub fn frame_of(image: &Image) -> i64 {
        let px = image.pixel(0, 0);
        let lo = (px[0] * 255.0).round() as i64;
        let hi = (px[1] * 255.0).round() as i64;
        hi * 256 + lo
    }

    /// Per-path tint stored in the blue channel.
    fn tint(path: &str) -> u8 {
        path.bytes().fold(0u8, |acc, b| acc.wrapping_add(b))
    }
}

impl DecoderFactory for PatternDecoderFactory {
    fn open(&self, path: &Path, _options: &ReadOptions) -> Result<Arc<dyn MediaDecoder>, OpenError> {
        let name = path.to_string();
        if self.missing.contains(&name) {
            return Err(OpenError::NotFound(name));
        }
        Ok(Arc::new(PatternDecoder {
            tint: Self::tint(&name),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct PatternDecoder {
    tint: u8,
    inner: Arc<Inner>,
}

impl MediaDecoder for PatternDecoder {
    fn info(&self) -> Result<Info, DecodeError> {
        let media = &self.inner.media;
        let video_time = TimeRange::from_frames(media.first_frame, media.first_frame + media.frames - 1, media.rate);
        let audio_time = match media.audio {
            Some(audio) => TimeRange::new(
                RationalTime::new(0.0, audio.sample_rate as f64),
                video_time.duration().rescaled_to(audio.sample_rate as f64),
            ),
            None => TimeRange::default(),
        };
        Ok(Info {
            video: vec![ImageInfo {
                name: "rgba".to_string(),
                width: media.width,
                height: media.height,
            }],
            video_time,
            audio: media.audio,
            audio_time,
            tags: Default::default(),
        })
    }

    fn decode_video(&self, time: RationalTime, layer: u16, _options: &ReadOptions) -> Result<Image, DecodeError> {
        let inner = &self.inner;
        if let Some(gate) = &inner.gate {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        if !inner.media.delay.is_zero() {
            thread::sleep(inner.media.delay);
        }
        inner.video_decodes.fetch_add(1, Ordering::SeqCst);

        let media = &inner.media;
        if layer > 0 {
            return Err(DecodeError::InvalidLayer(layer));
        }
        let frame = time.to_frames_at(media.rate);
        if frame < media.first_frame || frame >= media.first_frame + media.frames {
            return Err(DecodeError::OutOfRange(time.to_string()));
        }
        if inner.panic_frame == Some(frame) {
            panic!("pattern decoder: frame {} is poisoned", frame);
        }
        Ok(Image::filled_u8(
            media.width,
            media.height,
            [(frame % 256) as u8, ((frame / 256) % 256) as u8, self.tint, 255],
        ))
    }

    fn decode_audio(&self, seconds: i64) -> Result<AudioBuffer, DecodeError> {
        let media = &self.inner.media;
        let Some(info) = media.audio else {
            return Err(DecodeError::NoAudio);
        };
        let duration = media.frames as f64 / media.rate;
        if seconds < 0 || seconds as f64 >= duration {
            return Err(DecodeError::OutOfRange(format!("{}s", seconds)));
        }
        self.inner.audio_decodes.fetch_add(1, Ordering::SeqCst);

        let rate = info.sample_rate as usize;
        let channels = info.channels as usize;
        let mut samples = Vec::with_capacity(rate * channels);
        for i in 0..rate {
            let value = if media.tone_hz > 0.0 {
                let t = (seconds as f64 + i as f64 / rate as f64) as f32;
                media.amplitude * (TAU * media.tone_hz * t).sin()
            } else {
                media.amplitude
            };
            samples.extend(std::iter::repeat_n(value, channels));
        }
        Ok(AudioBuffer::from_f32(info.channels, info.sample_rate, samples).convert(info.sample_type))
    }
}
