//! Audio mixer, discontinuity detection and the audio device contract.
//!
//! The player pushes a small `AudioState` (playback, volume, layers with
//! their cached seconds). The device thread pulls `render_audio_samples()`:
//! it copies the state under the lock, then mixes and resamples outside it.
//!
//! Timing model: the mixer keeps its own sample position at the common
//! input rate. `reset(time)` re-anchors it; each reset is handled exactly
//! once (resampler flush + FIFO clear), so a seek never plays stale audio
//! and never repeats samples.

use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::player::Playback;
use super::resampler::Resampler;
use crate::entities::{AudioBuffer, AudioInfo, RationalTime, SampleType, TimeRange};

// ========== Errors & device contract ==========

/// Audio device errors. The mixer answers all of them with silence.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    NotFound(String),
    Unsupported(String),
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound(id) => write!(f, "Audio device not found: {}", id),
            DeviceError::Unsupported(msg) => write!(f, "Unsupported audio format: {}", msg),
            DeviceError::Backend(msg) => write!(f, "Audio backend error: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Output device description.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_type: SampleType,
}

impl DeviceInfo {
    pub fn audio_info(&self) -> AudioInfo {
        AudioInfo::new(self.channels, self.sample_rate, self.sample_type)
    }
}

/// Pull callback: fill the interleaved f32 buffer.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// An open output stream.
pub trait AudioDevice: Send {
    fn info(&self) -> &DeviceInfo;
    fn is_running(&self) -> bool;
    fn stop(&mut self);
}

/// Audio backend: enumerates devices and opens pull streams.
pub trait AudioSystem: Send + Sync {
    fn devices(&self) -> Vec<DeviceInfo>;
    fn default_device(&self) -> Option<DeviceInfo>;
    fn open(&self, device: &DeviceInfo, callback: RenderCallback) -> Result<Box<dyn AudioDevice>, DeviceError>;
}

/// Backend without hardware: a thread pulls audio at the device rate and
/// discards it. Keeps timing behaviour identical to a real device.
pub struct NullAudioSystem {
    devices: Vec<DeviceInfo>,
    period: Duration,
}

impl Default for NullAudioSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl NullAudioSystem {
    pub fn new() -> Self {
        Self {
            devices: vec![DeviceInfo {
                id: "null".to_string(),
                name: "Null Output".to_string(),
                channels: 2,
                sample_rate: 48000,
                sample_type: SampleType::F32,
            }],
            period: Duration::from_millis(10),
        }
    }

    /// System with no devices at all.
    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
            period: Duration::from_millis(10),
        }
    }
}

impl AudioSystem for NullAudioSystem {
    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn default_device(&self) -> Option<DeviceInfo> {
        self.devices.first().cloned()
    }

    fn open(&self, device: &DeviceInfo, mut callback: RenderCallback) -> Result<Box<dyn AudioDevice>, DeviceError> {
        if !self.devices.iter().any(|d| d.id == device.id) {
            return Err(DeviceError::NotFound(device.id.clone()));
        }
        if !device.audio_info().is_valid() {
            return Err(DeviceError::Unsupported(format!("{}ch@{}", device.channels, device.sample_rate)));
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let period = self.period;
        let frames = ((device.sample_rate as f64 * period.as_secs_f64()).round() as usize).max(1);
        let channels = device.channels as usize;
        let thread = thread::Builder::new()
            .name("playa-audio-null".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; frames * channels];
                while flag.load(Ordering::Acquire) {
                    callback(&mut buffer);
                    thread::sleep(period);
                }
            })
            .map_err(|e| DeviceError::Backend(format!("spawn audio thread: {}", e)))?;

        info!("Opened null audio device {} ({}ch@{})", device.id, device.channels, device.sample_rate);
        Ok(Box::new(NullAudioDevice {
            info: device.clone(),
            running,
            thread: Some(thread),
        }))
    }
}

struct NullAudioDevice {
    info: DeviceInfo,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioDevice for NullAudioDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            debug!("Null audio device {} stopped", self.info.id);
        }
    }
}

impl Drop for NullAudioDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

// ========== Discontinuity detection ==========

/// Tracks the frame the audio clock expects next; a jump of more than one
/// frame means the audio must be re-anchored.
#[derive(Debug, Default, Clone)]
pub struct DiscontinuityDetector {
    expected: Option<i64>,
}

impl DiscontinuityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `requested` to the expected frame and re-anchor on it.
    /// The first call always reports a discontinuity.
    pub fn check(&mut self, requested: i64) -> bool {
        let jump = match self.expected {
            Some(expected) => (requested - expected).abs() > 1,
            None => true,
        };
        self.expected = Some(requested);
        jump
    }

    /// Natural clock advance.
    pub fn advance(&mut self, frames: i64) {
        if let Some(expected) = self.expected.as_mut() {
            *expected += frames;
        }
    }

    pub fn reset(&mut self) {
        self.expected = None;
    }
}

// ========== Mixer ==========

/// One audio clip as seen by the mixer.
#[derive(Clone, Debug)]
pub struct AudioLayer {
    pub info: AudioInfo,
    pub gain: f32,
    /// Clip range in timeline time.
    pub range: TimeRange,
    /// Media time at `range.start()`.
    pub media_start: RationalTime,
    /// Cached whole media seconds.
    pub seconds: BTreeMap<i64, Arc<AudioBuffer>>,
}

/// State shared between the player and the device thread.
#[derive(Clone, Debug)]
pub struct AudioState {
    pub playback: Playback,
    pub speed: f64,
    pub volume: f32,
    pub muted: bool,
    /// Seconds added to the timeline time when anchoring.
    pub audio_offset: f64,
    pub current_time: RationalTime,
    pub layers: Vec<AudioLayer>,
    reset_serial: u64,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            playback: Playback::Stop,
            speed: 1.0,
            volume: 1.0,
            muted: false,
            audio_offset: 0.0,
            current_time: RationalTime::default(),
            layers: Vec::new(),
            reset_serial: 0,
        }
    }
}

struct Runtime {
    input: Option<AudioInfo>,
    resampler: Option<Resampler>,
    fifo: VecDeque<f32>,
    /// Next input frame, at the input rate.
    position: i64,
    seen_serial: u64,
}

pub struct AudioMixer {
    output: AudioInfo,
    state: Mutex<AudioState>,
    runtime: Mutex<Runtime>,
    device_ok: AtomicBool,
    flushes: AtomicU64,
}

impl fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioMixer")
            .field("output", &self.output)
            .field("device_ok", &self.device_ok.load(Ordering::Relaxed))
            .field("flushes", &self.flushes.load(Ordering::Relaxed))
            .finish()
    }
}

/// First layer's format; layers at another rate are not mixed.
fn common_input(layers: &[AudioLayer]) -> Option<AudioInfo> {
    layers.iter().map(|l| l.info).find(|i| i.is_valid()).map(|i| AudioInfo {
        sample_type: SampleType::F32,
        ..i
    })
}

/// Sum all layers over `frames` input frames starting at `position`.
fn mix_layers(layers: &[AudioLayer], input: AudioInfo, position: i64, frames: usize) -> Vec<f32> {
    let channels = input.channels as usize;
    let rate = input.sample_rate as i64;
    let mut mixed = vec![0.0f32; frames * channels];

    for layer in layers {
        if layer.gain <= 0.0 {
            continue;
        }
        if layer.info.sample_rate != input.sample_rate {
            trace!("Skipping audio layer at {} Hz (mixing at {})", layer.info.sample_rate, input.sample_rate);
            continue;
        }
        let to_samples = |t: RationalTime| (t.to_seconds() * rate as f64).round() as i64;
        let range_start = to_samples(layer.range.start());
        let range_end = to_samples(layer.range.end_time_exclusive());
        let media_start = to_samples(layer.media_start);

        let first = position.max(range_start);
        let last = (position + frames as i64).min(range_end);
        let mut t = first;
        while t < last {
            let media = media_start + (t - range_start);
            let second = media.div_euclid(rate);
            let offset = media.rem_euclid(rate) as usize;
            // Whole run inside this second
            let run = ((rate - offset as i64) as usize).min((last - t) as usize);
            if let Some(buffer) = layer.seconds.get(&second) {
                let src_channels = buffer.info().channels.max(1) as usize;
                let available = buffer.frame_count().saturating_sub(offset).min(run);
                let base = (t - position) as usize;
                for i in 0..available {
                    let dst = &mut mixed[(base + i) * channels..(base + i + 1) * channels];
                    for (ch, sample) in dst.iter_mut().enumerate() {
                        *sample += buffer.sample(offset + i, ch % src_channels) * layer.gain;
                    }
                }
            }
            t += run as i64;
        }
    }
    mixed
}

impl AudioMixer {
    pub fn new(output: AudioInfo) -> Self {
        Self {
            output,
            state: Mutex::new(AudioState::default()),
            runtime: Mutex::new(Runtime {
                input: None,
                resampler: None,
                fifo: VecDeque::new(),
                position: 0,
                seen_serial: 0,
            }),
            device_ok: AtomicBool::new(true),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> AudioState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Edit the shared state; the reset serial is preserved.
    pub fn update<F: FnOnce(&mut AudioState)>(&self, f: F) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let serial = state.reset_serial;
        f(&mut state);
        state.reset_serial = serial;
    }

    /// Re-anchor playback at `time`; handled once by the next render.
    pub fn reset(&self, time: RationalTime) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.current_time = time;
        state.reset_serial += 1;
        trace!("AudioMixer: reset to {} (serial {})", time, state.reset_serial);
    }

    /// Flag the device as failed (or recovered). Failed -> silence.
    pub fn set_device_ok(&self, ok: bool) {
        if self.device_ok.swap(ok, Ordering::AcqRel) != ok && !ok {
            warn!("AudioMixer: device error, output muted");
        }
    }

    pub fn device_ok(&self) -> bool {
        self.device_ok.load(Ordering::Acquire)
    }

    /// Resets handled so far.
    pub fn resampler_flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Render `frame_count` interleaved frames in the output format.
    pub fn render(&self, frame_count: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frame_count * self.output.channels as usize];
        self.render_audio_samples(&mut out);
        out
    }

    /// Device pull callback.
    pub fn render_audio_samples(&self, out: &mut [f32]) {
        out.fill(0.0);
        let state = self.state();
        let mut guard = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        let runtime = &mut *guard;

        let input = common_input(&state.layers).unwrap_or(AudioInfo::new(
            self.output.channels,
            self.output.sample_rate,
            SampleType::F32,
        ));
        if runtime.input != Some(input) || runtime.resampler.is_none() {
            match Resampler::new(input, self.output) {
                Ok(resampler) => {
                    if let Some(old) = runtime.input {
                        runtime.position = (runtime.position as f64 * input.sample_rate as f64
                            / old.sample_rate.max(1) as f64)
                            .round() as i64;
                    }
                    runtime.resampler = Some(resampler);
                    runtime.input = Some(input);
                    runtime.fifo.clear();
                }
                Err(e) => {
                    warn!("AudioMixer: {}", e);
                    runtime.resampler = None;
                    return;
                }
            }
        }

        if state.reset_serial != runtime.seen_serial {
            runtime.seen_serial = state.reset_serial;
            if let Some(resampler) = runtime.resampler.as_mut() {
                resampler.flush();
            }
            runtime.fifo.clear();
            runtime.position = ((state.current_time.to_seconds() + state.audio_offset) * input.sample_rate as f64)
                .round() as i64;
            self.flushes.fetch_add(1, Ordering::Relaxed);
            debug!("AudioMixer: resync at {} (sample {})", state.current_time, runtime.position);
        }

        if !self.device_ok() || state.playback != Playback::Forward || (state.speed - 1.0).abs() > 1e-6 {
            return;
        }
        let Some(resampler) = runtime.resampler.as_mut() else {
            return;
        };

        let out_channels = self.output.channels.max(1) as usize;
        let wanted = out.len();
        let ratio = input.sample_rate as f64 / self.output.sample_rate as f64;
        let mut rounds = 0;
        while runtime.fifo.len() < wanted && rounds < 64 {
            rounds += 1;
            let missing = (wanted - runtime.fifo.len()).div_ceil(out_channels);
            let frames = if resampler.is_passthrough() {
                missing
            } else {
                ((missing as f64 * ratio).ceil() as usize).max(64)
            };
            let mixed = mix_layers(&state.layers, input, runtime.position, frames);
            runtime.position += frames as i64;
            match resampler.process(&mixed) {
                Ok(samples) => runtime.fifo.extend(samples),
                Err(e) => {
                    warn!("AudioMixer: {}", e);
                    self.set_device_ok(false);
                    return;
                }
            }
        }

        let gain = if state.muted { 0.0 } else { state.volume };
        let take = wanted.min(runtime.fifo.len());
        for (dst, sample) in out.iter_mut().zip(runtime.fifo.drain(..take)) {
            *dst = sample * gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    /// Mono ramp: sample n of the media has value n / 10000.
    fn ramp_layer(seconds: i64) -> AudioLayer {
        let mut map = BTreeMap::new();
        for s in 0..seconds {
            let samples = (0..RATE as i64).map(|i| (s * RATE as i64 + i) as f32 / 10000.0).collect();
            map.insert(s, Arc::new(AudioBuffer::from_f32(1, RATE, samples)));
        }
        AudioLayer {
            info: AudioInfo::new(1, RATE, SampleType::F32),
            gain: 1.0,
            range: TimeRange::from_frames(0, seconds * 10 - 1, 10.0),
            media_start: RationalTime::new(0.0, 10.0),
            seconds: map,
        }
    }

    fn mixer_with(layers: Vec<AudioLayer>) -> AudioMixer {
        let mixer = AudioMixer::new(AudioInfo::new(1, RATE, SampleType::F32));
        mixer.update(|s| {
            s.playback = Playback::Forward;
            s.layers = layers;
        });
        mixer
    }

    fn values(samples: &[f32]) -> Vec<i64> {
        samples.iter().map(|s| (s * 10000.0).round() as i64).collect()
    }

    #[test]
    fn test_sequential_render() {
        let mixer = mixer_with(vec![ramp_layer(2)]);
        let out = mixer.render(250);
        assert_eq!(values(&out), (0..250).collect::<Vec<_>>());
        let out = mixer.render(10);
        assert_eq!(values(&out), (250..260).collect::<Vec<_>>());
    }

    #[test]
    fn test_seek_flushes_once_without_duplicates() {
        let mixer = mixer_with(vec![ramp_layer(2)]);
        mixer.render(250);
        assert_eq!(mixer.resampler_flushes(), 0);

        mixer.reset(RationalTime::from_frames(5, 10.0));
        let first = mixer.render(10);
        let second = mixer.render(10);
        assert_eq!(values(&first), (500..510).collect::<Vec<_>>());
        assert_eq!(values(&second), (510..520).collect::<Vec<_>>());
        assert_eq!(mixer.resampler_flushes(), 1);
    }

    #[test]
    fn test_silence_when_stopped_or_reversed() {
        let mixer = mixer_with(vec![ramp_layer(1)]);
        mixer.update(|s| s.playback = Playback::Stop);
        assert!(mixer.render(32).iter().all(|s| *s == 0.0));
        mixer.update(|s| s.playback = Playback::Reverse);
        assert!(mixer.render(32).iter().all(|s| *s == 0.0));
        // Stopped output does not consume samples
        mixer.update(|s| s.playback = Playback::Forward);
        assert_eq!(values(&mixer.render(3)), vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_second_is_silence() {
        let mut layer = ramp_layer(2);
        layer.seconds.remove(&0);
        let mixer = mixer_with(vec![layer]);
        assert!(mixer.render(1000).iter().all(|s| *s == 0.0));
        assert_eq!(values(&mixer.render(2)), vec![1000, 1001]);
    }

    #[test]
    fn test_gain_volume_and_mute() {
        let mut a = ramp_layer(1);
        a.gain = 0.5;
        let b = ramp_layer(1);
        let mixer = mixer_with(vec![a, b]);
        mixer.update(|s| s.volume = 2.0);
        // (0.5 + 1.0) * 2.0 = 3x
        assert_eq!(values(&mixer.render(3)), vec![0, 3, 6]);
        mixer.update(|s| s.muted = true);
        assert!(mixer.render(3).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_mismatched_rate_layer_skipped() {
        let mut other = ramp_layer(1);
        other.info.sample_rate = 2000;
        let mixer = mixer_with(vec![ramp_layer(1), other]);
        assert_eq!(values(&mixer.render(3)), vec![0, 1, 2]);
    }

    #[test]
    fn test_device_error_gives_silence() {
        let mixer = mixer_with(vec![ramp_layer(1)]);
        mixer.set_device_ok(false);
        assert!(mixer.render(16).iter().all(|s| *s == 0.0));
        mixer.set_device_ok(true);
        assert_eq!(values(&mixer.render(2)), vec![0, 1]);
    }

    #[test]
    fn test_audio_offset_shifts_anchor() {
        let mixer = mixer_with(vec![ramp_layer(2)]);
        mixer.update(|s| s.audio_offset = 0.1);
        mixer.reset(RationalTime::from_frames(2, 10.0));
        assert_eq!(values(&mixer.render(2)), vec![300, 301]);
    }

    #[test]
    fn test_resampled_output_length() {
        let mut layer = ramp_layer(2);
        layer.info.sample_rate = 48000;
        layer.seconds = BTreeMap::from([(0, Arc::new(AudioBuffer::from_f32(1, 48000, vec![0.1; 48000])))]);
        let mixer = AudioMixer::new(AudioInfo::new(2, 44100, SampleType::F32));
        mixer.update(|s| {
            s.playback = Playback::Forward;
            s.layers = vec![layer];
        });
        let out = mixer.render(512);
        assert_eq!(out.len(), 1024);
        assert!(out.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_discontinuity_detector() {
        let mut d = DiscontinuityDetector::new();
        assert!(d.check(0));
        d.advance(1);
        assert!(!d.check(1));
        d.advance(3);
        assert!(!d.check(4));
        assert!(d.check(40));
        assert!(!d.check(41));
        d.reset();
        assert!(d.check(41));
    }

    #[test]
    fn test_null_device_pulls() {
        let system = NullAudioSystem::new();
        let device = system.default_device().unwrap();
        let pulls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&pulls);
        let mut stream = system
            .open(
                &device,
                Box::new(move |buf: &mut [f32]| {
                    assert_eq!(buf.len(), 480 * 2);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(60));
        stream.stop();
        assert!(!stream.is_running());
        assert!(pulls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let system = NullAudioSystem::empty();
        assert!(system.default_device().is_none());
        let bogus = NullAudioSystem::new().default_device().unwrap();
        assert!(matches!(
            system.open(&bogus, Box::new(|_: &mut [f32]| {})),
            Err(DeviceError::NotFound(_))
        ));
    }
}
