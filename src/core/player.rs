//! Player clock and playback state machine.
//!
//! # Timing Model
//!
//! Frame-based: `tick(elapsed)` accumulates wall time, converts it to frames
//! at `rate * speed` and advances by whole frames. The current time always
//! lies in the in/out range; overrun is resolved by the loop mode:
//!
//! - **Loop**: wrap to the opposite edge (single modulo against the range)
//! - **Once**: clamp to the edge and stop
//! - **PingPong**: reflect off the edge and reverse direction
//!
//! # Tick
//!
//! Each tick also drives the read-ahead scheduler, composes the current
//! frame from the cache (holding the last complete frame while layers are
//! missing) and pushes the audio state to the mixer. Nothing here waits on
//! a decode.
//!
//! # Notifications
//!
//! Setters emit on the `EventBus` only when the value changed.

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::audio_mixer::{AudioLayer, AudioMixer, DiscontinuityDetector};
use super::event_bus::EventEmitter;
use super::frame_cache::{AudioKey, FrameCache};
use super::player_events::*;
use super::reader::ReaderPool;
use super::read_ahead::{Direction, PlayerCacheInfo, ReadAheadOptions, ReadAheadScheduler};
use crate::entities::{CompareOptions, CompositeFrame, Compositor, RationalTime, TimeRange, Timeline, TrackKind};

/// Speed presets for faster/slower shuttle control.
pub const SPEED_PRESETS: &[f64] = &[0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Playback {
    #[default]
    Stop,
    Forward,
    Reverse,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Loop {
    #[default]
    Loop,
    Once,
    PingPong,
}

/// Transport shortcuts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeAction {
    Start,
    End,
    FramePrev,
    FramePrevX10,
    FramePrevX100,
    FrameNext,
    FrameNextX10,
    FrameNextX100,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerOptions {
    pub read_ahead: ReadAheadOptions,
    pub loop_mode: Loop,
    pub speed: f64,
    pub volume: f32,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            read_ahead: ReadAheadOptions::default(),
            loop_mode: Loop::Loop,
            speed: 1.0,
            volume: 1.0,
        }
    }
}

fn set_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Playback state for one timeline.
pub struct Player {
    timeline: Arc<Timeline>,
    cache: Arc<FrameCache>,
    mixer: Arc<AudioMixer>,
    events: EventEmitter,
    scheduler: ReadAheadScheduler,
    compositor: Compositor,
    compare: CompareOptions,

    playback: Playback,
    loop_mode: Loop,
    speed: f64,
    volume: f32,
    muted: bool,
    audio_offset: f64,

    current_time: RationalTime,
    in_out: TimeRange,
    /// Fractional frames not yet applied.
    accumulator: f64,
    detector: DiscontinuityDetector,

    current_video: Option<Arc<CompositeFrame>>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("timeline", &self.timeline.name())
            .field("playback", &self.playback)
            .field("loop_mode", &self.loop_mode)
            .field("speed", &self.speed)
            .field("current_time", &self.current_time)
            .field("in_out", &self.in_out)
            .finish()
    }
}

impl Player {
    pub fn new(
        timeline: Arc<Timeline>,
        readers: Arc<ReaderPool>,
        cache: Arc<FrameCache>,
        mixer: Arc<AudioMixer>,
        events: EventEmitter,
        options: PlayerOptions,
    ) -> Self {
        let in_out = timeline.time_range();
        let scheduler = ReadAheadScheduler::new(
            readers,
            Arc::clone(&cache),
            Arc::clone(cache.manager()),
            options.read_ahead,
        );
        info!(
            "Player: timeline '{}' {} @ {} fps",
            timeline.name(),
            in_out,
            timeline.rate()
        );
        let player = Self {
            current_time: in_out.start(),
            timeline,
            cache,
            mixer,
            events,
            scheduler,
            compositor: Compositor::new(),
            compare: CompareOptions::default(),
            playback: Playback::Stop,
            loop_mode: options.loop_mode,
            speed: if options.speed > 0.0 { options.speed } else { 1.0 },
            volume: options.volume.max(0.0),
            muted: false,
            audio_offset: 0.0,
            in_out,
            accumulator: 0.0,
            detector: DiscontinuityDetector::new(),
            current_video: None,
        };
        player.push_audio_state();
        player
    }

    // === Accessors ===

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn rate(&self) -> f64 {
        self.timeline.rate()
    }

    pub fn current_time(&self) -> RationalTime {
        self.current_time
    }

    /// Current time as a whole frame at the timeline rate.
    pub fn current_frame(&self) -> i64 {
        self.current_time.to_frames_at(self.rate())
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    pub fn loop_mode(&self) -> Loop {
        self.loop_mode
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn audio_offset(&self) -> f64 {
        self.audio_offset
    }

    pub fn in_out_range(&self) -> TimeRange {
        self.in_out
    }

    pub fn compare(&self) -> CompareOptions {
        self.compare
    }

    pub fn cache_info(&self) -> &PlayerCacheInfo {
        self.scheduler.cache_info()
    }

    pub fn current_video(&self) -> Option<Arc<CompositeFrame>> {
        self.current_video.clone()
    }

    pub fn set_read_ahead(&mut self, options: ReadAheadOptions) {
        self.scheduler.set_options(options);
    }

    // === Frame helpers ===

    fn time_of(&self, frame: i64) -> RationalTime {
        RationalTime::from_frames(frame, self.rate())
    }

    fn first_frame(&self) -> i64 {
        self.in_out.start().to_frames_at(self.rate())
    }

    fn last_frame(&self) -> i64 {
        self.in_out.end_time_inclusive().to_frames_at(self.rate())
    }

    fn set_current_frame(&mut self, frame: i64) {
        let frame = frame.clamp(self.first_frame(), self.last_frame());
        let time = self.time_of(frame);
        if set_if_changed(&mut self.current_time, time) {
            trace!("Player: frame {}", frame);
            self.events.emit(CurrentTimeChanged { time });
        }
    }

    /// Re-anchor audio if the time jumped by more than one frame.
    fn sync_audio(&mut self) {
        if self.detector.check(self.current_frame()) {
            self.mixer.reset(self.current_time);
        }
    }

    // === Playback ===

    pub fn set_playback(&mut self, playback: Playback) {
        if self.playback == playback {
            return;
        }
        // Restart from the far edge when a one-shot run is already finished
        if self.loop_mode == Loop::Once {
            let frame = self.current_frame();
            if playback == Playback::Forward && frame >= self.last_frame() {
                self.set_current_frame(self.first_frame());
            } else if playback == Playback::Reverse && frame <= self.first_frame() {
                self.set_current_frame(self.last_frame());
            }
        }
        self.playback = playback;
        self.accumulator = 0.0;
        if playback != Playback::Stop {
            self.detector.reset();
            self.sync_audio();
        }
        debug!("Player: playback {:?}", playback);
        self.events.emit(PlaybackChanged(playback));
        self.push_audio_state();
    }

    pub fn stop(&mut self) {
        self.set_playback(Playback::Stop);
    }

    pub fn set_loop(&mut self, loop_mode: Loop) {
        if set_if_changed(&mut self.loop_mode, loop_mode) {
            self.events.emit(LoopChanged(loop_mode));
        }
    }

    pub fn set_speed(&mut self, speed: f64) {
        if speed <= 0.0 || !speed.is_finite() {
            return;
        }
        if set_if_changed(&mut self.speed, speed) {
            self.events.emit(SpeedChanged(speed));
            self.push_audio_state();
        }
    }

    /// Next speed preset up.
    pub fn faster(&mut self) {
        if let Some(speed) = SPEED_PRESETS.iter().copied().find(|s| *s > self.speed + 1e-9) {
            self.set_speed(speed);
        }
    }

    /// Next speed preset down.
    pub fn slower(&mut self) {
        if let Some(speed) = SPEED_PRESETS.iter().rev().copied().find(|s| *s < self.speed - 1e-9) {
            self.set_speed(speed);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        if set_if_changed(&mut self.volume, volume.max(0.0)) {
            self.events.emit(VolumeChanged(self.volume));
            self.push_audio_state();
        }
    }

    pub fn set_mute(&mut self, muted: bool) {
        if set_if_changed(&mut self.muted, muted) {
            self.events.emit(MuteChanged(muted));
            self.push_audio_state();
        }
    }

    /// Audio offset in seconds (positive plays audio later material).
    pub fn set_audio_offset(&mut self, offset: f64) {
        if set_if_changed(&mut self.audio_offset, offset) {
            self.events.emit(AudioOffsetChanged(offset));
            self.push_audio_state();
            self.mixer.reset(self.current_time);
        }
    }

    pub fn set_compare(&mut self, compare: CompareOptions) {
        if set_if_changed(&mut self.compare, compare) {
            self.events.emit(CompareChanged(compare));
        }
    }

    // === Navigation ===

    /// Jump to `time`, clamped to the in/out range.
    pub fn seek(&mut self, time: RationalTime) {
        let frame = time.to_frames_at(self.rate());
        self.set_current_frame(frame);
        self.accumulator = 0.0;
        self.sync_audio();
    }

    pub fn time_action(&mut self, action: TimeAction) {
        match action {
            TimeAction::Start => self.start(),
            TimeAction::End => self.end(),
            TimeAction::FramePrev => self.step(-1),
            TimeAction::FramePrevX10 => self.step(-10),
            TimeAction::FramePrevX100 => self.step(-100),
            TimeAction::FrameNext => self.step(1),
            TimeAction::FrameNextX10 => self.step(10),
            TimeAction::FrameNextX100 => self.step(100),
        }
    }

    pub fn start(&mut self) {
        self.seek(self.in_out.start());
    }

    pub fn end(&mut self) {
        self.seek(self.in_out.end_time_inclusive());
    }

    pub fn frame_prev(&mut self) {
        self.step(-1);
    }

    pub fn frame_next(&mut self) {
        self.step(1);
    }

    /// Stop and move by `frames`, clamped to the in/out range.
    fn step(&mut self, frames: i64) {
        self.stop();
        let target = self.current_frame().saturating_add(frames);
        self.seek(self.time_of(target));
    }

    /// Clip start frames inside the in/out range.
    fn boundaries(&self) -> Vec<i64> {
        let (first, last) = (self.first_frame(), self.last_frame());
        self.timeline
            .clip_boundaries()
            .into_iter()
            .map(|t| t.to_frames_at(self.rate()))
            .filter(|f| (first..=last).contains(f))
            .collect()
    }

    /// Previous clip start; wraps to the last one.
    pub fn clip_prev(&mut self) {
        let current = self.current_frame();
        let boundaries = self.boundaries();
        let target = boundaries
            .iter()
            .rev()
            .copied()
            .find(|f| *f < current)
            .or_else(|| boundaries.last().copied());
        if let Some(frame) = target {
            self.seek(self.time_of(frame));
        }
    }

    /// Next clip start; wraps to the first one.
    pub fn clip_next(&mut self) {
        let current = self.current_frame();
        let boundaries = self.boundaries();
        let target = boundaries
            .iter()
            .copied()
            .find(|f| *f > current)
            .or_else(|| boundaries.first().copied());
        if let Some(frame) = target {
            self.seek(self.time_of(frame));
        }
    }

    // === In/Out ===

    pub fn set_in_out_range(&mut self, range: TimeRange) {
        let full = self.timeline.time_range();
        let rate = self.rate();
        let full_first = full.start().to_frames_at(rate);
        let full_last = full.end_time_inclusive().to_frames_at(rate);
        let mut first = range.start().to_frames_at(rate).clamp(full_first, full_last);
        let mut last = range.end_time_inclusive().to_frames_at(rate).clamp(full_first, full_last);
        if last < first {
            std::mem::swap(&mut first, &mut last);
        }
        let range = TimeRange::from_frames(first, last, rate);
        if set_if_changed(&mut self.in_out, range) {
            debug!("Player: in/out {}", range);
            self.events.emit(InOutRangeChanged(range));
            self.scheduler.invalidate();
            let frame = self.current_frame();
            if frame < first || frame > last {
                self.seek(self.time_of(frame));
            }
        }
    }

    pub fn set_in_point(&mut self) {
        let range = TimeRange::from_frames(self.current_frame(), self.last_frame(), self.rate());
        self.set_in_out_range(range);
    }

    pub fn set_out_point(&mut self) {
        let range = TimeRange::from_frames(self.first_frame(), self.current_frame(), self.rate());
        self.set_in_out_range(range);
    }

    pub fn reset_in_out_points(&mut self) {
        self.set_in_out_range(self.timeline.time_range());
    }

    // === Clock ===

    /// Advance the clock and refresh cache, video and audio state.
    pub fn tick(&mut self, elapsed: Duration) {
        if self.playback != Playback::Stop {
            self.accumulator += elapsed.as_secs_f64() * self.rate() * self.speed;
            let frames = (self.accumulator + 1e-9).floor();
            if frames >= 1.0 {
                self.accumulator -= frames;
                let delta = match self.playback {
                    Playback::Reverse => -(frames as i64),
                    _ => frames as i64,
                };
                self.advance(delta);
            }
        }

        let direction = match self.playback {
            Playback::Reverse => Direction::Reverse,
            _ => Direction::Forward,
        };
        let report = self
            .scheduler
            .tick(&self.timeline, self.current_time, direction, &self.in_out);
        if report.cache_info_changed {
            self.events.emit(CacheInfoChanged(self.scheduler.cache_info().clone()));
        }

        self.update_video();
        self.push_audio_state();
    }

    /// Natural advance by `delta` frames with overrun handling.
    fn advance(&mut self, delta: i64) {
        let (first, last) = (self.first_frame(), self.last_frame());
        let len = last - first + 1;
        let mut target = self.current_frame() + delta;
        let mut next_playback = None;

        match self.loop_mode {
            Loop::Loop => {
                if target > last {
                    target = first + (target - last - 1).rem_euclid(len);
                    trace!("Loop wrap -> {}", target);
                } else if target < first {
                    target = last - (first - target - 1).rem_euclid(len);
                    trace!("Loop wrap -> {}", target);
                }
            }
            Loop::Once => {
                if target > last || target < first {
                    target = target.clamp(first, last);
                    trace!("Reached range edge at {}, stopping", target);
                    next_playback = Some(Playback::Stop);
                }
            }
            Loop::PingPong => {
                if target > last {
                    target = (last - (target - last)).max(first);
                    next_playback = Some(Playback::Reverse);
                } else if target < first {
                    target = (first + (first - target)).min(last);
                    next_playback = Some(Playback::Forward);
                }
            }
        }

        self.detector.advance(delta);
        self.set_current_frame(target);
        self.sync_audio();
        if let Some(playback) = next_playback {
            self.playback = playback;
            self.accumulator = 0.0;
            self.events.emit(PlaybackChanged(playback));
            if playback != Playback::Stop {
                self.detector.reset();
                self.sync_audio();
            }
        }
    }

    fn update_video(&mut self) {
        let frame = self
            .compositor
            .compose(&self.timeline, self.current_time, &self.compare, &*self.cache);
        let publish = match &self.current_video {
            None => true,
            Some(shown) => {
                // Hold the last complete frame while layers are missing
                frame.complete && (shown.time != frame.time || !shown.complete || shown.layers.len() != frame.layers.len())
            }
        };
        if publish {
            let frame = Arc::new(frame);
            self.current_video = Some(Arc::clone(&frame));
            self.events.emit(CurrentVideoChanged { frame });
        }
    }

    /// Audio layers with cached seconds around the current time.
    fn audio_layers(&self) -> Vec<AudioLayer> {
        let rate = self.rate();
        let ahead = self.scheduler.options().audio_read_ahead.max(1.0);
        let start = self.current_time - RationalTime::from_seconds(1.0, rate);
        let window = TimeRange::new(start, RationalTime::from_seconds(ahead + 2.0, rate));

        let mut layers = Vec::new();
        for (clip_id, clip_range) in self.timeline.clips_in_range(TrackKind::Audio, &window) {
            let (Some(clip), Some(media_start)) = (
                self.timeline.clip(clip_id),
                self.timeline.media_time(clip_id, clip_range.start()),
            ) else {
                continue;
            };
            let from = self
                .timeline
                .media_time(clip_id, window.start())
                .map(|t| t.to_seconds().floor() as i64)
                .unwrap_or(0)
                .max(0);
            let to = self
                .timeline
                .media_time(clip_id, window.end_time_exclusive())
                .map(|t| t.to_seconds().ceil() as i64)
                .unwrap_or(from);
            let mut seconds = BTreeMap::new();
            for s in from..=to {
                if let Some(buffer) = self.cache.get_audio(&AudioKey::new(&clip.path, s)) {
                    seconds.insert(s, buffer);
                }
            }
            let Some(info) = seconds.values().next().map(|b| b.info()) else {
                continue;
            };
            layers.push(AudioLayer {
                info,
                gain: clip.gain(),
                range: clip_range,
                media_start,
                seconds,
            });
        }
        layers
    }

    fn push_audio_state(&self) {
        let layers = self.audio_layers();
        let (playback, speed, volume, muted, offset, time) = (
            self.playback,
            self.speed,
            self.volume,
            self.muted,
            self.audio_offset,
            self.current_time,
        );
        self.mixer.update(move |state| {
            state.playback = playback;
            state.speed = speed;
            state.volume = volume;
            state.muted = muted;
            state.audio_offset = offset;
            state.current_time = time;
            state.layers = layers;
        });
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.mixer.update(|state| {
            state.playback = Playback::Stop;
            state.layers.clear();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_man::CacheManager;
    use crate::core::event_bus::EventBus;
    use crate::core::pattern::{PatternDecoderFactory, PatternMedia};
    use crate::core::reader::ReaderOptions;
    use crate::core::workers::Workers;
    use crate::entities::{AudioInfo, Clip, Path, SampleType, Transition};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Two 24-frame clips at 24 fps: 48 frames.
    fn two_clip_timeline() -> Timeline {
        let mut timeline = Timeline::new("edit", 24.0);
        let v1 = timeline.add_track(TrackKind::Video, "V1");
        timeline
            .append_clip(v1, "a", Clip::new(Path::new("/a.mov"), TimeRange::from_frames(0, 23, 24.0)))
            .unwrap();
        timeline
            .append_clip(v1, "b", Clip::new(Path::new("/b.mov"), TimeRange::from_frames(100, 123, 24.0)))
            .unwrap();
        timeline
    }

    struct Fixture {
        player: Player,
        bus: EventBus,
        mixer: Arc<AudioMixer>,
    }

    fn fixture(timeline: Timeline) -> Fixture {
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()));
        let workers = Arc::new(Workers::new(2));
        let readers = Arc::new(ReaderPool::new(factory, workers, ReaderOptions::default(), 8));
        let manager = Arc::new(CacheManager::with_limit(1 << 30));
        let cache = Arc::new(FrameCache::new(manager, 1 << 24, 1 << 26));
        let mixer = Arc::new(AudioMixer::new(AudioInfo::new(2, 48000, SampleType::F32)));
        let bus = EventBus::new();
        let options = PlayerOptions {
            read_ahead: ReadAheadOptions {
                read_ahead: 0.25,
                read_behind: 0.1,
                audio_read_ahead: 1.0,
                audio_read_behind: 0.0,
            },
            ..Default::default()
        };
        let player = Player::new(
            Arc::new(timeline),
            readers,
            cache,
            Arc::clone(&mixer),
            bus.emitter(),
            options,
        );
        Fixture { player, bus, mixer }
    }

    fn frames(n: f64) -> Duration {
        Duration::from_secs_f64(n / 24.0)
    }

    #[test]
    fn test_end_to_end_navigation() {
        let mut f = fixture(two_clip_timeline());
        let p = &mut f.player;
        p.seek(RationalTime::from_frames(0, 24.0));
        assert_eq!(p.current_frame(), 0);
        p.end();
        assert_eq!(p.current_frame(), 47);
        p.start();
        assert_eq!(p.current_frame(), 0);
        p.frame_next();
        assert_eq!(p.current_frame(), 1);
        p.time_action(TimeAction::FrameNextX10);
        assert_eq!(p.current_frame(), 11);
        p.frame_prev();
        assert_eq!(p.current_frame(), 10);
        p.set_playback(Playback::Forward);
        p.frame_prev();
        assert_eq!(p.playback(), Playback::Stop);
        assert_eq!(p.current_frame(), 9);
        p.start();
        p.clip_prev();
        assert_eq!(p.current_frame(), 24);
        p.clip_next();
        assert_eq!(p.current_frame(), 0);
    }

    #[test]
    fn test_seek_clamps_to_in_out() {
        let mut f = fixture(two_clip_timeline());
        f.player.seek(RationalTime::from_frames(500, 24.0));
        assert_eq!(f.player.current_frame(), 47);
        f.player.time_action(TimeAction::FramePrevX100);
        assert_eq!(f.player.current_frame(), 0);
    }

    #[test]
    fn test_loop_wraps() {
        let mut f = fixture(two_clip_timeline());
        f.player.seek(RationalTime::from_frames(46, 24.0));
        f.player.set_playback(Playback::Forward);
        f.player.tick(frames(3.0));
        // 46 + 3 = 49 -> 0 + (49 - 47 - 1)
        assert_eq!(f.player.current_frame(), 1);
        assert_eq!(f.player.playback(), Playback::Forward);

        f.player.set_playback(Playback::Reverse);
        f.player.tick(frames(3.0));
        // 1 - 3 = -2 -> 47 - (0 - (-2) - 1)
        assert_eq!(f.player.current_frame(), 46);
    }

    #[test]
    fn test_once_clamps_and_stops() {
        let mut f = fixture(two_clip_timeline());
        f.player.set_loop(Loop::Once);
        f.player.seek(RationalTime::from_frames(45, 24.0));
        f.player.set_playback(Playback::Forward);
        f.player.tick(frames(5.0));
        assert_eq!(f.player.current_frame(), 47);
        assert_eq!(f.player.playback(), Playback::Stop);

        // Playing again from the end restarts
        f.player.set_playback(Playback::Forward);
        assert_eq!(f.player.current_frame(), 0);
    }

    #[test]
    fn test_ping_pong_reflects() {
        let mut f = fixture(two_clip_timeline());
        f.player.set_loop(Loop::PingPong);
        f.player.seek(RationalTime::from_frames(46, 24.0));
        f.player.set_playback(Playback::Forward);
        f.player.tick(frames(3.0));
        assert_eq!(f.player.current_frame(), 45);
        assert_eq!(f.player.playback(), Playback::Reverse);
    }

    #[test]
    fn test_speed_scales_clock() {
        let mut f = fixture(two_clip_timeline());
        f.player.set_speed(2.0);
        f.player.set_playback(Playback::Forward);
        f.player.tick(frames(3.0));
        assert_eq!(f.player.current_frame(), 6);

        // Fractional frames accumulate
        f.player.set_speed(0.5);
        f.player.tick(frames(1.0));
        assert_eq!(f.player.current_frame(), 6);
        f.player.tick(frames(1.0));
        assert_eq!(f.player.current_frame(), 7);
    }

    #[test]
    fn test_speed_presets() {
        let mut f = fixture(two_clip_timeline());
        f.player.faster();
        assert_eq!(f.player.speed(), 2.0);
        f.player.slower();
        f.player.slower();
        assert_eq!(f.player.speed(), 0.5);
        f.player.set_speed(-1.0);
        assert_eq!(f.player.speed(), 0.5);
    }

    #[test]
    fn test_in_out_points() {
        let mut f = fixture(two_clip_timeline());
        f.player.seek(RationalTime::from_frames(10, 24.0));
        f.player.set_in_point();
        f.player.seek(RationalTime::from_frames(30, 24.0));
        f.player.set_out_point();
        assert_eq!(f.player.in_out_range(), TimeRange::from_frames(10, 30, 24.0));

        f.player.start();
        assert_eq!(f.player.current_frame(), 10);
        f.player.seek(RationalTime::from_frames(40, 24.0));
        assert_eq!(f.player.current_frame(), 30);

        // Shrinking the range pulls the current time inside
        f.player.set_in_out_range(TimeRange::from_frames(12, 20, 24.0));
        assert_eq!(f.player.current_frame(), 20);

        f.player.reset_in_out_points();
        assert_eq!(f.player.in_out_range(), TimeRange::from_frames(0, 47, 24.0));
    }

    #[test]
    fn test_events_only_on_change() {
        let mut f = fixture(two_clip_timeline());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        f.bus.subscribe::<CurrentTimeChanged, _>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        f.player.seek(RationalTime::from_frames(5, 24.0));
        f.player.seek(RationalTime::from_frames(5, 24.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        f.player.set_loop(Loop::Loop);
        assert!(f.bus.drain::<LoopChanged>().is_empty());
        f.player.set_loop(Loop::Once);
        assert_eq!(f.bus.drain::<LoopChanged>(), vec![LoopChanged(Loop::Once)]);
    }

    #[test]
    fn test_audio_controls_reach_mixer() {
        let mut f = fixture(two_clip_timeline());
        f.player.set_playback(Playback::Forward);
        f.mixer.render(16);
        assert_eq!(f.mixer.resampler_flushes(), 1);

        // Offset changes re-anchor the audio clock
        f.player.set_audio_offset(0.25);
        f.mixer.render(16);
        assert_eq!(f.mixer.resampler_flushes(), 2);

        f.player.set_volume(0.5);
        f.player.set_mute(true);
        f.player.set_volume(-1.0);
        let state = f.mixer.state();
        assert_eq!(state.volume, 0.0);
        assert!(state.muted);
        assert_eq!(state.audio_offset, 0.25);
        assert!(f.player.is_muted());
        assert_eq!(f.bus.drain::<VolumeChanged>(), vec![VolumeChanged(0.5), VolumeChanged(0.0)]);
        assert_eq!(f.bus.drain::<MuteChanged>(), vec![MuteChanged(true)]);
        assert_eq!(f.bus.drain::<AudioOffsetChanged>(), vec![AudioOffsetChanged(0.25)]);

        f.player.set_mute(true);
        assert!(f.bus.drain::<MuteChanged>().is_empty());
    }

    #[test]
    fn test_compare_and_read_ahead_settings() {
        let mut f = fixture(two_clip_timeline());
        let compare = CompareOptions {
            mode: crate::entities::CompareMode::Wipe,
            ..Default::default()
        };
        f.player.set_compare(compare);
        f.player.set_compare(compare);
        assert_eq!(f.player.compare(), compare);
        assert_eq!(f.bus.drain::<CompareChanged>(), vec![CompareChanged(compare)]);

        let options = ReadAheadOptions {
            read_ahead: 1.0,
            read_behind: 0.0,
            audio_read_ahead: 0.5,
            audio_read_behind: 0.0,
        };
        f.player.set_read_ahead(options);
        assert_eq!(f.player.scheduler.options(), options);
    }

    #[test]
    fn test_tick_publishes_decoded_frame() {
        let mut f = fixture(two_clip_timeline());
        f.player.seek(RationalTime::from_frames(30, 24.0));
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            f.player.tick(Duration::ZERO);
            if f.player.current_video().map(|v| v.complete).unwrap_or(false) || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        let video = f.player.current_video().unwrap();
        assert!(video.complete);
        assert_eq!(video.layers.len(), 1);
        // Frame 30 of the timeline is media frame 106 of clip b
        assert_eq!(PatternDecoderFactory::frame_of(&video.layers[0].image), 106);
        assert!(!f.bus.drain::<CurrentVideoChanged>().is_empty());
        assert!(!f.player.cache_info().video.is_empty());
    }

    /// Seek and tick until the shown composite is complete at `frame`.
    fn show_frame(f: &mut Fixture, frame: i64) -> Arc<CompositeFrame> {
        f.player.seek(RationalTime::from_frames(frame, 24.0));
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            f.player.tick(Duration::ZERO);
            if let Some(video) = f.player.current_video() {
                if video.complete && video.time.to_frames_at(24.0) == frame {
                    return video;
                }
            }
            assert!(Instant::now() < deadline, "frame {} never completed", frame);
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_dissolve_shows_both_clips() {
        let mut timeline = Timeline::new("edit", 24.0);
        let v1 = timeline.add_track(TrackKind::Video, "V1");
        timeline
            .append_clip(v1, "a", Clip::new(Path::new("/a.mov"), TimeRange::from_frames(0, 23, 24.0)))
            .unwrap();
        timeline
            .append_transition(
                v1,
                "dissolve",
                Transition {
                    in_offset: RationalTime::new(4.0, 24.0),
                    out_offset: RationalTime::new(4.0, 24.0),
                },
            )
            .unwrap();
        timeline
            .append_clip(v1, "b", Clip::new(Path::new("/b.mov"), TimeRange::from_frames(0, 23, 24.0)))
            .unwrap();
        let mut f = fixture(timeline);

        let video = show_frame(&mut f, 19);
        assert_eq!(video.layers.len(), 1);

        // First half: b holds its first frame under a
        let video = show_frame(&mut f, 21);
        assert_eq!(video.layers.len(), 2);
        assert_eq!(PatternDecoderFactory::frame_of(&video.layers[0].image), 21);
        assert_eq!(PatternDecoderFactory::frame_of(&video.layers[1].image), 0);
        assert!((video.layers[1].opacity - 0.125).abs() < 1e-6);

        // Second half: a holds its last frame
        let video = show_frame(&mut f, 26);
        assert_eq!(PatternDecoderFactory::frame_of(&video.layers[0].image), 23);
        assert_eq!(PatternDecoderFactory::frame_of(&video.layers[1].image), 2);
    }

    #[test]
    fn test_audio_resync_once_per_jump() {
        let mut f = fixture(two_clip_timeline());
        f.player.set_playback(Playback::Forward);
        f.mixer.render(16);
        assert_eq!(f.mixer.resampler_flushes(), 1);

        // One-frame advance keeps the audio clock running
        f.player.tick(frames(1.0));
        f.mixer.render(16);
        assert_eq!(f.mixer.resampler_flushes(), 1);

        // A jump re-anchors exactly once
        f.player.seek(RationalTime::from_frames(30, 24.0));
        f.mixer.render(16);
        f.mixer.render(16);
        assert_eq!(f.mixer.resampler_flushes(), 2);
    }
}
