//! Read-ahead scheduler: keeps the cache filled around the playhead.
//!
//! Each `tick()`:
//! 1. Window `[T - behind, T + ahead]` (forward) or `[T - ahead, T + behind]`
//!    (reverse), clipped to the playback range
//! 2. Requests still in flight but outside the window are cancelled
//! 3. Every frame in the window that is neither cached nor in flight is
//!    requested, nearest to T first
//! 4. Finished futures are polled; non-empty results go into the cache
//! 5. `PlayerCacheInfo` is recomputed when the cache changed, starting from
//!    the cached keys so the cost follows the cache size, not the range
//!
//! Cancelled requests stay tracked until their future resolves: queued ones
//! resolve empty, ones already decoding still insert. A key whose decode
//! came back empty is not requested again until the next seek (epoch bump)
//! or `clear()`.

use log::{debug, trace};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::cache_man::CacheManager;
use super::frame_cache::{AudioKey, FrameCache, FrameKey};
use super::promise::Future;
use super::reader::{ReaderPool, RequestId};
use crate::entities::{AudioData, Path, RationalTime, ReadOptions, TimeRange, Timeline, TrackKind, VideoData};

/// Playback direction as seen by the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

/// Read-ahead / read-behind amounts in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReadAheadOptions {
    pub read_ahead: f64,
    pub read_behind: f64,
    pub audio_read_ahead: f64,
    pub audio_read_behind: f64,
}

impl Default for ReadAheadOptions {
    fn default() -> Self {
        Self {
            read_ahead: 2.0,
            read_behind: 0.5,
            audio_read_ahead: 2.0,
            audio_read_behind: 0.5,
        }
    }
}

/// Cached ranges in timeline time, published to observers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerCacheInfo {
    pub video: Vec<TimeRange>,
    pub audio: Vec<TimeRange>,
    pub video_percentage: f32,
    pub audio_percentage: f32,
}

/// What one tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub requested: usize,
    pub inserted: usize,
    pub cancelled: usize,
    pub cache_info_changed: bool,
}

struct InFlight<T> {
    path: Path,
    id: RequestId,
    future: Future<T>,
    /// Timeline frame (video) or timeline second (audio) that wanted it.
    anchor: i64,
    /// Cache manager epoch at request time.
    epoch: u64,
    cancelled: bool,
}

/// Whole frames covering `seconds`, tolerant of float noise.
fn seconds_to_frames(seconds: f64, rate: f64) -> i64 {
    ((seconds * rate) - 1e-6).ceil().max(0.0) as i64
}

/// Merge sorted frame numbers into ranges.
fn frames_to_ranges(frames: &BTreeSet<i64>, rate: f64) -> Vec<TimeRange> {
    let mut ranges = Vec::new();
    let mut iter = frames.iter().copied();
    let Some(mut first) = iter.next() else {
        return ranges;
    };
    let mut last = first;
    for f in iter {
        if f != last + 1 {
            ranges.push(TimeRange::from_frames(first, last, rate));
            first = f;
        }
        last = f;
    }
    ranges.push(TimeRange::from_frames(first, last, rate));
    ranges
}

/// Read-ahead scheduler for one player.
pub struct ReadAheadScheduler {
    readers: Arc<ReaderPool>,
    cache: Arc<FrameCache>,
    manager: Arc<CacheManager>,
    options: ReadAheadOptions,
    read_options: ReadOptions,
    video: HashMap<FrameKey, InFlight<VideoData>>,
    audio: HashMap<AudioKey, InFlight<AudioData>>,
    /// Keys that decoded empty, with the epoch they failed in.
    failed_video: HashMap<FrameKey, u64>,
    failed_audio: HashMap<AudioKey, u64>,
    last_frame: Option<i64>,
    last_direction: Direction,
    cache_info: PlayerCacheInfo,
    dirty: bool,
}

impl ReadAheadScheduler {
    pub fn new(
        readers: Arc<ReaderPool>,
        cache: Arc<FrameCache>,
        manager: Arc<CacheManager>,
        options: ReadAheadOptions,
    ) -> Self {
        Self {
            readers,
            cache,
            manager,
            options,
            read_options: ReadOptions::default(),
            video: HashMap::new(),
            audio: HashMap::new(),
            failed_video: HashMap::new(),
            failed_audio: HashMap::new(),
            last_frame: None,
            last_direction: Direction::Forward,
            cache_info: PlayerCacheInfo::default(),
            dirty: true,
        }
    }

    pub fn options(&self) -> ReadAheadOptions {
        self.options
    }

    pub fn set_options(&mut self, options: ReadAheadOptions) {
        self.options = options;
    }

    pub fn cache_info(&self) -> &PlayerCacheInfo {
        &self.cache_info
    }

    /// Timeline frames with a live (not cancelled) video request.
    pub fn requested_frames(&self) -> Vec<i64> {
        let frames: BTreeSet<i64> = self
            .video
            .values()
            .filter(|r| !r.cancelled)
            .map(|r| r.anchor)
            .collect();
        frames.into_iter().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.video.len() + self.audio.len()
    }

    /// Video window in timeline frames, clipped to `range`.
    pub fn video_window(&self, time: RationalTime, direction: Direction, range: &TimeRange, rate: f64) -> (i64, i64) {
        let t = time.to_frames_at(rate);
        let ahead = seconds_to_frames(self.options.read_ahead, rate);
        let behind = seconds_to_frames(self.options.read_behind, rate);
        let (lo, hi) = match direction {
            Direction::Forward => (t - behind, t + ahead),
            Direction::Reverse => (t - ahead, t + behind),
        };
        let first = range.start().to_frames_at(rate);
        let last = range.end_time_inclusive().to_frames_at(rate);
        (lo.max(first), hi.min(last))
    }

    /// One scheduling pass.
    pub fn tick(&mut self, timeline: &Timeline, time: RationalTime, direction: Direction, range: &TimeRange) -> TickReport {
        let rate = timeline.rate();
        let t = time.to_frames_at(rate);
        let mut report = TickReport::default();

        let moved = match self.last_frame {
            Some(prev) => (t - prev).abs() > 1,
            None => false,
        };
        if moved || direction != self.last_direction {
            let epoch = self.manager.increment_epoch();
            trace!("ReadAhead: seek to {} ({:?}), epoch {}", t, direction, epoch);
        }
        let epoch = self.manager.current_epoch();
        self.failed_video.retain(|_, failed| *failed == epoch);
        self.failed_audio.retain(|_, failed| *failed == epoch);
        self.last_frame = Some(t);
        self.last_direction = direction;

        let (lo, hi) = self.video_window(time, direction, range, rate);
        report.cancelled += self.cancel_outside_video(lo, hi);

        // Nearest first; ties go to the playback direction
        let mut frames: Vec<i64> = (lo..=hi).collect();
        frames.sort_by_key(|f| {
            let ahead = match direction {
                Direction::Forward => *f >= t,
                Direction::Reverse => *f <= t,
            };
            ((f - t).abs(), !ahead)
        });
        for frame in frames {
            report.requested += self.request_video_frame(timeline, frame, rate, epoch);
        }

        report.cancelled += self.schedule_audio(timeline, time, direction, range, epoch, &mut report.requested);

        report.inserted += self.poll();
        if report.inserted > 0 || report.cancelled > 0 || self.dirty {
            let info = self.compute_cache_info(timeline, range);
            if info != self.cache_info {
                self.cache_info = info;
                report.cache_info_changed = true;
            }
            self.dirty = false;
        }

        if report.requested > 0 || report.cancelled > 0 {
            debug!(
                "ReadAhead tick @{}: window [{}, {}], requested {}, inserted {}, cancelled {}, in flight {}",
                t,
                lo,
                hi,
                report.requested,
                report.inserted,
                report.cancelled,
                self.in_flight()
            );
        }
        report
    }

    fn request_video_frame(&mut self, timeline: &Timeline, frame: i64, rate: f64, epoch: u64) -> usize {
        let time = RationalTime::from_frames(frame, rate);
        let mut requested = 0;
        for sample in timeline.video_samples(time) {
            for clip_sample in sample.clips {
                let Some(clip) = timeline.clip(clip_sample.clip) else {
                    continue;
                };
                let key = FrameKey::new(&clip.path, clip_sample.media_time, 0, &self.read_options);
                if self.video.contains_key(&key)
                    || self.failed_video.contains_key(&key)
                    || self.cache.contains_video(&key)
                {
                    continue;
                }
                let reader = self.readers.get(&clip.path);
                let (id, future) = reader.read_video(clip_sample.media_time, 0, &self.read_options);
                self.video.insert(
                    key,
                    InFlight {
                        path: clip.path.clone(),
                        id,
                        future,
                        anchor: frame,
                        epoch,
                        cancelled: false,
                    },
                );
                requested += 1;
            }
        }
        requested
    }

    fn cancel_outside_video(&mut self, lo: i64, hi: i64) -> usize {
        let mut by_path: HashMap<String, (Path, Vec<RequestId>)> = HashMap::new();
        for request in self.video.values_mut() {
            if request.cancelled || (lo..=hi).contains(&request.anchor) {
                continue;
            }
            request.cancelled = true;
            by_path
                .entry(request.path.to_string())
                .or_insert_with(|| (request.path.clone(), Vec::new()))
                .1
                .push(request.id);
        }
        self.cancel(by_path)
    }

    fn cancel(&self, by_path: HashMap<String, (Path, Vec<RequestId>)>) -> usize {
        let mut count = 0;
        for (_, (path, ids)) in by_path {
            count += ids.len();
            self.readers.get(&path).cancel_requests(&ids);
        }
        count
    }

    /// Audio read-ahead in whole media seconds. Returns cancelled count.
    fn schedule_audio(
        &mut self,
        timeline: &Timeline,
        time: RationalTime,
        direction: Direction,
        range: &TimeRange,
        epoch: u64,
        requested: &mut usize,
    ) -> usize {
        let rate = timeline.rate();
        let (ahead, behind) = (self.options.audio_read_ahead, self.options.audio_read_behind);
        let (before, after) = match direction {
            Direction::Forward => (behind, ahead),
            Direction::Reverse => (ahead, behind),
        };
        let window_start = (time - RationalTime::from_seconds(before, rate)).max_with(range.start());
        let window_end = (time + RationalTime::from_seconds(after, rate)).min_with(range.end_time_exclusive());
        if window_end <= window_start {
            return 0;
        }
        let window = TimeRange::new(window_start, window_end - window_start);
        let anchor_lo = window_start.to_seconds().floor() as i64;
        let anchor_hi = window_end.to_seconds().floor() as i64;

        // Cancel seconds no longer wanted
        let mut by_path: HashMap<String, (Path, Vec<RequestId>)> = HashMap::new();
        for request in self.audio.values_mut() {
            if request.cancelled || (anchor_lo..=anchor_hi).contains(&request.anchor) {
                continue;
            }
            request.cancelled = true;
            by_path
                .entry(request.path.to_string())
                .or_insert_with(|| (request.path.clone(), Vec::new()))
                .1
                .push(request.id);
        }
        let cancelled = self.cancel(by_path);

        for (clip_id, clip_range) in timeline.clips_in_range(TrackKind::Audio, &window) {
            let Some(clip) = timeline.clip(clip_id) else {
                continue;
            };
            if clip.gain() <= 0.0 {
                continue;
            }
            let start = if clip_range.start() > window_start { clip_range.start() } else { window_start };
            let end_time = clip_range.end_time_exclusive();
            let end = if end_time < window_end { end_time } else { window_end };
            let (Some(media_start), Some(media_end)) = (timeline.media_time(clip_id, start), timeline.media_time(clip_id, end))
            else {
                continue;
            };
            let first = media_start.to_seconds().floor() as i64;
            let last = (media_end.to_seconds() - 1e-9).floor() as i64;
            for seconds in first.max(0)..=last {
                let key = AudioKey::new(&clip.path, seconds);
                if self.audio.contains_key(&key)
                    || self.failed_audio.contains_key(&key)
                    || self.cache.contains_audio(&key)
                {
                    continue;
                }
                let (id, future) = self.readers.get(&clip.path).read_audio(seconds);
                let anchor = (start.to_seconds() + (seconds as f64 - media_start.to_seconds())).floor() as i64;
                self.audio.insert(
                    key,
                    InFlight {
                        path: clip.path.clone(),
                        id,
                        future,
                        anchor: anchor.clamp(anchor_lo, anchor_hi),
                        epoch,
                        cancelled: false,
                    },
                );
                *requested += 1;
            }
        }
        cancelled
    }

    /// Insert finished requests; returns the number inserted. Empty
    /// results of live requests from the current epoch are remembered.
    fn poll(&mut self) -> usize {
        let mut inserted = 0;
        let epoch = self.manager.current_epoch();
        let cache = &self.cache;
        let failed_video = &mut self.failed_video;
        let failed_audio = &mut self.failed_audio;

        self.video.retain(|key, request| match request.future.try_get() {
            Some(data) => {
                match data.image {
                    Some(image) => {
                        if cache.insert_video(key.clone(), image) {
                            inserted += 1;
                        }
                    }
                    None if !request.cancelled && request.epoch == epoch => {
                        debug!("ReadAhead: {} frame {} failed, skipped until seek", key.path, key.frame);
                        failed_video.insert(key.clone(), epoch);
                    }
                    None => {}
                }
                false
            }
            None => true,
        });

        self.audio.retain(|key, request| match request.future.try_get() {
            Some(data) => {
                match data.audio {
                    Some(audio) => {
                        if cache.insert_audio(key.clone(), audio) {
                            inserted += 1;
                        }
                    }
                    None if !request.cancelled && request.epoch == epoch => {
                        debug!("ReadAhead: {} second {} failed, skipped until seek", key.path, key.seconds);
                        failed_audio.insert(key.clone(), epoch);
                    }
                    None => {}
                }
                false
            }
            None => true,
        });

        inserted
    }

    /// Timeline frames possibly resident: cached keys mapped back through
    /// every clip in `range`, plus transition overlaps (clamped reads).
    fn candidate_frames(&self, timeline: &Timeline, range: &TimeRange) -> (BTreeSet<i64>, BTreeSet<i64>) {
        let rate = timeline.rate();
        let first = range.start().to_frames_at(rate);
        let last = range.end_time_inclusive().to_frames_at(rate);

        let mut video_keys: HashMap<String, Vec<RationalTime>> = HashMap::new();
        for key in self.cache.video_keys() {
            if key.layer == 0 && key.options == self.read_options {
                video_keys.entry(key.path.clone()).or_default().push(key.time());
            }
        }
        let mut audio_keys: HashMap<String, Vec<i64>> = HashMap::new();
        for key in self.cache.audio_keys() {
            audio_keys.entry(key.path).or_default().push(key.seconds);
        }

        // Timeline frames showing media `[offset, offset + span)` seconds
        // into the clip placed at `clip`, widened by a frame on each side
        let span_frames = |out: &mut BTreeSet<i64>, clip: &TimeRange, offset: f64, span: f64| {
            let lo = clip.start().to_frames_at(rate).max(first);
            let hi = clip.end_time_inclusive().to_frames_at(rate).min(last);
            let start = clip.start().to_seconds() + offset;
            let a = (start * rate).floor() as i64 - 1;
            let b = ((start + span) * rate).ceil() as i64 + 1;
            out.extend(a.max(lo)..=b.min(hi));
        };

        let mut video = BTreeSet::new();
        for (clip_id, clip_range) in timeline.clips_in_range(TrackKind::Video, range) {
            let Some(clip) = timeline.clip(clip_id) else {
                continue;
            };
            let Some(times) = video_keys.get(&clip.path.to_string()) else {
                continue;
            };
            let trimmed = &clip.trimmed_range;
            for media in times {
                if *media < trimmed.start() || *media > trimmed.end_time_inclusive() {
                    continue;
                }
                let offset = media.to_seconds() - trimmed.start().to_seconds();
                span_frames(&mut video, &clip_range, offset, 1.0 / media.rate());
            }
        }
        for overlap in timeline.transitions_in_range(TrackKind::Video, range) {
            let lo = overlap.start().to_frames_at(rate).max(first);
            let hi = overlap.end_time_inclusive().to_frames_at(rate).min(last);
            video.extend(lo..=hi);
        }

        let mut audio = BTreeSet::new();
        for (clip_id, clip_range) in timeline.clips_in_range(TrackKind::Audio, range) {
            let Some(clip) = timeline.clip(clip_id) else {
                continue;
            };
            let Some(seconds) = audio_keys.get(&clip.path.to_string()) else {
                continue;
            };
            let trim_start = clip.trimmed_range.start().to_seconds();
            for s in seconds {
                span_frames(&mut audio, &clip_range, *s as f64 - trim_start, 1.0);
            }
        }
        (video, audio)
    }

    /// Every video clip contributing at `time` is cached.
    fn video_resident(&self, timeline: &Timeline, time: RationalTime) -> bool {
        let mut any = false;
        for sample in timeline.video_samples(time) {
            for clip_sample in &sample.clips {
                if let Some(clip) = timeline.clip(clip_sample.clip) {
                    any = true;
                    let key = FrameKey::new(&clip.path, clip_sample.media_time, 0, &self.read_options);
                    if !self.cache.contains_video(&key) {
                        return false;
                    }
                }
            }
        }
        any
    }

    /// Every audio clip playing during the frame at `time` has its second cached.
    fn audio_resident(&self, timeline: &Timeline, time: RationalTime) -> bool {
        let frame = TimeRange::new(time, RationalTime::new(1.0, timeline.rate()));
        let mut any = false;
        for (clip_id, _) in timeline.clips_in_range(TrackKind::Audio, &frame) {
            let (Some(clip), Some(media)) = (timeline.clip(clip_id), timeline.media_time(clip_id, time)) else {
                continue;
            };
            any = true;
            if !self.cache.contains_audio(&AudioKey::new(&clip.path, media.to_seconds().floor() as i64)) {
                return false;
            }
        }
        any
    }

    /// Frames of `range` fully resident (every contributing clip cached).
    fn compute_cache_info(&self, timeline: &Timeline, range: &TimeRange) -> PlayerCacheInfo {
        let rate = timeline.rate();
        let (video, audio) = self.candidate_frames(timeline, range);
        let video: BTreeSet<i64> = video
            .into_iter()
            .filter(|f| self.video_resident(timeline, RationalTime::from_frames(*f, rate)))
            .collect();
        let audio: BTreeSet<i64> = audio
            .into_iter()
            .filter(|f| self.audio_resident(timeline, RationalTime::from_frames(*f, rate)))
            .collect();

        PlayerCacheInfo {
            video: frames_to_ranges(&video, rate),
            audio: frames_to_ranges(&audio, rate),
            video_percentage: self.cache.video_percentage(),
            audio_percentage: self.cache.audio_percentage(),
        }
    }

    /// Cancel everything and forget all in-flight requests.
    pub fn clear(&mut self) {
        let mut by_path: HashMap<String, (Path, Vec<RequestId>)> = HashMap::new();
        for request in self.video.values().filter(|r| !r.cancelled) {
            by_path
                .entry(request.path.to_string())
                .or_insert_with(|| (request.path.clone(), Vec::new()))
                .1
                .push(request.id);
        }
        for request in self.audio.values().filter(|r| !r.cancelled) {
            by_path
                .entry(request.path.to_string())
                .or_insert_with(|| (request.path.clone(), Vec::new()))
                .1
                .push(request.id);
        }
        let cancelled = self.cancel(by_path);
        self.video.clear();
        self.audio.clear();
        self.failed_video.clear();
        self.failed_audio.clear();
        self.last_frame = None;
        self.dirty = true;
        debug!("ReadAhead cleared ({} cancelled)", cancelled);
    }

    /// Force a cache info refresh on the next tick.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }
}

impl Drop for ReadAheadScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

trait TimeBounds {
    fn max_with(self, other: Self) -> Self;
    fn min_with(self, other: Self) -> Self;
}

impl TimeBounds for RationalTime {
    fn max_with(self, other: Self) -> Self {
        if other > self { other.rescaled_to(self.rate()) } else { self }
    }

    fn min_with(self, other: Self) -> Self {
        if other < self { other.rescaled_to(self.rate()) } else { self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pattern::{PatternDecoderFactory, PatternMedia};
    use crate::core::reader::{ReaderOptions, ReaderState};
    use crate::core::workers::Workers;
    use crate::entities::timeline::Clip;
    use std::time::{Duration, Instant};

    struct Fixture {
        timeline: Timeline,
        scheduler: ReadAheadScheduler,
        cache: Arc<FrameCache>,
        readers: Arc<ReaderPool>,
        factory: Arc<PatternDecoderFactory>,
    }

    fn fixture(factory: PatternDecoderFactory, options: ReadAheadOptions) -> Fixture {
        let mut timeline = Timeline::new("edit", 24.0);
        let v1 = timeline.add_track(TrackKind::Video, "V1");
        timeline
            .append_clip(v1, "a", Clip::new(Path::new("/a.mov"), TimeRange::from_frames(0, 99, 24.0)))
            .unwrap();

        let factory = Arc::new(factory);
        let workers = Arc::new(Workers::new(2));
        let readers = Arc::new(ReaderPool::new(
            Arc::clone(&factory) as Arc<_>,
            workers,
            ReaderOptions {
                thread_count: 2,
                ..Default::default()
            },
            8,
        ));
        let manager = Arc::new(CacheManager::with_limit(1 << 30));
        let cache = Arc::new(FrameCache::new(Arc::clone(&manager), 1 << 24, 1 << 24));
        let scheduler = ReadAheadScheduler::new(Arc::clone(&readers), Arc::clone(&cache), manager, options);
        Fixture {
            timeline,
            scheduler,
            cache,
            readers,
            factory,
        }
    }

    fn frames_options() -> ReadAheadOptions {
        // 3 frames ahead, 1 behind at 24 fps
        ReadAheadOptions {
            read_ahead: 3.0 / 24.0,
            read_behind: 1.0 / 24.0,
            audio_read_ahead: 0.0,
            audio_read_behind: 0.0,
        }
    }

    fn still_options() -> ReadAheadOptions {
        ReadAheadOptions {
            read_ahead: 0.0,
            read_behind: 0.0,
            audio_read_ahead: 0.0,
            audio_read_behind: 0.0,
        }
    }

    fn key(frame: i64) -> FrameKey {
        key_of("/a.mov", frame)
    }

    fn key_of(path: &str, frame: i64) -> FrameKey {
        FrameKey::new(&Path::new(path), RationalTime::from_frames(frame, 24.0), 0, &ReadOptions::default())
    }

    fn image() -> Arc<crate::entities::Image> {
        Arc::new(crate::entities::Image::filled_u8(8, 4, [0, 0, 0, 255]))
    }

    /// Tick at `frame` until nothing is in flight.
    fn settle(f: &mut Fixture, frame: i64, direction: Direction) {
        let range = f.timeline.time_range();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            f.scheduler.tick(&f.timeline, t(frame), direction, &range);
            if f.scheduler.in_flight() == 0 || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn t(frame: i64) -> RationalTime {
        RationalTime::from_frames(frame, 24.0)
    }

    #[test]
    fn test_window_forward_and_reverse() {
        let f = fixture(PatternDecoderFactory::new(PatternMedia::default()), frames_options());
        let range = f.timeline.time_range();
        assert_eq!(f.scheduler.video_window(t(10), Direction::Forward, &range, 24.0), (9, 13));
        assert_eq!(f.scheduler.video_window(t(10), Direction::Reverse, &range, 24.0), (7, 11));
        // Clipped to the range
        assert_eq!(f.scheduler.video_window(t(0), Direction::Forward, &range, 24.0), (0, 3));
        assert_eq!(f.scheduler.video_window(t(99), Direction::Forward, &range, 24.0), (98, 99));
    }

    #[test]
    fn test_requests_exact_window() {
        let (_gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
        let mut f = fixture(
            PatternDecoderFactory::new(PatternMedia::default()).with_gate(gate_rx),
            frames_options(),
        );
        let range = f.timeline.time_range();
        let report = f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
        assert_eq!(report.requested, 5);
        assert_eq!(f.scheduler.requested_frames(), vec![9, 10, 11, 12, 13]);

        // Nothing new while all are in flight
        let report = f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
        assert_eq!(report.requested, 0);
    }

    #[test]
    fn test_reverse_requests_mirrored_window() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
        let mut f = fixture(
            PatternDecoderFactory::new(PatternMedia::default()).with_gate(gate_rx),
            frames_options(),
        );
        let range = f.timeline.time_range();
        let report = f.scheduler.tick(&f.timeline, t(10), Direction::Reverse, &range);
        assert_eq!(report.requested, 5);
        assert_eq!(f.scheduler.requested_frames(), vec![7, 8, 9, 10, 11]);

        // One frame back: 11 leaves the window, 6 enters
        let report = f.scheduler.tick(&f.timeline, t(9), Direction::Reverse, &range);
        assert_eq!(report.requested, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(f.scheduler.requested_frames(), vec![6, 7, 8, 9, 10]);

        // Clipped at the start of the range
        let report = f.scheduler.tick(&f.timeline, t(1), Direction::Reverse, &range);
        assert_eq!(report.cancelled, 5);
        assert_eq!(f.scheduler.requested_frames(), vec![0, 1, 2]);
        drop(gate_tx);
    }

    #[test]
    fn test_resident_frames_not_requested() {
        let mut f = fixture(PatternDecoderFactory::new(PatternMedia::default()), frames_options());
        f.cache
            .insert_video(key(11), Arc::new(crate::entities::Image::filled_u8(8, 4, [11, 0, 0, 255])));
        let range = f.timeline.time_range();
        f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
        assert_eq!(f.scheduler.requested_frames(), vec![9, 10, 12, 13]);
    }

    #[test]
    fn test_fills_cache_and_publishes_info() {
        let mut f = fixture(PatternDecoderFactory::new(PatternMedia::default()), frames_options());
        let range = f.timeline.time_range();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut changed = false;
        while Instant::now() < deadline {
            let report = f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
            changed |= report.cache_info_changed;
            if f.cache.video_len() == 5 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
        assert!(changed);
        assert_eq!(f.cache.video_len(), 5);
        assert_eq!(f.scheduler.cache_info().video, vec![TimeRange::from_frames(9, 13, 24.0)]);
        assert_eq!(f.factory.video_decodes(), 5);
    }

    #[test]
    fn test_seek_cancels_queued_requests() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let mut f = fixture(
            PatternDecoderFactory::new(PatternMedia::default()).with_gate(gate_rx),
            frames_options(),
        );
        let range = f.timeline.time_range();
        f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
        // Nearest first: 10 and 11 go to the two decode slots
        let reader = f.readers.get(&Path::new("/a.mov"));
        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.state() != ReaderState::Decoding(2) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        let report = f.scheduler.tick(&f.timeline, t(60), Direction::Forward, &range);
        assert_eq!(report.cancelled, 5);
        assert_eq!(f.scheduler.requested_frames(), vec![59, 60, 61, 62, 63]);

        for _ in 0..32 {
            gate_tx.send(()).unwrap();
        }
        settle(&mut f, 60, Direction::Forward);

        // Frames already decoding when the window moved still land
        let mut old: Vec<i64> = f
            .cache
            .video_keys()
            .into_iter()
            .filter(|k| k.frame < 20)
            .map(|k| k.frame)
            .collect();
        old.sort_unstable();
        assert_eq!(old, vec![10, 11]);
        for frame in 59..=63 {
            assert!(f.cache.contains_video(&key(frame)));
        }
        assert_eq!(f.factory.video_decodes(), 7);
    }

    #[test]
    fn test_failed_frame_not_rerequested_until_seek() {
        let mut f = fixture(
            PatternDecoderFactory::new(PatternMedia::default()).with_panic_frame(10),
            still_options(),
        );
        let range = f.timeline.time_range();
        settle(&mut f, 10, Direction::Forward);
        for _ in 0..50 {
            let report = f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
            assert_eq!(report.requested, 0);
        }
        assert_eq!(f.factory.video_decodes(), 1);
        assert!(!f.cache.contains_video(&key(10)));
        assert!(f.scheduler.requested_frames().is_empty());

        // A seek away and back retries once
        settle(&mut f, 50, Direction::Forward);
        settle(&mut f, 10, Direction::Forward);
        assert_eq!(f.factory.video_decodes(), 3);

        // So does clear()
        f.scheduler.clear();
        settle(&mut f, 10, Direction::Forward);
        assert_eq!(f.factory.video_decodes(), 4);
    }

    #[test]
    fn test_audio_seconds_requested() {
        let mut timeline = Timeline::new("edit", 24.0);
        let a1 = timeline.add_track(TrackKind::Audio, "A1");
        timeline
            .append_clip(a1, "a", Clip::new(Path::new("/a.wav"), TimeRange::from_frames(0, 239, 24.0)))
            .unwrap();
        let mut f = fixture(
            PatternDecoderFactory::new(PatternMedia::default()),
            ReadAheadOptions {
                read_ahead: 0.0,
                read_behind: 0.0,
                audio_read_ahead: 2.0,
                audio_read_behind: 0.0,
            },
        );
        f.timeline = timeline;
        let range = f.timeline.time_range();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            f.scheduler.tick(&f.timeline, t(24), Direction::Forward, &range);
            if f.cache.audio_len() == 2 && f.scheduler.in_flight() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        // [1s, 3s) -> seconds 1 and 2
        assert!(f.cache.contains_audio(&AudioKey::new(&Path::new("/a.wav"), 1)));
        assert!(f.cache.contains_audio(&AudioKey::new(&Path::new("/a.wav"), 2)));
        assert!(!f.cache.contains_audio(&AudioKey::new(&Path::new("/a.wav"), 0)));
    }

    #[test]
    fn test_cache_info_maps_cached_keys() {
        let mut timeline = Timeline::new("edit", 24.0);
        let v1 = timeline.add_track(TrackKind::Video, "V1");
        timeline
            .append_clip(v1, "a", Clip::new(Path::new("/a.mov"), TimeRange::from_frames(0, 99, 24.0)))
            .unwrap();
        // Timeline 100..199 shows media 50..149
        timeline
            .append_clip(v1, "b", Clip::new(Path::new("/b.mov"), TimeRange::from_frames(50, 149, 24.0)))
            .unwrap();
        let mut f = fixture(PatternDecoderFactory::new(PatternMedia::default()), still_options());
        f.timeline = timeline;
        for frame in 10..=19 {
            f.cache.insert_video(key(frame), image());
        }
        for frame in (50..=54).chain([60]) {
            f.cache.insert_video(key_of("/b.mov", frame), image());
        }
        // Outside the trimmed range of b
        f.cache.insert_video(key_of("/b.mov", 10), image());

        let range = f.timeline.time_range();
        let report = f.scheduler.tick(&f.timeline, t(10), Direction::Forward, &range);
        assert_eq!(report.requested, 0);
        assert_eq!(
            f.scheduler.cache_info().video,
            vec![
                TimeRange::from_frames(10, 19, 24.0),
                TimeRange::from_frames(100, 104, 24.0),
                TimeRange::from_frames(110, 110, 24.0)
            ]
        );
    }

    #[test]
    fn test_cache_info_on_long_timeline() {
        // Two hours at 24 fps
        let frames = 172_800;
        let mut timeline = Timeline::new("feature", 24.0);
        let v1 = timeline.add_track(TrackKind::Video, "V1");
        timeline
            .append_clip(v1, "a", Clip::new(Path::new("/a.mov"), TimeRange::from_frames(0, frames - 1, 24.0)))
            .unwrap();
        let a1 = timeline.add_track(TrackKind::Audio, "A1");
        timeline
            .append_clip(a1, "a", Clip::new(Path::new("/a.wav"), TimeRange::from_frames(0, frames - 1, 24.0)))
            .unwrap();
        let media = PatternMedia {
            frames: frames + 1,
            ..Default::default()
        };
        let mut f = fixture(PatternDecoderFactory::new(media), frames_options());
        f.timeline = timeline;
        f.cache.insert_audio(
            AudioKey::new(&Path::new("/a.wav"), 4000),
            Arc::new(crate::entities::AudioBuffer::from_f32(2, 48000, vec![0.0; 96000])),
        );

        settle(&mut f, 96_000, Direction::Forward);
        let range = f.timeline.time_range();
        f.scheduler.invalidate();
        let started = Instant::now();
        f.scheduler.tick(&f.timeline, t(96_000), Direction::Forward, &range);
        assert!(started.elapsed() < Duration::from_millis(500), "tick took {:?}", started.elapsed());

        let info = f.scheduler.cache_info();
        assert_eq!(info.video, vec![TimeRange::from_frames(95_999, 96_003, 24.0)]);
        // Second 4000 covers frames 96000..96023
        assert_eq!(info.audio, vec![TimeRange::from_frames(96_000, 96_023, 24.0)]);
    }

    #[test]
    fn test_frames_to_ranges() {
        let frames: BTreeSet<i64> = [1, 2, 3, 7, 8, 10].into_iter().collect();
        let ranges = frames_to_ranges(&frames, 24.0);
        assert_eq!(
            ranges,
            vec![
                TimeRange::from_frames(1, 3, 24.0),
                TimeRange::from_frames(7, 8, 24.0),
                TimeRange::from_frames(10, 10, 24.0)
            ]
        );
    }
}
