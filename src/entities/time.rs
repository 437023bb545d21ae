//! Rational time and time ranges.
//!
//! `RationalTime` is a `(value, rate)` pair: value 48 at rate 24 is two seconds.
//! `TimeRange` is `(start, duration)`. Both are small `Copy` values.
//!
//! Comparisons rescale the right-hand side to the left-hand rate, so
//! `RationalTime::new(24.0, 24.0) == RationalTime::new(48.0, 48.0)`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Tolerance used when comparing rescaled values.
const EPSILON: f64 = 1e-9;

/// Exact time as `(value, rate)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RationalTime {
    value: f64,
    rate: f64,
}

impl RationalTime {
    pub const fn new(value: f64, rate: f64) -> Self {
        Self { value, rate }
    }

    /// Marker for "no time" (rate 0).
    pub const fn invalid() -> Self {
        Self { value: 0.0, rate: 0.0 }
    }

    pub fn from_frames(frame: i64, rate: f64) -> Self {
        Self::new(frame as f64, rate)
    }

    pub fn from_seconds(seconds: f64, rate: f64) -> Self {
        Self::new(seconds * rate, rate)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_valid(&self) -> bool {
        self.rate > 0.0
    }

    /// Value expressed at another rate.
    pub fn value_rescaled_to(&self, rate: f64) -> f64 {
        if self.rate == rate || self.rate <= 0.0 {
            self.value
        } else {
            self.value * rate / self.rate
        }
    }

    pub fn rescaled_to(&self, rate: f64) -> Self {
        Self::new(self.value_rescaled_to(rate), rate)
    }

    pub fn to_seconds(&self) -> f64 {
        if self.rate > 0.0 { self.value / self.rate } else { 0.0 }
    }

    /// Whole frame index at the time's own rate (rounded down).
    pub fn to_frames(&self) -> i64 {
        (self.value + EPSILON).floor() as i64
    }

    /// Whole frame index at `rate` (rounded down).
    pub fn to_frames_at(&self, rate: f64) -> i64 {
        (self.value_rescaled_to(rate) + EPSILON).floor() as i64
    }

    pub fn floor(&self) -> Self {
        Self::new((self.value + EPSILON).floor(), self.rate)
    }

    pub fn round(&self) -> Self {
        Self::new(self.value.round(), self.rate)
    }

    /// Timecode-style display `HH:MM:SS:FF`.
    pub fn to_timecode(&self) -> String {
        if !self.is_valid() {
            return "--:--:--:--".to_string();
        }
        let fps = self.rate.round().max(1.0) as i64;
        let total = self.to_frames();
        let sign = if total < 0 { "-" } else { "" };
        let total = total.abs();
        let frames = total % fps;
        let seconds = total / fps;
        format!(
            "{}{:02}:{:02}:{:02}:{:02}",
            sign,
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60,
            frames
        )
    }

    /// Parse `HH:MM:SS:FF` (or `HH:MM:SS;FF`) at `rate`.
    pub fn from_timecode(timecode: &str, rate: f64) -> Result<Self, TimeError> {
        if rate <= 0.0 {
            return Err(TimeError::InvalidRate(rate));
        }
        let trimmed = timecode.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let fields: Vec<&str> = body.split([':', ';']).collect();
        if fields.len() != 4 {
            return Err(TimeError::InvalidTimecode(timecode.to_string()));
        }
        let mut parts = [0i64; 4];
        for (slot, field) in parts.iter_mut().zip(&fields) {
            *slot = field
                .parse()
                .map_err(|_| TimeError::InvalidTimecode(timecode.to_string()))?;
        }
        let fps = rate.round().max(1.0) as i64;
        let [h, m, s, f] = parts;
        if m >= 60 || s >= 60 || f >= fps {
            return Err(TimeError::InvalidTimecode(timecode.to_string()));
        }
        let frames = ((h * 60 + m) * 60 + s) * fps + f;
        Ok(Self::from_frames(if negative { -frames } else { frames }, rate))
    }

    fn aligned(self, other: Self) -> f64 {
        if other.rate == self.rate || self.rate <= 0.0 {
            other.value
        } else {
            other.value_rescaled_to(self.rate)
        }
    }
}

/// Time parsing errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeError {
    InvalidRate(f64),
    InvalidTimecode(String),
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeError::InvalidRate(rate) => write!(f, "Invalid rate: {}", rate),
            TimeError::InvalidTimecode(tc) => write!(f, "Invalid timecode: '{}'", tc),
        }
    }
}

impl std::error::Error for TimeError {}

impl Default for RationalTime {
    fn default() -> Self {
        Self::invalid()
    }
}

impl PartialEq for RationalTime {
    fn eq(&self, other: &Self) -> bool {
        (self.value - self.aligned(*other)).abs() < EPSILON
    }
}

impl PartialOrd for RationalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let rhs = self.aligned(*other);
        if (self.value - rhs).abs() < EPSILON {
            Some(Ordering::Equal)
        } else {
            self.value.partial_cmp(&rhs)
        }
    }
}

impl Add for RationalTime {
    type Output = RationalTime;

    fn add(self, rhs: Self) -> Self::Output {
        if !self.is_valid() {
            return rhs;
        }
        Self::new(self.value + self.aligned(rhs), self.rate)
    }
}

impl Sub for RationalTime {
    type Output = RationalTime;

    fn sub(self, rhs: Self) -> Self::Output {
        if !self.is_valid() {
            return -rhs;
        }
        Self::new(self.value - self.aligned(rhs), self.rate)
    }
}

impl Neg for RationalTime {
    type Output = RationalTime;

    fn neg(self) -> Self::Output {
        Self::new(-self.value, self.rate)
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value, self.rate)
    }
}

/// `(start, duration)` time range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    start: RationalTime,
    duration: RationalTime,
}

impl TimeRange {
    pub const fn new(start: RationalTime, duration: RationalTime) -> Self {
        Self { start, duration }
    }

    /// Range of whole frames `first..=last` at `rate`.
    pub fn from_frames(first: i64, last: i64, rate: f64) -> Self {
        Self::new(
            RationalTime::from_frames(first, rate),
            RationalTime::from_frames(last - first + 1, rate),
        )
    }

    pub fn start(&self) -> RationalTime {
        self.start
    }

    pub fn duration(&self) -> RationalTime {
        self.duration
    }

    pub fn rate(&self) -> f64 {
        self.start.rate()
    }

    pub fn is_valid(&self) -> bool {
        self.start.is_valid()
    }

    pub fn end_time_exclusive(&self) -> RationalTime {
        self.start + self.duration
    }

    pub fn end_time_inclusive(&self) -> RationalTime {
        let end = self.end_time_exclusive();
        let one = RationalTime::new(1.0, self.duration.rate().max(self.start.rate()));
        if (end - self.start) > one {
            end - one
        } else {
            self.start
        }
    }

    /// Duration in whole frames at the start rate.
    pub fn frame_count(&self) -> i64 {
        self.duration.value_rescaled_to(self.start.rate()).round() as i64
    }

    pub fn first_frame(&self) -> i64 {
        self.start.to_frames()
    }

    pub fn last_frame(&self) -> i64 {
        self.end_time_inclusive().to_frames_at(self.start.rate())
    }

    pub fn contains(&self, time: RationalTime) -> bool {
        time >= self.start && time < self.end_time_exclusive()
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end_time_exclusive() && other.start < self.end_time_exclusive()
    }

    /// Clamp a time into `[start, end_inclusive]`.
    pub fn clamped(&self, time: RationalTime) -> RationalTime {
        if time < self.start {
            self.start.rescaled_to(time.rate())
        } else if time > self.end_time_inclusive() {
            self.end_time_inclusive().rescaled_to(time.rate())
        } else {
            time
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} +{}]", self.start, self.duration)
    }
}
