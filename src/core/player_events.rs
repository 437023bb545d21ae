//! Player change notifications.
//!
//! Emitted on the `EventBus` only when the value actually changed.

use std::sync::Arc;

use super::player::{Loop, Playback};
use super::read_ahead::PlayerCacheInfo;
use crate::entities::{CompareOptions, CompositeFrame, RationalTime, TimeRange};

// === Time ===

#[derive(Clone, Debug, PartialEq)]
pub struct CurrentTimeChanged {
    pub time: RationalTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InOutRangeChanged(pub TimeRange);

// === Playback Control ===

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackChanged(pub Playback);

#[derive(Clone, Debug, PartialEq)]
pub struct LoopChanged(pub Loop);

#[derive(Clone, Debug, PartialEq)]
pub struct SpeedChanged(pub f64);

// === Audio ===

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeChanged(pub f32);

#[derive(Clone, Debug, PartialEq)]
pub struct MuteChanged(pub bool);

#[derive(Clone, Debug, PartialEq)]
pub struct AudioOffsetChanged(pub f64);

// === Output ===

#[derive(Clone, Debug, PartialEq)]
pub struct CacheInfoChanged(pub PlayerCacheInfo);

/// New composite for the viewer; `frame.complete` is false while some
/// layer is still decoding.
#[derive(Clone, Debug)]
pub struct CurrentVideoChanged {
    pub frame: Arc<CompositeFrame>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompareChanged(pub CompareOptions);
