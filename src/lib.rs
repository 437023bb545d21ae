//! PLAYA engine - timeline playback library
//!
//! Decoding, frame caching, read-ahead, compositing and audio mixing for
//! timeline playback. Re-exports the main types for binary targets.

// Core engine (readers, cache, audio, player)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod utils;

// Re-export commonly used types from core
pub use core::context::Context;
pub use core::event_bus::{downcast_event, BoxedEvent, EventBus, EventEmitter};
pub use core::frame_cache::FrameCache;
pub use core::player::{Loop, Playback, Player};

// Re-export entities
pub use entities::{Clip, CompositeFrame, Path, RationalTime, TimeRange, Timeline, TrackKind};
