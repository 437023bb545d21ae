//! Core engine modules - readers, cache, read-ahead, audio, player
//!
//! These modules form the playback engine, independent of any UI.

pub mod audio_mixer;
pub mod cache_man;
pub mod context;
pub mod event_bus;
pub mod frame_cache;
pub mod lru_cache;
pub mod pattern;
pub mod player;
pub mod player_events;
pub mod promise;
pub mod read_ahead;
pub mod reader;
pub mod resampler;
pub mod workers;

// Re-exports for convenience
pub use audio_mixer::{AudioDevice, AudioMixer, AudioSystem, DeviceError, DeviceInfo, NullAudioSystem};
pub use cache_man::CacheManager;
pub use context::Context;
pub use event_bus::{EventBus, EventEmitter};
pub use frame_cache::{AudioKey, CacheStats, FrameCache, FrameKey};
pub use pattern::{PatternDecoderFactory, PatternMedia};
pub use player::{Loop, Playback, Player, PlayerOptions, TimeAction};
pub use promise::{Future, Promise};
pub use read_ahead::{Direction, PlayerCacheInfo, ReadAheadOptions, ReadAheadScheduler};
pub use reader::{DecodeError, DecoderFactory, MediaDecoder, OpenError, Reader, ReaderOptions, ReaderPool, RequestId};
pub use resampler::Resampler;
pub use workers::Workers;
