//! Entities module - plain data types shared by the engine.
//!
//! Nothing in here spawns threads or takes locks; the `core` module owns
//! all concurrency and hands these types around behind `Arc`.

pub mod audio;
pub mod compare;
pub mod compositor;
pub mod media;
pub mod path;
pub mod time;
pub mod timeline;

pub use audio::{AudioBuffer, AudioInfo, SampleData, SampleType};
pub use compare::{CompareMode, CompareOptions, Rect};
pub use compositor::{CompositeFrame, Compositor, CpuCompositor, FrameSource, LayerBlend, OutputLayer};
pub use media::{AudioData, Image, ImageInfo, Info, PixelBuffer, PixelFormat, ReadOptions, VideoData};
pub use path::Path;
pub use time::{RationalTime, TimeError, TimeRange};
pub use timeline::{Clip, NodeId, Timeline, TimelineError, TrackKind, Transition};
