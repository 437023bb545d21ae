//! Timeline structure: stack -> tracks -> clips/gaps/transitions.
//!
//! # Architecture
//!
//! Nodes live in one arena (`Vec<Node>`) and refer to each other by
//! `NodeId`. Parents keep an ordered child list, children keep their parent
//! id; there are no owning back-pointers.
//!
//! # Coordinate Systems
//!
//! - Timeline time: `global_start + offset`, at the timeline rate
//! - Media time: a clip's `trimmed_range`, at the media rate
//!
//! Items in a track are laid end to end. Transitions take no track time;
//! they overlap the cut between the clip before and the clip after by
//! `in_offset` / `out_offset`.

use log::trace;
use std::fmt;

use super::path::Path;
use super::time::{RationalTime, TimeRange};

/// Stable node handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Media reference with trimmed source range.
#[derive(Clone, Debug, PartialEq)]
pub struct Clip {
    pub path: Path,
    /// Used portion of the media, in media time.
    pub trimmed_range: TimeRange,
    pub enabled: bool,
    pub audio_gain: f32,
    pub muted: bool,
}

impl Clip {
    pub fn new(path: Path, trimmed_range: TimeRange) -> Self {
        Self {
            path,
            trimmed_range,
            enabled: true,
            audio_gain: 1.0,
            muted: false,
        }
    }

    pub fn media_rate(&self) -> f64 {
        self.trimmed_range.rate()
    }

    /// Effective gain (mute -> 0).
    pub fn gain(&self) -> f32 {
        if self.muted || !self.enabled { 0.0 } else { self.audio_gain }
    }
}

/// Dissolve between the neighbouring clips.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub in_offset: RationalTime,
    pub out_offset: RationalTime,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Stack,
    Track(TrackKind),
    Clip(Clip),
    Gap(RationalTime),
    Transition(Transition),
}

#[derive(Clone, Debug)]
pub struct Node {
    name: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Timeline editing errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineError {
    NotATrack(NodeId),
    TransitionWithoutClip(NodeId),
    InvalidRange(String),
}

impl fmt::Display for TimelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineError::NotATrack(id) => write!(f, "Node {:?} is not a track", id),
            TimelineError::TransitionWithoutClip(id) => {
                write!(f, "Transition in track {:?} must follow a clip", id)
            }
            TimelineError::InvalidRange(e) => write!(f, "Invalid range: {}", e),
        }
    }
}

impl std::error::Error for TimelineError {}

/// One clip's contribution at a given time.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipSample {
    pub clip: NodeId,
    pub media_time: RationalTime,
    /// Dissolve weight, 1.0 outside transitions.
    pub weight: f32,
}

/// All contributions of one track at a given time (0, 1 or 2 clips).
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSample {
    pub track: NodeId,
    pub clips: Vec<ClipSample>,
}

/// Arena-backed timeline.
#[derive(Clone, Debug)]
pub struct Timeline {
    name: String,
    rate: f64,
    global_start: RationalTime,
    nodes: Vec<Node>,
    root: NodeId,
}

impl Timeline {
    pub fn new(name: impl Into<String>, rate: f64) -> Self {
        let root = Node {
            name: "tracks".to_string(),
            kind: NodeKind::Stack,
            parent: None,
            children: Vec::new(),
        };
        Self {
            name: name.into(),
            rate,
            global_start: RationalTime::new(0.0, rate),
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn global_start(&self) -> RationalTime {
        self.global_start
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn clip(&self, id: NodeId) -> Option<&Clip> {
        match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::Clip(clip)) => Some(clip),
            _ => None,
        }
    }

    pub fn clip_mut(&mut self, id: NodeId) -> Option<&mut Clip> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Clip(clip)) => Some(clip),
            _ => None,
        }
    }

    fn push(&mut self, parent: NodeId, name: String, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name,
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn check_track(&self, track: NodeId) -> Result<(), TimelineError> {
        match self.node(track).map(|n| &n.kind) {
            Some(NodeKind::Track(_)) => Ok(()),
            _ => Err(TimelineError::NotATrack(track)),
        }
    }

    pub fn add_track(&mut self, kind: TrackKind, name: impl Into<String>) -> NodeId {
        self.push(self.root, name.into(), NodeKind::Track(kind))
    }

    pub fn append_clip(
        &mut self,
        track: NodeId,
        name: impl Into<String>,
        clip: Clip,
    ) -> Result<NodeId, TimelineError> {
        self.check_track(track)?;
        if clip.trimmed_range.duration().value() <= 0.0 {
            return Err(TimelineError::InvalidRange(format!(
                "clip duration {}",
                clip.trimmed_range.duration()
            )));
        }
        Ok(self.push(track, name.into(), NodeKind::Clip(clip)))
    }

    pub fn append_gap(&mut self, track: NodeId, duration: RationalTime) -> Result<NodeId, TimelineError> {
        self.check_track(track)?;
        Ok(self.push(track, "gap".to_string(), NodeKind::Gap(duration)))
    }

    /// Add a transition after the last clip of `track`; the next appended
    /// clip becomes its outgoing side.
    pub fn append_transition(
        &mut self,
        track: NodeId,
        name: impl Into<String>,
        transition: Transition,
    ) -> Result<NodeId, TimelineError> {
        self.check_track(track)?;
        let last_is_clip = self.nodes[track.0]
            .children
            .last()
            .map(|id| matches!(self.nodes[id.0].kind, NodeKind::Clip(_)))
            .unwrap_or(false);
        if !last_is_clip {
            return Err(TimelineError::TransitionWithoutClip(track));
        }
        Ok(self.push(track, name.into(), NodeKind::Transition(transition)))
    }

    /// Track ids in stacking order (bottom first).
    pub fn tracks(&self) -> Vec<NodeId> {
        self.nodes[self.root.0].children.clone()
    }

    pub fn tracks_of_kind(&self, kind: TrackKind) -> Vec<NodeId> {
        self.nodes[self.root.0]
            .children
            .iter()
            .copied()
            .filter(|id| matches!(self.nodes[id.0].kind, NodeKind::Track(k) if k == kind))
            .collect()
    }

    /// Track time consumed by a node, at the timeline rate.
    fn item_duration(&self, id: NodeId) -> RationalTime {
        match &self.nodes[id.0].kind {
            NodeKind::Clip(clip) => clip.trimmed_range.duration().rescaled_to(self.rate),
            NodeKind::Gap(duration) => duration.rescaled_to(self.rate),
            NodeKind::Transition(_) => RationalTime::new(0.0, self.rate),
            NodeKind::Track(_) | NodeKind::Stack => self.track_duration(id),
        }
    }

    fn track_duration(&self, track: NodeId) -> RationalTime {
        let mut total = RationalTime::new(0.0, self.rate);
        for child in &self.nodes[track.0].children {
            if matches!(self.nodes[child.0].kind, NodeKind::Track(_)) {
                let d = self.item_duration(*child);
                if d > total {
                    total = d;
                }
            } else {
                total = total + self.item_duration(*child);
            }
        }
        total
    }

    /// Range of an item in timeline time.
    pub fn range_in_parent(&self, id: NodeId) -> Option<TimeRange> {
        let parent = self.node(id)?.parent?;
        if parent == self.root {
            return Some(TimeRange::new(self.global_start, self.item_duration(id)));
        }
        self.item_ranges(parent)
            .into_iter()
            .find(|(child, _)| *child == id)
            .map(|(_, range)| range)
    }

    /// Every child of `track` with its timeline range, in one pass.
    /// Transitions get an empty range at their cut.
    fn item_ranges(&self, track: NodeId) -> Vec<(NodeId, TimeRange)> {
        let Some(node) = self.node(track) else {
            return Vec::new();
        };
        let mut start = self.global_start;
        let mut out = Vec::with_capacity(node.children.len());
        for child in &node.children {
            let duration = self.item_duration(*child);
            out.push((*child, TimeRange::new(start, duration)));
            start = start + duration;
        }
        out
    }

    fn overlap(transition: &Transition, cut: RationalTime) -> TimeRange {
        TimeRange::new(cut - transition.in_offset, transition.in_offset + transition.out_offset)
    }

    pub fn duration(&self) -> RationalTime {
        self.track_duration(self.root)
    }

    /// Whole timeline range.
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.global_start, self.duration())
    }

    fn map_media(clip: &Clip, range: &TimeRange, time: RationalTime) -> RationalTime {
        let offset = (time - range.start()).rescaled_to(clip.media_rate());
        (clip.trimmed_range.start() + offset).floor()
    }

    fn clamp_media(clip: &Clip, media: RationalTime) -> RationalTime {
        let first = clip.trimmed_range.start();
        let last = clip.trimmed_range.end_time_inclusive().floor();
        if media < first {
            first
        } else if media > last {
            last
        } else {
            media
        }
    }

    /// Map timeline time to the clip's media time:
    /// `trimmed.start + rescale(time - range.start, media_rate)`, whole frames.
    pub fn media_time(&self, clip_id: NodeId, time: RationalTime) -> Option<RationalTime> {
        let clip = self.clip(clip_id)?;
        let range = self.range_in_parent(clip_id)?;
        Some(Self::map_media(clip, &range, time))
    }

    /// Clips of `track` contributing at `time`.
    pub fn track_sample(&self, track: NodeId, time: RationalTime) -> TrackSample {
        let mut sample = TrackSample {
            track,
            clips: Vec::new(),
        };
        let items = self.item_ranges(track);

        for (i, (child, cut)) in items.iter().enumerate() {
            let NodeKind::Transition(transition) = &self.nodes[child.0].kind else {
                continue;
            };
            let range = Self::overlap(transition, cut.start());
            if !range.contains(time) {
                continue;
            }
            let before = i.checked_sub(1).and_then(|j| items.get(j));
            let after = items.get(i + 1);
            let (Some((a, a_range)), Some((b, b_range))) = (before, after) else {
                continue;
            };
            let (Some(clip_a), Some(clip_b)) = (self.clip(*a), self.clip(*b)) else {
                continue;
            };
            let duration = range.duration().value_rescaled_to(self.rate);
            let position = (time - range.start()).value_rescaled_to(self.rate);
            let weight = if duration > 0.0 {
                (position / duration).clamp(0.0, 1.0) as f32
            } else {
                1.0
            };
            // A disabled side drops out and the other plays at full weight
            let sides = match (clip_a.enabled, clip_b.enabled) {
                (true, true) => vec![(*a, clip_a, a_range, 1.0 - weight), (*b, clip_b, b_range, weight)],
                (true, false) => vec![(*a, clip_a, a_range, 1.0)],
                (false, true) => vec![(*b, clip_b, b_range, 1.0)],
                (false, false) => Vec::new(),
            };
            for (clip_id, clip, clip_range, w) in sides {
                sample.clips.push(ClipSample {
                    clip: clip_id,
                    media_time: Self::clamp_media(clip, Self::map_media(clip, clip_range, time)),
                    weight: w,
                });
            }
            trace!("Transition {:?} at {}: weight {:.3}", child, time, weight);
            return sample;
        }

        for (child, range) in &items {
            let Some(clip) = self.clip(*child).filter(|c| c.enabled) else {
                continue;
            };
            if range.contains(time) {
                sample.clips.push(ClipSample {
                    clip: *child,
                    media_time: Self::map_media(clip, range, time),
                    weight: 1.0,
                });
                break;
            }
        }
        sample
    }

    /// Samples of every video track at `time`, bottom track first.
    pub fn video_samples(&self, time: RationalTime) -> Vec<TrackSample> {
        self.tracks_of_kind(TrackKind::Video)
            .into_iter()
            .map(|track| self.track_sample(track, time))
            .collect()
    }

    /// Clips of `kind` tracks overlapping `range`, with their timeline ranges.
    pub fn clips_in_range(&self, kind: TrackKind, range: &TimeRange) -> Vec<(NodeId, TimeRange)> {
        let mut out = Vec::new();
        for track in self.tracks_of_kind(kind) {
            for (child, clip_range) in self.item_ranges(track) {
                if self.clip(child).is_some() && clip_range.intersects(range) {
                    out.push((child, clip_range));
                }
            }
        }
        out
    }

    /// Transition overlaps of `kind` tracks intersecting `range`.
    pub fn transitions_in_range(&self, kind: TrackKind, range: &TimeRange) -> Vec<TimeRange> {
        let mut out = Vec::new();
        for track in self.tracks_of_kind(kind) {
            for (child, cut) in self.item_ranges(track) {
                if let NodeKind::Transition(t) = &self.nodes[child.0].kind {
                    let overlap = Self::overlap(t, cut.start());
                    if overlap.intersects(range) {
                        out.push(overlap);
                    }
                }
            }
        }
        out
    }

    /// Start times of all video clips, sorted and de-duplicated.
    pub fn clip_boundaries(&self) -> Vec<RationalTime> {
        let mut kind = TrackKind::Video;
        if self.tracks_of_kind(kind).is_empty() {
            kind = TrackKind::Audio;
        }
        let mut frames: Vec<i64> = self
            .clips_in_range(kind, &self.time_range())
            .into_iter()
            .map(|(_, range)| range.start().to_frames_at(self.rate))
            .collect();
        frames.sort_unstable();
        frames.dedup();
        frames
            .into_iter()
            .map(|f| RationalTime::from_frames(f, self.rate))
            .collect()
    }
}
