//! Reader worker: one thread per open file or sequence.
//!
//! # Architecture
//!
//! ```text
//! read_video() / read_audio()          reader thread             Workers pool
//!   | push Request (dedup by key)  ->  wait(condvar, timeout)
//!   | return Future                    dispatch up to           -> decode task
//!   |                                  thread_count - running      catch_unwind
//!   |                                                              fulfill promise
//! ```
//!
//! One mutex guards the pending queues, the running maps and the lifecycle.
//! A request whose key `(time, layer, options)` is already queued or running
//! shares the existing future; no second decode is spawned.
//!
//! Cancellation removes queued requests (their futures resolve empty).
//! Running requests always finish and deliver their value.

use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::promise::{self, Future, Promise};
use super::workers::Workers;
use crate::entities::{AudioBuffer, AudioData, Image, Info, Path, RationalTime, ReadOptions, VideoData};

/// Failure to open a file.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenError {
    NotFound(String),
    Unsupported(String),
    Io(String),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::NotFound(p) => write!(f, "File not found: {}", p),
            OpenError::Unsupported(p) => write!(f, "Unsupported format: {}", p),
            OpenError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for OpenError {}

/// Failure to decode one frame or one second of audio.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    OutOfRange(String),
    InvalidLayer(u16),
    NoAudio,
    Failed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::OutOfRange(t) => write!(f, "Time out of range: {}", t),
            DecodeError::InvalidLayer(l) => write!(f, "Invalid layer: {}", l),
            DecodeError::NoAudio => write!(f, "No audio stream"),
            DecodeError::Failed(e) => write!(f, "Decode failed: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Codec black box. Called concurrently from worker threads.
pub trait MediaDecoder: Send + Sync {
    fn info(&self) -> Result<Info, DecodeError>;

    fn decode_video(&self, time: RationalTime, layer: u16, options: &ReadOptions) -> Result<Image, DecodeError>;

    /// One second of audio starting at `seconds` (media time).
    fn decode_audio(&self, seconds: i64) -> Result<AudioBuffer, DecodeError>;
}

/// Opens decoders by path.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, path: &Path, options: &ReadOptions) -> Result<Arc<dyn MediaDecoder>, OpenError>;
}

/// Handle returned by every read call, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

/// Observable reader state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    /// Number of running decode tasks (1..=thread_count).
    Decoding(usize),
    Stopping,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

/// Reader tuning.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    /// Max decode tasks running at once for one reader.
    pub thread_count: usize,
    /// Condvar wait timeout of the reader thread.
    pub request_timeout: Duration,
    /// How often queue depth is logged.
    pub diagnostics_interval: Duration,
    /// Options passed to the decoder factory.
    pub read_options: ReadOptions,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            thread_count: 4,
            request_timeout: Duration::from_millis(5),
            diagnostics_interval: Duration::from_secs(10),
            read_options: ReadOptions::default(),
        }
    }
}

/// Queued decode request. The reader owns it; callers only see the future.
pub struct Request<T: Default> {
    pub id: RequestId,
    pub time: RationalTime,
    pub layer: u16,
    pub options: ReadOptions,
    promise: Promise<T>,
    future: Future<T>,
}

struct Task<T: Default> {
    request: Request<T>,
    /// Callers attached to this task; the task is dropped when all cancel.
    ids: Vec<RequestId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VideoKey {
    frame: i64,
    rate_bits: u64,
    layer: u16,
    options: ReadOptions,
}

impl VideoKey {
    fn new(time: RationalTime, layer: u16, options: &ReadOptions) -> Self {
        Self {
            frame: time.to_frames(),
            rate_bits: time.rate().to_bits(),
            layer,
            options: options.clone(),
        }
    }
}

#[derive(Clone, Debug)]
enum TaskKey {
    Video(VideoKey),
    Audio(i64),
}

struct Queue {
    lifecycle: Lifecycle,
    video: IndexMap<VideoKey, Task<VideoData>>,
    audio: IndexMap<i64, Task<AudioData>>,
    pending_ids: HashMap<RequestId, TaskKey>,
    video_running: HashMap<VideoKey, Future<VideoData>>,
    audio_running: HashMap<i64, Future<AudioData>>,
}

impl Queue {
    fn running(&self) -> usize {
        self.video_running.len() + self.audio_running.len()
    }

    fn has_pending(&self) -> bool {
        !self.video.is_empty() || !self.audio.is_empty()
    }

    /// Drop all queued tasks; their futures resolve empty.
    fn clear_pending(&mut self) -> usize {
        let count = self.video.len() + self.audio.len();
        self.video.clear();
        self.audio.clear();
        self.pending_ids.clear();
        count
    }
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Detach `id` from a queued task; drops the task when nobody is left.
fn detach<K: Hash + Eq, T: Default>(queue: &mut IndexMap<K, Task<T>>, key: &K, id: RequestId) -> bool {
    let Some(task) = queue.get_mut(key) else {
        return false;
    };
    task.ids.retain(|i| *i != id);
    if task.ids.is_empty() {
        queue.shift_remove(key);
        true
    } else {
        false
    }
}

/// Reader for one file or sequence.
pub struct Reader {
    path: Path,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    info: Future<Info>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Reader {
    /// Spawn the reader thread. The decoder is opened on that thread;
    /// an open failure resolves `info()` to an empty `Info`.
    pub fn new(
        path: Path,
        factory: Arc<dyn DecoderFactory>,
        workers: Arc<Workers>,
        options: ReaderOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                lifecycle: Lifecycle::Running,
                video: IndexMap::new(),
                audio: IndexMap::new(),
                pending_ids: HashMap::new(),
                video_running: HashMap::new(),
                audio_running: HashMap::new(),
            }),
            wake: Condvar::new(),
        });
        let (info_promise, info) = promise::channel();

        let name = if path.base_name().is_empty() {
            path.extension().trim_start_matches('.').to_string()
        } else {
            path.base_name().trim_end_matches(['.', '_']).to_string()
        };
        let thread = {
            let path = path.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("playa-reader-{}", name))
                .spawn(move || run(path, factory, workers, options, shared, info_promise))
                .expect("Failed to spawn reader thread")
        };

        Self {
            path,
            shared,
            next_id: AtomicU64::new(1),
            info,
            thread: Mutex::new(Some(thread)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File information, resolved once the decoder is open.
    pub fn info(&self) -> Future<Info> {
        self.info.clone()
    }

    fn next_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn read_video(&self, time: RationalTime, layer: u16, options: &ReadOptions) -> (RequestId, Future<VideoData>) {
        let id = self.next_id();
        let key = VideoKey::new(time, layer, options);

        let mut guard = self.shared.lock();
        let q = &mut *guard;
        if q.lifecycle != Lifecycle::Running {
            return (id, Future::ready(VideoData::default()));
        }
        if let Some(future) = q.video_running.get(&key) {
            trace!("Reader {}: {} already decoding", self.path, time);
            return (id, future.clone());
        }
        if let Some(task) = q.video.get_mut(&key) {
            task.ids.push(id);
            q.pending_ids.insert(id, TaskKey::Video(key));
            return (id, task.request.future.clone());
        }

        let (promise, future) = promise::channel();
        let request = Request {
            id,
            time,
            layer,
            options: options.clone(),
            promise,
            future: future.clone(),
        };
        q.video.insert(key.clone(), Task { request, ids: vec![id] });
        q.pending_ids.insert(id, TaskKey::Video(key));
        drop(guard);

        self.shared.wake.notify_all();
        (id, future)
    }

    pub fn read_audio(&self, seconds: i64) -> (RequestId, Future<AudioData>) {
        let id = self.next_id();

        let mut guard = self.shared.lock();
        let q = &mut *guard;
        if q.lifecycle != Lifecycle::Running {
            return (id, Future::ready(AudioData::default()));
        }
        if let Some(future) = q.audio_running.get(&seconds) {
            return (id, future.clone());
        }
        if let Some(task) = q.audio.get_mut(&seconds) {
            task.ids.push(id);
            q.pending_ids.insert(id, TaskKey::Audio(seconds));
            return (id, task.request.future.clone());
        }

        let (promise, future) = promise::channel();
        let request = Request {
            id,
            time: RationalTime::new(seconds as f64, 1.0),
            layer: 0,
            options: ReadOptions::default(),
            promise,
            future: future.clone(),
        };
        q.audio.insert(seconds, Task { request, ids: vec![id] });
        q.pending_ids.insert(id, TaskKey::Audio(seconds));
        drop(guard);

        self.shared.wake.notify_all();
        (id, future)
    }

    /// Cancel queued requests. Running ones are unaffected.
    /// Returns the number of decode tasks removed.
    pub fn cancel_requests(&self, ids: &[RequestId]) -> usize {
        let mut guard = self.shared.lock();
        let q = &mut *guard;
        let mut removed = 0;
        for id in ids {
            let Some(key) = q.pending_ids.remove(id) else {
                continue;
            };
            let dropped = match &key {
                TaskKey::Video(k) => detach(&mut q.video, k, *id),
                TaskKey::Audio(s) => detach(&mut q.audio, s, *id),
            };
            if dropped {
                removed += 1;
            }
        }
        if removed > 0 {
            trace!("Reader {}: cancelled {} queued requests", self.path, removed);
        }
        removed
    }

    /// Cancel every queued request.
    pub fn cancel_all(&self) -> usize {
        let removed = self.shared.lock().clear_pending();
        if removed > 0 {
            trace!("Reader {}: cancelled all ({} queued)", self.path, removed);
        }
        removed
    }

    /// True while anything is queued or decoding.
    pub fn has_requests(&self) -> bool {
        let q = self.shared.lock();
        q.has_pending() || q.running() > 0
    }

    pub fn state(&self) -> ReaderState {
        let q = self.shared.lock();
        match q.lifecycle {
            Lifecycle::Stopping => ReaderState::Stopping,
            Lifecycle::Stopped => ReaderState::Stopped,
            Lifecycle::Running => match q.running() {
                0 => ReaderState::Idle,
                n => ReaderState::Decoding(n),
            },
        }
    }

    /// Stop the thread: queued requests resolve empty, running ones finish.
    /// Blocks until the thread has exited. Safe to call more than once.
    pub fn stop(&self) {
        {
            let mut q = self.shared.lock();
            if q.lifecycle == Lifecycle::Running {
                q.lifecycle = Lifecycle::Stopping;
            }
        }
        self.shared.wake.notify_all();

        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Reader {}: thread panicked", self.path);
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path.to_string())
            .field("state", &self.state())
            .finish()
    }
}

/// Reader thread body.
fn run(
    path: Path,
    factory: Arc<dyn DecoderFactory>,
    workers: Arc<Workers>,
    options: ReaderOptions,
    shared: Arc<Shared>,
    info_promise: Promise<Info>,
) {
    let decoder = match factory.open(&path, &options.read_options) {
        Ok(decoder) => {
            let info = decoder.info().unwrap_or_else(|e| {
                warn!("Reader {}: no info: {}", path, e);
                Info::default()
            });
            debug!("Reader {}: opened, {} video layers", path, info.video.len());
            info_promise.fulfill(info);
            Some(decoder)
        }
        Err(e) => {
            warn!("Reader {}: cannot open: {}", path, e);
            drop(info_promise);
            None
        }
    };

    let thread_count = options.thread_count.max(1);
    let mut last_diagnostics = Instant::now();
    let mut queue = shared.lock();

    loop {
        if queue.lifecycle != Lifecycle::Running {
            break;
        }

        if last_diagnostics.elapsed() >= options.diagnostics_interval {
            debug!(
                "Reader {}: {} video / {} audio queued, {} running",
                path,
                queue.video.len(),
                queue.audio.len(),
                queue.running()
            );
            last_diagnostics = Instant::now();
        }

        match &decoder {
            Some(decoder) => {
                let free = thread_count.saturating_sub(queue.running());
                if free > 0 && queue.has_pending() {
                    dispatch(&mut queue, free, decoder, &workers, &shared, &path);
                }
            }
            None => {
                queue.clear_pending();
            }
        }

        queue = shared
            .wake
            .wait_timeout(queue, options.request_timeout)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0);
    }

    let dropped = queue.clear_pending();
    trace!("Reader {}: stopping, dropped {} queued, draining {}", path, dropped, queue.running());
    while queue.running() > 0 {
        queue = shared
            .wake
            .wait_timeout(queue, options.request_timeout)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0);
    }
    queue.lifecycle = Lifecycle::Stopped;
    info!("Reader {} stopped", path);
}

/// Move up to `free` queued tasks onto the worker pool. Audio first.
fn dispatch(
    queue: &mut Queue,
    mut free: usize,
    decoder: &Arc<dyn MediaDecoder>,
    workers: &Workers,
    shared: &Arc<Shared>,
    path: &Path,
) {
    while free > 0 {
        if let Some((seconds, task)) = queue.audio.shift_remove_index(0) {
            for id in &task.ids {
                queue.pending_ids.remove(id);
            }
            queue.audio_running.insert(seconds, task.request.future.clone());
            spawn_audio(seconds, task.request, decoder, workers, shared, path);
        } else if let Some((key, task)) = queue.video.shift_remove_index(0) {
            for id in &task.ids {
                queue.pending_ids.remove(id);
            }
            queue.video_running.insert(key.clone(), task.request.future.clone());
            spawn_video(key, task.request, decoder, workers, shared, path);
        } else {
            break;
        }
        free -= 1;
    }
}

fn spawn_video(
    key: VideoKey,
    request: Request<VideoData>,
    decoder: &Arc<dyn MediaDecoder>,
    workers: &Workers,
    shared: &Arc<Shared>,
    path: &Path,
) {
    let decoder = Arc::clone(decoder);
    let shared = Arc::clone(shared);
    let path = path.to_string();
    workers.execute(move || {
        let Request {
            time,
            layer,
            options,
            promise,
            ..
        } = request;
        trace!("Reader {}: decode video {}", path, time);

        let result = panic::catch_unwind(AssertUnwindSafe(|| decoder.decode_video(time, layer, &options)));
        let data = match result {
            Ok(Ok(image)) => VideoData::new(time, layer, image),
            Ok(Err(e)) => {
                warn!("Reader {}: video {}: {}", path, time, e);
                VideoData {
                    time,
                    layer,
                    ..Default::default()
                }
            }
            Err(_) => {
                warn!("Reader {}: video decode panicked at {}", path, time);
                VideoData {
                    time,
                    layer,
                    ..Default::default()
                }
            }
        };

        // Joiners see the running future until it holds the result
        promise.fulfill(data);
        shared.lock().video_running.remove(&key);
        shared.wake.notify_all();
    });
}

fn spawn_audio(
    seconds: i64,
    request: Request<AudioData>,
    decoder: &Arc<dyn MediaDecoder>,
    workers: &Workers,
    shared: &Arc<Shared>,
    path: &Path,
) {
    let decoder = Arc::clone(decoder);
    let shared = Arc::clone(shared);
    let path = path.to_string();
    workers.execute(move || {
        let promise = request.promise;
        trace!("Reader {}: decode audio {}s", path, seconds);

        let result = panic::catch_unwind(AssertUnwindSafe(|| decoder.decode_audio(seconds)));
        let data = match result {
            Ok(Ok(buffer)) => AudioData::new(seconds, buffer),
            Ok(Err(e)) => {
                warn!("Reader {}: audio {}s: {}", path, seconds, e);
                AudioData {
                    seconds,
                    audio: None,
                }
            }
            Err(_) => {
                warn!("Reader {}: audio decode panicked at {}s", path, seconds);
                AudioData {
                    seconds,
                    audio: None,
                }
            }
        };

        promise.fulfill(data);
        shared.lock().audio_running.remove(&seconds);
        shared.wake.notify_all();
    });
}

/// Open readers keyed by path, oldest closed first when over the limit.
pub struct ReaderPool {
    factory: Arc<dyn DecoderFactory>,
    workers: Arc<Workers>,
    options: ReaderOptions,
    max_readers: usize,
    readers: Mutex<IndexMap<String, Arc<Reader>>>,
}

impl ReaderPool {
    pub fn new(
        factory: Arc<dyn DecoderFactory>,
        workers: Arc<Workers>,
        options: ReaderOptions,
        max_readers: usize,
    ) -> Self {
        Self {
            factory,
            workers,
            options,
            max_readers: max_readers.max(1),
            readers: Mutex::new(IndexMap::new()),
        }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Reader for `path`, opened on first use.
    pub fn get(&self, path: &Path) -> Arc<Reader> {
        let key = path.to_string();
        let mut readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(reader) = readers.shift_remove(&key) {
            readers.insert(key, Arc::clone(&reader));
            return reader;
        }

        let reader = Arc::new(Reader::new(
            path.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.workers),
            self.options.clone(),
        ));
        readers.insert(key, Arc::clone(&reader));

        let mut evicted = Vec::new();
        while readers.len() > self.max_readers {
            if let Some((old_path, old)) = readers.shift_remove_index(0) {
                debug!("ReaderPool: closing {}", old_path);
                evicted.push(old);
            }
        }
        drop(readers);
        // Readers are stopped outside the pool lock
        for old in evicted {
            old.stop();
        }
        reader
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&path.to_string())
    }

    pub fn len(&self) -> usize {
        self.readers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel queued work of every reader.
    pub fn cancel_all(&self) {
        let readers: Vec<Arc<Reader>> = self
            .readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for reader in readers {
            reader.cancel_all();
        }
    }

    /// Stop and forget every reader.
    pub fn stop_all(&self) {
        let readers: Vec<Arc<Reader>> = self
            .readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .map(|(_, r)| r)
            .collect();
        for reader in readers {
            reader.stop();
        }
    }
}

impl Drop for ReaderPool {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pattern::{PatternDecoderFactory, PatternMedia};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn workers() -> Arc<Workers> {
        Arc::new(Workers::new(4))
    }

    fn reader(factory: Arc<PatternDecoderFactory>, thread_count: usize) -> Reader {
        Reader::new(
            Path::new("/media/shot.0001.exr"),
            factory,
            workers(),
            ReaderOptions {
                thread_count,
                ..Default::default()
            },
        )
    }

    fn t(frame: i64) -> RationalTime {
        RationalTime::from_frames(frame, 24.0)
    }

    #[test]
    fn test_info_resolves() {
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()));
        let reader = reader(factory, 2);
        let info = reader.info().wait_timeout(WAIT).unwrap();
        assert_eq!(info.video.len(), 1);
        assert!(info.audio.is_some());
    }

    #[test]
    fn test_open_error_gives_empty_info() {
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()).with_missing("/media/shot.0001.exr"));
        let reader = reader(factory, 2);
        assert_eq!(reader.info().wait_timeout(WAIT), Some(Info::default()));
        let (_, future) = reader.read_video(t(0), 0, &ReadOptions::default());
        assert!(future.wait_timeout(WAIT).unwrap().is_empty());
    }

    #[test]
    fn test_read_video() {
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()));
        let reader = reader(Arc::clone(&factory), 2);
        let (_, future) = reader.read_video(t(5), 0, &ReadOptions::default());
        let data = future.wait_timeout(WAIT).unwrap();
        assert!(!data.is_empty());
        assert_eq!(data.time, t(5));
        assert_eq!(PatternDecoderFactory::frame_of(data.image.as_deref().unwrap()), 5);
    }

    #[test]
    fn test_duplicate_requests_share_one_decode() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()).with_gate(gate_rx));
        let reader = reader(Arc::clone(&factory), 2);

        let (id_a, a) = reader.read_video(t(3), 0, &ReadOptions::default());
        let (id_b, b) = reader.read_video(t(3), 0, &ReadOptions::default());
        assert_ne!(id_a, id_b);

        gate_tx.send(()).unwrap();
        let a = a.wait_timeout(WAIT).unwrap();
        let b = b.wait_timeout(WAIT).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert_eq!(factory.video_decodes(), 1);
    }

    #[test]
    fn test_requests_before_completion_join_running_decode() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()).with_gate(gate_rx));
        let reader = Arc::new(reader(Arc::clone(&factory), 1));

        let (_, first) = reader.read_video(t(3), 0, &ReadOptions::default());
        let deadline = Instant::now() + WAIT;
        while reader.state() != ReaderState::Decoding(1) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        let requester = {
            let reader = Arc::clone(&reader);
            let first = first.clone();
            thread::spawn(move || {
                let mut joined = Vec::new();
                loop {
                    let (_, future) = reader.read_video(t(3), 0, &ReadOptions::default());
                    // Issued while the first decode was still unresolved
                    if first.is_ready() {
                        return joined;
                    }
                    joined.push(future);
                }
            })
        };
        thread::sleep(Duration::from_millis(5));
        // One token for the running decode, spares for a late re-request
        for _ in 0..4 {
            gate_tx.send(()).unwrap();
        }
        let joined = requester.join().unwrap();

        let image = first.wait_timeout(WAIT).unwrap().image.unwrap();
        assert!(!joined.is_empty());
        for future in joined {
            let data = future.wait_timeout(WAIT).unwrap();
            assert!(Arc::ptr_eq(data.image.as_ref().unwrap(), &image));
        }
    }

    #[test]
    fn test_cancel_queued_not_running() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()).with_gate(gate_rx));
        let reader = reader(Arc::clone(&factory), 1);

        let (id0, running) = reader.read_video(t(0), 0, &ReadOptions::default());
        // Wait until frame 0 is on a worker
        let deadline = Instant::now() + WAIT;
        while reader.state() != ReaderState::Decoding(1) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        let (id1, queued) = reader.read_video(t(1), 0, &ReadOptions::default());
        assert!(reader.has_requests());

        assert_eq!(reader.cancel_requests(&[id0, id1]), 1);
        assert!(queued.wait_timeout(WAIT).unwrap().is_empty());

        gate_tx.send(()).unwrap();
        assert!(!running.wait_timeout(WAIT).unwrap().is_empty());
        assert_eq!(factory.video_decodes(), 1);
    }

    #[test]
    fn test_cancel_keeps_shared_task() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()).with_gate(gate_rx));
        let reader = reader(Arc::clone(&factory), 1);

        let (_, _busy) = reader.read_video(t(0), 0, &ReadOptions::default());
        let deadline = Instant::now() + WAIT;
        while reader.state() != ReaderState::Decoding(1) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        let (id_a, a) = reader.read_video(t(9), 0, &ReadOptions::default());
        let (_id_b, b) = reader.read_video(t(9), 0, &ReadOptions::default());
        // One caller leaves; the other still gets the frame
        assert_eq!(reader.cancel_requests(&[id_a]), 0);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        assert!(!b.wait_timeout(WAIT).unwrap().is_empty());
        assert!(!a.wait_timeout(WAIT).unwrap().is_empty());
    }

    #[test]
    fn test_decode_error_and_panic_give_empty() {
        let factory = Arc::new(
            PatternDecoderFactory::new(PatternMedia {
                frames: 10,
                ..Default::default()
            })
            .with_panic_frame(4),
        );
        let reader = reader(factory, 2);
        let (_, out_of_range) = reader.read_video(t(20), 0, &ReadOptions::default());
        let (_, panicked) = reader.read_video(t(4), 0, &ReadOptions::default());
        let (_, good) = reader.read_video(t(5), 0, &ReadOptions::default());
        assert!(out_of_range.wait_timeout(WAIT).unwrap().is_empty());
        assert!(panicked.wait_timeout(WAIT).unwrap().is_empty());
        assert!(!good.wait_timeout(WAIT).unwrap().is_empty());
    }

    #[test]
    fn test_read_audio() {
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()));
        let reader = reader(factory, 2);
        let (_, future) = reader.read_audio(1);
        let data = future.wait_timeout(WAIT).unwrap();
        assert_eq!(data.seconds, 1);
        assert_eq!(data.audio.unwrap().frame_count(), 48000);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()));
        let reader = reader(factory, 2);
        reader.stop();
        assert_eq!(reader.state(), ReaderState::Stopped);
        reader.stop();
        let (_, future) = reader.read_video(t(0), 0, &ReadOptions::default());
        assert!(future.try_get().unwrap().is_empty());
        assert!(!reader.has_requests());
    }

    #[test]
    fn test_pool_reuses_and_evicts() {
        let factory = Arc::new(PatternDecoderFactory::new(PatternMedia::default()));
        let pool = ReaderPool::new(factory, workers(), ReaderOptions::default(), 2);
        let a = pool.get(&Path::new("/a.mov"));
        let again = pool.get(&Path::new("/a.mov"));
        assert!(Arc::ptr_eq(&a, &again));
        pool.get(&Path::new("/b.mov"));
        pool.get(&Path::new("/c.mov"));
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&Path::new("/a.mov")));
        assert_eq!(a.state(), ReaderState::Stopped);
    }
}
