//! Frame cache: decoded video frames and audio seconds.
//!
//! Two weighted LRU caches (bytes), each behind its own mutex. Every insert
//! or eviction is mirrored into the shared `CacheManager` so total memory
//! is visible in one place; inserts evict oldest entries while the manager
//! is over its limit. Entries are `Arc`s and are always replaced whole.

use log::{debug, trace};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::cache_man::CacheManager;
use super::lru_cache::LruCache;
use crate::entities::{AudioBuffer, Clip, FrameSource, Image, Path, RationalTime, ReadOptions};

/// Video cache key: one decoded layer of one media frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub path: String,
    pub frame: i64,
    rate_bits: u64,
    pub layer: u16,
    pub options: ReadOptions,
}

impl FrameKey {
    pub fn new(path: &Path, time: RationalTime, layer: u16, options: &ReadOptions) -> Self {
        Self {
            path: path.to_string(),
            frame: time.to_frames(),
            rate_bits: time.rate().to_bits(),
            layer,
            options: options.clone(),
        }
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits)
    }

    pub fn time(&self) -> RationalTime {
        RationalTime::from_frames(self.frame, self.rate())
    }
}

/// Audio cache key: one second of media audio.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AudioKey {
    pub path: String,
    pub seconds: i64,
}

impl AudioKey {
    pub fn new(path: &Path, seconds: i64) -> Self {
        Self {
            path: path.to_string(),
            seconds,
        }
    }
}

/// Hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub rejected: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
    }
}

/// Shared decoded-media cache.
pub struct FrameCache {
    video: Mutex<LruCache<FrameKey, Arc<Image>>>,
    audio: Mutex<LruCache<AudioKey, Arc<AudioBuffer>>>,
    video_stats: Counters,
    audio_stats: Counters,
    manager: Arc<CacheManager>,
}

impl FrameCache {
    /// Capacities are in bytes.
    pub fn new(manager: Arc<CacheManager>, video_capacity: usize, audio_capacity: usize) -> Self {
        debug!(
            "FrameCache: video {} MB, audio {} MB",
            video_capacity / 1024 / 1024,
            audio_capacity / 1024 / 1024
        );
        Self {
            video: Mutex::new(LruCache::new(video_capacity)),
            audio: Mutex::new(LruCache::new(audio_capacity)),
            video_stats: Counters::default(),
            audio_stats: Counters::default(),
            manager,
        }
    }

    fn video_lock(&self) -> MutexGuard<'_, LruCache<FrameKey, Arc<Image>>> {
        self.video.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn audio_lock(&self) -> MutexGuard<'_, LruCache<AudioKey, Arc<AudioBuffer>>> {
        self.audio.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mirror a cache size change into the manager.
    fn account(&self, before: usize, after: usize) {
        if after > before {
            self.manager.add_memory(after - before);
        } else if before > after {
            self.manager.free_memory(before - after);
        }
    }

    /// Evict oldest entries while the shared budget is exceeded; the newest
    /// entry always stays.
    fn enforce_limit<K, V>(&self, cache: &mut LruCache<K, V>, kind: &str)
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        let mut evicted = 0;
        while self.manager.check_memory_limit() && cache.len() > 1 {
            let Some((_, _, weight)) = cache.pop_lru() else {
                break;
            };
            self.manager.free_memory(weight);
            evicted += 1;
        }
        if evicted > 0 {
            let (usage, limit) = self.manager.mem();
            trace!(
                "FrameCache: evicted {} {} entries over memory limit ({} / {} bytes)",
                evicted, kind, usage, limit
            );
        }
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    // ---- video ----

    /// Lookup and promote.
    pub fn get_video(&self, key: &FrameKey) -> Option<Arc<Image>> {
        let found = self.video_lock().get(key);
        self.video_stats.lookup(found.is_some());
        found
    }

    /// Residency check without promotion.
    pub fn contains_video(&self, key: &FrameKey) -> bool {
        self.video_lock().contains(key)
    }

    /// Returns `false` if the frame is larger than the whole cache.
    pub fn insert_video(&self, key: FrameKey, image: Arc<Image>) -> bool {
        let weight = image.byte_size().max(1);
        let ok = {
            let mut cache = self.video_lock();
            let before = cache.size();
            let ok = cache.add_weighted(key, image, weight);
            self.account(before, cache.size());
            self.enforce_limit(&mut *cache, "video");
            ok
        };
        if ok {
            self.video_stats.inserts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.video_stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    pub fn video_percentage(&self) -> f32 {
        self.video_lock().percentage()
    }

    pub fn video_len(&self) -> usize {
        self.video_lock().len()
    }

    pub fn video_keys(&self) -> Vec<FrameKey> {
        self.video_lock().keys()
    }

    pub fn video_stats(&self) -> CacheStats {
        self.video_stats.snapshot()
    }

    // ---- audio ----

    pub fn get_audio(&self, key: &AudioKey) -> Option<Arc<AudioBuffer>> {
        let found = self.audio_lock().get(key);
        self.audio_stats.lookup(found.is_some());
        found
    }

    pub fn contains_audio(&self, key: &AudioKey) -> bool {
        self.audio_lock().contains(key)
    }

    pub fn insert_audio(&self, key: AudioKey, audio: Arc<AudioBuffer>) -> bool {
        let weight = audio.byte_size().max(1);
        let ok = {
            let mut cache = self.audio_lock();
            let before = cache.size();
            let ok = cache.add_weighted(key, audio, weight);
            self.account(before, cache.size());
            self.enforce_limit(&mut *cache, "audio");
            ok
        };
        if ok {
            self.audio_stats.inserts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.audio_stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    pub fn audio_percentage(&self) -> f32 {
        self.audio_lock().percentage()
    }

    pub fn audio_len(&self) -> usize {
        self.audio_lock().len()
    }

    pub fn audio_keys(&self) -> Vec<AudioKey> {
        self.audio_lock().keys()
    }

    pub fn audio_stats(&self) -> CacheStats {
        self.audio_stats.snapshot()
    }

    // ---- maintenance ----

    /// Byte capacities (video, audio).
    pub fn capacities(&self) -> (usize, usize) {
        (self.video_lock().capacity(), self.audio_lock().capacity())
    }

    /// Drop every entry of one file (e.g. after it changed on disk).
    pub fn clear_path(&self, path: &Path) {
        let name = path.to_string();
        let freed_video = self.video_lock().remove_if(|k| k.path == name);
        let freed_audio = self.audio_lock().remove_if(|k| k.path == name);
        self.manager.free_memory(freed_video + freed_audio);
        trace!("FrameCache: cleared {} ({} bytes)", name, freed_video + freed_audio);
    }

    pub fn clear_all(&self) {
        let freed = {
            let mut video = self.video_lock();
            let size = video.size();
            video.clear();
            size
        } + {
            let mut audio = self.audio_lock();
            let size = audio.size();
            audio.clear();
            size
        };
        self.manager.free_memory(freed);
        self.video_stats.reset();
        self.audio_stats.reset();
        debug!("FrameCache: cleared all ({} bytes)", freed);
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        let video = self.video.get_mut().map(|c| c.size()).unwrap_or(0);
        let audio = self.audio.get_mut().map(|c| c.size()).unwrap_or(0);
        self.manager.free_memory(video + audio);
    }
}

/// Compositor lookups read layer 0 with default options.
impl FrameSource for FrameCache {
    fn image(&self, clip: &Clip, media_time: RationalTime) -> Option<Arc<Image>> {
        self.get_video(&FrameKey::new(&clip.path, media_time, 0, &ReadOptions::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str, frame: i64) -> FrameKey {
        FrameKey::new(&Path::new(path), RationalTime::from_frames(frame, 24.0), 0, &ReadOptions::default())
    }

    fn image() -> Arc<Image> {
        // 2x2 RGBA8 = 16 bytes
        Arc::new(Image::filled_u8(2, 2, [1, 2, 3, 255]))
    }

    #[test]
    fn test_insert_and_stats() {
        let manager = Arc::new(CacheManager::with_limit(1 << 20));
        let cache = FrameCache::new(Arc::clone(&manager), 64, 64);
        assert!(cache.get_video(&key("/a.mov", 0)).is_none());
        assert!(cache.insert_video(key("/a.mov", 0), image()));
        assert!(cache.get_video(&key("/a.mov", 0)).is_some());
        assert_eq!(cache.video_stats().hits, 1);
        assert_eq!(cache.video_stats().misses, 1);
        assert_eq!(cache.video_stats().hit_rate(), 0.5);
        assert_eq!(cache.audio_stats().hit_rate(), 0.0);
        assert_eq!(manager.mem().0, 16);
    }

    #[test]
    fn test_eviction_is_accounted() {
        let manager = Arc::new(CacheManager::with_limit(1 << 20));
        let cache = FrameCache::new(Arc::clone(&manager), 32, 64);
        for f in 0..3 {
            cache.insert_video(key("/a.mov", f), image());
        }
        assert_eq!(cache.video_len(), 2);
        assert!(!cache.contains_video(&key("/a.mov", 0)));
        assert_eq!(manager.mem().0, 32);
        assert_eq!(cache.video_percentage(), 100.0);
    }

    #[test]
    fn test_memory_limit_evicts_oldest() {
        // Budget below the byte capacity: the manager limit decides
        let manager = Arc::new(CacheManager::with_limit(40));
        let cache = FrameCache::new(Arc::clone(&manager), 1024, 1024);
        for f in 0..3 {
            assert!(cache.insert_video(key("/a.mov", f), image()));
        }
        assert_eq!(cache.video_len(), 2);
        assert!(!cache.contains_video(&key("/a.mov", 0)));
        assert!(cache.contains_video(&key("/a.mov", 2)));
        assert_eq!(manager.mem().0, 32);
        assert!(!manager.check_memory_limit());
    }

    #[test]
    fn test_memory_limit_shared_by_audio() {
        let manager = Arc::new(CacheManager::with_limit(48));
        let cache = FrameCache::new(Arc::clone(&manager), 1024, 1024);
        cache.insert_video(key("/a.mov", 0), image());
        // 8 f32 samples = 32 bytes each
        for s in 0..2 {
            let buffer = Arc::new(AudioBuffer::from_f32(1, 8, vec![0.0; 8]));
            assert!(cache.insert_audio(AudioKey::new(&Path::new("/a.wav"), s), buffer));
        }
        assert_eq!(cache.audio_keys(), vec![AudioKey::new(&Path::new("/a.wav"), 1)]);
        assert_eq!(manager.mem().0, 48);

        // A lone entry is kept even when it alone is over budget
        let tight = Arc::new(CacheManager::with_limit(8));
        let cache = FrameCache::new(Arc::clone(&tight), 1024, 1024);
        assert!(cache.insert_video(key("/a.mov", 0), image()));
        assert_eq!(cache.video_len(), 1);
    }

    #[test]
    fn test_oversized_rejected() {
        let manager = Arc::new(CacheManager::with_limit(1 << 20));
        let cache = FrameCache::new(manager, 8, 8);
        assert!(!cache.insert_video(key("/a.mov", 0), image()));
        assert_eq!(cache.video_stats().rejected, 1);
        assert_eq!(cache.video_len(), 0);
    }

    #[test]
    fn test_clear_path() {
        let manager = Arc::new(CacheManager::with_limit(1 << 20));
        let cache = FrameCache::new(Arc::clone(&manager), 1024, 1024);
        cache.insert_video(key("/a.mov", 0), image());
        cache.insert_video(key("/b.mov", 0), image());
        cache.insert_audio(
            AudioKey::new(&Path::new("/a.mov"), 0),
            Arc::new(AudioBuffer::from_f32(1, 8, vec![0.0; 8])),
        );
        cache.clear_path(&Path::new("/a.mov"));
        assert_eq!(cache.video_keys(), vec![key("/b.mov", 0)]);
        assert_eq!(cache.audio_len(), 0);
        assert_eq!(manager.mem().0, 16);

        cache.clear_all();
        assert_eq!(manager.mem().0, 0);
    }

    #[test]
    fn test_frame_key_rate_distinguishes() {
        let a = FrameKey::new(&Path::new("/a.mov"), RationalTime::new(10.0, 24.0), 0, &ReadOptions::default());
        let b = FrameKey::new(&Path::new("/a.mov"), RationalTime::new(10.0, 25.0), 0, &ReadOptions::default());
        assert_ne!(a, b);
        assert_eq!(a.time(), RationalTime::new(10.0, 24.0));
    }

    #[test]
    fn test_frame_source_lookup() {
        let manager = Arc::new(CacheManager::with_limit(1 << 20));
        let cache = FrameCache::new(manager, 1024, 1024);
        let clip = Clip::new(Path::new("/a.mov"), crate::entities::TimeRange::from_frames(0, 9, 24.0));
        cache.insert_video(key("/a.mov", 3), image());
        assert!(cache.image(&clip, RationalTime::from_frames(3, 24.0)).is_some());
        assert!(cache.image(&clip, RationalTime::from_frames(4, 24.0)).is_none());
    }
}
