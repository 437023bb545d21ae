//! Cache memory manager and request epoch.
//!
//! The video and audio caches share one memory budget; `FrameCache` evicts
//! while usage is over the limit. The epoch counter is bumped on every seek
//! and scopes the read-ahead scheduler's failed-request memory.
//!
//! **Used by**: FrameCache (byte accounting), ReadAheadScheduler (epoch)

use log::{debug, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sysinfo::System;

/// Shared memory accounting for all caches.
#[derive(Debug)]
pub struct CacheManager {
    /// Atomically tracked memory usage (bytes)
    memory_usage: AtomicUsize,
    /// Maximum allowed memory (bytes)
    max_memory_bytes: AtomicUsize,
    /// Epoch counter, bumped on seek
    current_epoch: AtomicU64,
}

fn memory_limit(mem_fraction: f64, reserve_gb: f64) -> (usize, usize) {
    let mut sys = System::new();
    sys.refresh_memory();

    let available = sys.available_memory() as usize;
    let reserve = (reserve_gb * 1024.0 * 1024.0 * 1024.0) as usize;
    let usable = available.saturating_sub(reserve);
    (available, (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize)
}

impl CacheManager {
    /// Create cache manager with a limit derived from system memory.
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0, e.g. 0.75 = 75%)
    /// * `reserve_gb` - Reserve memory for system (GB, e.g. 2.0 = 2GB)
    pub fn new(mem_fraction: f64, reserve_gb: f64) -> Self {
        let (available, max_memory_bytes) = memory_limit(mem_fraction, reserve_gb);

        info!(
            "CacheManager init: available={} MB, reserve={} MB, limit={} MB ({}%)",
            available / 1024 / 1024,
            (reserve_gb * 1024.0) as usize,
            max_memory_bytes / 1024 / 1024,
            (mem_fraction * 100.0) as u32
        );

        Self::with_limit(max_memory_bytes)
    }

    /// Create cache manager with an explicit byte limit.
    pub fn with_limit(max_memory_bytes: usize) -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            max_memory_bytes: AtomicUsize::new(max_memory_bytes),
            current_epoch: AtomicU64::new(0),
        }
    }

    /// Increment epoch and return new value.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Check if memory limit exceeded
    pub fn check_memory_limit(&self) -> bool {
        self.memory_usage.load(Ordering::Relaxed) > self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// Memory statistics (usage, limit)
    pub fn mem(&self) -> (usize, usize) {
        let usage = self.memory_usage.load(Ordering::Relaxed);
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        (usage, limit)
    }

    pub fn limit(&self) -> usize {
        self.max_memory_bytes.load(Ordering::Relaxed)
    }

    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        if new_usage > limit {
            debug!(
                "Memory limit exceeded: {} MB / {} MB",
                new_usage / 1024 / 1024,
                limit / 1024 / 1024
            );
        }
    }

    /// Free memory usage (saturating)
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_manager_creation() {
        let manager = CacheManager::new(0.5, 1.0);
        assert_eq!(manager.current_epoch(), 0);

        let (usage, _limit) = manager.mem();
        assert_eq!(usage, 0);
    }

    #[test]
    fn test_epoch_increment() {
        let manager = CacheManager::with_limit(1024);
        assert_eq!(manager.increment_epoch(), 1);
        assert_eq!(manager.current_epoch(), 1);
        assert_eq!(manager.increment_epoch(), 2);
    }

    #[test]
    fn test_memory_tracking() {
        let manager = CacheManager::with_limit(1024 * 1024);

        manager.add_memory(1024 * 1024);
        assert_eq!(manager.mem().0, 1024 * 1024);
        assert!(!manager.check_memory_limit());

        manager.add_memory(1);
        assert!(manager.check_memory_limit());

        manager.free_memory(512 * 1024 + 1);
        assert_eq!(manager.mem().0, 512 * 1024);

        // saturating
        manager.free_memory(usize::MAX);
        assert_eq!(manager.mem().0, 0);
    }
}
