//! Engine context: the registry of shared subsystems.
//!
//! Everything a player needs (worker pool, memory accounting, frame cache,
//! reader pool, audio mixer and device, event bus) is created here once
//! and handed out as `Arc`s. Teardown runs in reverse creation order:
//! audio device, readers, cache, and the worker pool last.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

use super::audio_mixer::{AudioDevice, AudioMixer, AudioSystem};
use super::cache_man::CacheManager;
use super::event_bus::EventBus;
use super::frame_cache::FrameCache;
use super::player::Player;
use super::reader::{DecoderFactory, ReaderPool};
use super::workers::Workers;
use crate::config::EngineSettings;
use crate::entities::{AudioInfo, SampleType, Timeline};

pub struct Context {
    // Field order is drop order
    device: Mutex<Option<Box<dyn AudioDevice>>>,
    mixer: Arc<AudioMixer>,
    readers: Arc<ReaderPool>,
    cache: Arc<FrameCache>,
    manager: Arc<CacheManager>,
    audio: Arc<dyn AudioSystem>,
    events: EventBus,
    workers: Arc<Workers>,
    settings: EngineSettings,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("workers", &self.workers.thread_count())
            .field("jobs", &self.workers.active_jobs())
            .field("readers", &self.readers.len())
            .field("memory", &self.manager.mem())
            .field("mixer", &self.mixer)
            .finish()
    }
}

impl Context {
    pub fn new(settings: EngineSettings, factory: Arc<dyn DecoderFactory>, audio: Arc<dyn AudioSystem>) -> Self {
        let settings = settings.sanitized();
        let workers = Arc::new(Workers::with_auto_threads(settings.worker_threads));
        let manager = Arc::new(CacheManager::new(
            settings.cache_memory_percent as f64 / 100.0,
            settings.reserve_system_memory_gb as f64,
        ));
        let cache = Arc::new(FrameCache::new(
            Arc::clone(&manager),
            settings.video_cache_bytes,
            settings.audio_cache_bytes,
        ));
        let readers = Arc::new(ReaderPool::new(
            factory,
            Arc::clone(&workers),
            settings.reader_options(),
            settings.max_readers,
        ));

        // Without a usable device the mixer still runs (silent) so players
        // behave the same headless.
        let devices = audio.devices();
        debug!(
            "Audio devices: [{}]",
            devices.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        let device_info = audio.default_device();
        let output = device_info
            .as_ref()
            .map(|d| d.audio_info())
            .unwrap_or(AudioInfo::new(2, 48000, SampleType::F32));
        let mixer = Arc::new(AudioMixer::new(output));
        let device = match device_info {
            Some(info) => {
                let pull = Arc::clone(&mixer);
                match audio.open(&info, Box::new(move |buffer: &mut [f32]| pull.render_audio_samples(buffer))) {
                    Ok(device) => Some(device),
                    Err(e) => {
                        warn!("Audio device {} unavailable: {}", info.id, e);
                        mixer.set_device_ok(false);
                        None
                    }
                }
            }
            None => {
                warn!("No audio device, audio output disabled");
                mixer.set_device_ok(false);
                None
            }
        };

        info!(
            "Context ready: {} workers, cache limit {} MB, audio {}ch@{}",
            workers.thread_count(),
            manager.limit() / (1024 * 1024),
            output.channels,
            output.sample_rate
        );

        Self {
            device: Mutex::new(device),
            mixer,
            readers,
            cache,
            manager,
            audio,
            events: EventBus::new(),
            workers,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn workers(&self) -> &Arc<Workers> {
        &self.workers
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    pub fn readers(&self) -> &Arc<ReaderPool> {
        &self.readers
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.mixer
    }

    pub fn audio_system(&self) -> &Arc<dyn AudioSystem> {
        &self.audio
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn has_audio_device(&self) -> bool {
        self.device.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// New player for `timeline` using the context's settings.
    pub fn create_player(&self, timeline: Arc<Timeline>) -> Player {
        Player::new(
            timeline,
            Arc::clone(&self.readers),
            Arc::clone(&self.cache),
            Arc::clone(&self.mixer),
            self.events.emitter(),
            self.settings.player_options(),
        )
    }

    /// Stop audio and readers, drop cached data. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut device) = self.device.lock().unwrap_or_else(|e| e.into_inner()).take() {
            device.stop();
        }
        self.readers.stop_all();
        self.cache.clear_all();
        info!("Context shut down");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}
