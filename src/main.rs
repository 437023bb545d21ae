use playa_engine::cli::Args;
use playa_engine::config::{self, EngineSettings, PathConfig};
use playa_engine::core::audio_mixer::NullAudioSystem;
use playa_engine::core::pattern::{PatternDecoderFactory, PatternMedia};
use playa_engine::core::player::Playback;
use playa_engine::core::player_events::{LoopChanged, PlaybackChanged};
use playa_engine::entities::{Clip, Path, TimeRange, Timeline, TrackKind};
use playa_engine::utils::init_logger;
use playa_engine::Context;

use anyhow::{bail, Result};
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Video track of `clips` back-to-back clips plus one audio track
/// spanning the whole edit.
fn demo_timeline(clips: usize, clip_frames: i64, rate: f64) -> Result<Timeline> {
    if clips == 0 || clip_frames <= 0 {
        bail!("Timeline needs at least one clip with at least one frame");
    }
    let mut timeline = Timeline::new("demo", rate);
    let video = timeline.add_track(TrackKind::Video, "V1");
    for i in 0..clips {
        let path = Path::new(&format!("/pattern/clip_{:02}.mov", i));
        let first = i as i64 * 10;
        let range = TimeRange::from_frames(first, first + clip_frames - 1, rate);
        timeline.append_clip(video, format!("clip_{}", i), Clip::new(path, range))?;
    }
    let audio = timeline.add_track(TrackKind::Audio, "A1");
    let total = clip_frames * clips as i64;
    let range = TimeRange::from_frames(0, total - 1, rate);
    timeline.append_clip(audio, "tone", Clip::new(Path::new("/pattern/tone.wav"), range))?;
    Ok(timeline)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = path_config.ensure_dirs() {
        eprintln!("Warning: Failed to create engine directories: {:#}", e);
    }

    let log_path = args
        .log_file
        .as_ref()
        .map(|p| p.clone().unwrap_or_else(|| path_config.data_file(config::LOG_FILE)));
    init_logger(args.verbosity, log_path.as_deref())?;

    let settings_path = path_config.settings_file();
    let mut settings = match EngineSettings::load_or_default(&settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("{:#}, using defaults", e);
            EngineSettings::default()
        }
    };
    if let Some(speed) = args.speed {
        settings.default_speed = speed;
    }
    if let Some(loop_mode) = args.loop_mode {
        settings.loop_mode = loop_mode.into();
    }
    let settings = settings.sanitized();
    if args.save_settings {
        settings.save(&settings_path)?;
        info!("Settings saved to {}", settings_path.display());
    }

    let media = PatternMedia {
        rate: args.rate,
        frames: args.clip_frames * args.clips.max(1) as i64 + 10 * args.clips as i64,
        ..Default::default()
    };
    let ctx = Context::new(
        settings,
        Arc::new(PatternDecoderFactory::new(media)),
        Arc::new(NullAudioSystem::new()),
    );
    for device in ctx.audio_system().devices() {
        info!("Audio device '{}': {}ch@{}", device.name, device.channels, device.sample_rate);
    }
    ctx.events().subscribe::<PlaybackChanged, _>(|e| info!("Playback: {:?}", e.0));
    ctx.events().subscribe::<LoopChanged, _>(|e| info!("Loop: {:?}", e.0));

    let timeline = Arc::new(demo_timeline(args.clips, args.clip_frames, args.rate)?);
    info!("Timeline '{}': {}", timeline.name(), timeline.time_range());
    let mut player = ctx.create_player(Arc::clone(&timeline));

    if let Some(range) = &args.range {
        if let [first, last] = range.as_slice() {
            player.set_in_out_range(TimeRange::from_frames(*first, *last, args.rate));
        }
    }
    if let Some(frame) = args.start_frame {
        player.seek(playa_engine::RationalTime::from_frames(frame, args.rate));
    }
    player.set_playback(if args.reverse { Playback::Reverse } else { Playback::Forward });

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let deadline = Instant::now() + Duration::from_secs_f64(args.duration.max(0.0));
    let mut last_report = Instant::now();
    let mut last = Instant::now();
    while Instant::now() < deadline {
        std::thread::sleep(tick);
        let now = Instant::now();
        player.tick(now - last);
        last = now;
        ctx.events().poll();

        if last_report.elapsed() >= Duration::from_secs(1) {
            let info = player.cache_info();
            info!(
                "Frame {} | video cache {:.1}% {:?} | audio cache {:.1}%",
                player.current_frame(),
                info.video_percentage,
                info.video,
                info.audio_percentage
            );
            last_report = Instant::now();
        }
    }
    player.stop();

    let (used, limit) = ctx.cache_manager().mem();
    let (video_stats, audio_stats) = (ctx.cache().video_stats(), ctx.cache().audio_stats());
    println!(
        "Stopped at frame {} ({}) of {} | cached {} video ({:.0}% hits) / {} audio ({:.0}% hits) | memory {} / {} MB",
        player.current_frame(),
        player.current_time().to_timecode(),
        timeline.time_range(),
        ctx.cache().video_len(),
        video_stats.hit_rate() * 100.0,
        ctx.cache().audio_len(),
        audio_stats.hit_rate() * 100.0,
        used / (1024 * 1024),
        limit / (1024 * 1024)
    );
    ctx.shutdown();
    Ok(())
}
