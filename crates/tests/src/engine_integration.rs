//! Integration tests for the equalizer engine
//!
//! These drive the engine the way the CLI and the device callback do: a
//! control handle on one side, the block processor on the other, and the
//! spectrum worker on its own thread.

use cybertune_core::domain::{
    added_gain, Band, EngineConfig, EngineError, EngineParts, FilterBank, SampleBuffer,
    SampleRate, BAND_COUNT,
};
use cybertune_tests::{generate_program, generate_silence, generate_sine_wave, peak};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const BLOCK: usize = 512;

fn test_config(block_size: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.engine.block_size = block_size;
    config.spectrum.bins = 4.min(block_size / 2);
    config
}

fn engine() -> EngineParts {
    let mut config = test_config(BLOCK);
    config.spectrum.bins = 60;
    EngineParts::new(&config).unwrap()
}

fn program_track(frames: usize, channels: u16, sample_rate: u32, amplitude: f32) -> SampleBuffer {
    let samples = generate_program(sample_rate, frames, usize::from(channels), amplitude);
    SampleBuffer::new(samples, sample_rate, channels).unwrap()
}

// ============================================================================
// CONTROL SURFACE
// ============================================================================

#[test]
fn test_full_control_surface() {
    let EngineParts {
        handle,
        mut processor,
        ..
    } = engine();
    let mut out = vec![0.0; BLOCK * 2];

    assert!(!handle.is_loaded());
    assert!(!handle.play());

    handle.load(program_track(BLOCK * 10, 2, 44100, 0.3)).unwrap();
    assert!(handle.is_loaded());
    assert_eq!(handle.duration_frames(), BLOCK * 10);
    assert_eq!(handle.sample_rate(), Some(SampleRate::Hz44100));

    handle.set_band_gain(0, 6.0).unwrap();
    handle.set_band_gain(5, -3.0).unwrap();
    handle.set_bass_boost(4.0);
    handle.set_treble_boost(2.0);
    handle.set_booster_active(true);
    handle.set_preamp(1.5);
    handle.set_master_volume(0.6);

    let params = handle.params();
    assert_eq!(params.band_gains_db[0], 6.0);
    assert_eq!(params.total_gain_db(0), 6.0 + 4.0 + 8.0);
    assert_eq!(params.total_gain_db(5), -3.0);
    assert_eq!(params.total_gain_db(9), 2.0);
    assert_eq!(params.preamp, 1.5);
    assert_eq!(params.master_volume, 0.6);

    assert!(handle.play());
    for _ in 0..3 {
        processor.process(&mut out, 2);
        assert!(peak(&out) > 0.0);
        assert!(peak(&out) <= 1.0);
    }
    assert_eq!(handle.position_frames(), BLOCK * 3);

    handle.pause();
    processor.process(&mut out, 2);
    assert_eq!(out, generate_silence(BLOCK * 2));
    assert_eq!(handle.position_frames(), BLOCK * 3);

    handle.restart().unwrap();
    assert!(handle.toggle());
    processor.process(&mut out, 2);
    assert_eq!(handle.position_frames(), BLOCK);
}

#[test]
fn test_out_of_range_controls() {
    let EngineParts { handle, .. } = engine();

    assert!(matches!(
        handle.set_band_gain(BAND_COUNT, 1.0),
        Err(EngineError::InvalidInput(_))
    ));

    handle.set_band_gain(2, 40.0).unwrap();
    handle.set_master_volume(3.0);
    handle.set_preamp(-1.0);
    handle.set_bass_boost(f32::NAN);

    let params = handle.params();
    assert_eq!(params.band_gains_db[2], 15.0);
    assert_eq!(params.master_volume, 1.0);
    assert_eq!(params.preamp, 0.0);
    assert_eq!(params.bass_boost_db, 0.0);
}

#[test]
fn test_end_of_track_stops_playback() {
    let EngineParts {
        handle,
        mut processor,
        ..
    } = engine();
    handle.load(program_track(BLOCK * 2 + 100, 1, 44100, 0.5)).unwrap();
    handle.play();

    let mut out = vec![0.0; BLOCK];
    processor.process(&mut out, 1);
    processor.process(&mut out, 1);
    assert!(handle.is_playing());

    processor.process(&mut out, 1);
    assert!(!handle.is_playing());
    assert_eq!(out, generate_silence(BLOCK));
    assert_eq!(handle.position_frames(), BLOCK * 2);
}

// ============================================================================
// LOAD / REBUILD
// ============================================================================

#[test]
fn test_rebuild_on_load() {
    let EngineParts {
        handle,
        mut processor,
        ..
    } = engine();
    let mut out = vec![0.0; BLOCK * 2];

    handle.load(program_track(BLOCK * 4, 2, 44100, 0.5)).unwrap();
    handle.play();
    processor.process(&mut out, 2);

    handle.load(program_track(BLOCK * 4, 2, 22050, 0.5)).unwrap();
    processor.process(&mut out, 2);

    let bank = processor.filter_bank().unwrap();
    assert_eq!(bank.sample_rate(), SampleRate::Hz22050);
    for index in 0..BAND_COUNT {
        assert_eq!(bank.band(index), Some(&Band::new(index, SampleRate::Hz22050)));
    }
    // Only the top bands reach the clamp below Nyquist
    assert_eq!(bank.band(8).unwrap().high_hz, 11024.0);
    assert_ne!(*bank.band(8).unwrap(), Band::new(8, SampleRate::Hz44100));
    assert!(!bank.is_active(9));
}

#[test]
fn test_degenerate_band_adds_nothing_at_low_rate() {
    let EngineParts {
        handle,
        mut processor,
        ..
    } = engine();
    let track = program_track(BLOCK * 2, 1, 22050, 0.2);
    let input = track.samples()[..BLOCK].to_vec();
    handle.load(track).unwrap();
    handle.set_master_volume(1.0);
    handle.set_band_gain(9, 15.0).unwrap();
    handle.play();

    let mut out = vec![0.0; BLOCK];
    processor.process(&mut out, 1);

    assert!(!processor.filter_bank().unwrap().is_active(9));
    assert_eq!(out, input);
}

// ============================================================================
// PRESETS
// ============================================================================

#[test]
fn test_rock_preset_end_to_end() {
    let EngineParts {
        handle,
        mut processor,
        ..
    } = engine();
    let track = program_track(BLOCK * 3, 2, 44100, 0.1);
    let input = track.samples().to_vec();
    handle.load(track).unwrap();
    handle.set_master_volume(1.0);

    let gains = handle.apply_preset("Rock").unwrap();
    assert_eq!(gains, [5.0, 4.0, 3.0, 0.0, -1.0, -1.0, 0.0, 3.0, 4.0, 5.0]);
    assert_eq!(handle.params().band_gains_db, gains);
    handle.play();

    // Same algorithm, run by hand over two consecutive blocks
    let mut bank = FilterBank::new(SampleRate::Hz44100, 2);
    let mut out = vec![0.0; BLOCK * 2];
    for block in input.chunks_exact(BLOCK * 2).take(2) {
        let mut expected = block.to_vec();
        for (band, &db) in gains.iter().enumerate() {
            if db != 0.0 {
                bank.add_filtered(band, block, added_gain(db), &mut expected);
            }
        }
        processor.process(&mut out, 2);
        for (y, e) in out.iter().zip(&expected) {
            assert_eq!(*y, e.clamp(-1.0, 1.0));
        }
    }
}

#[tokio::test]
async fn test_config_file_drives_engine() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    tokio::fs::write(
        &path,
        r#"
        [engine]
        block_size = 1024

        [equalizer]
        master_volume = 0.5
        preset = "Late Night"

        [presets]
        "Late Night" = [6, 5, 4, 0, 0, 0, 0, -2, -3, -4]
        "#,
    )
    .await
    .unwrap();

    let config = EngineConfig::load_from_file(&path).await.unwrap();
    let parts = EngineParts::new(&config).unwrap();

    assert_eq!(parts.handle.block_size(), 1024);
    assert_eq!(parts.processor.block_size(), 1024);
    let params = parts.handle.params();
    assert_eq!(params.master_volume, 0.5);
    assert_eq!(
        params.band_gains_db,
        [6.0, 5.0, 4.0, 0.0, 0.0, 0.0, 0.0, -2.0, -3.0, -4.0]
    );
    assert!(parts.handle.presets().contains("late night"));
    assert!(parts.handle.presets().contains("Rock"));
}

#[test]
fn test_unknown_initial_preset_is_rejected() {
    let mut config = test_config(BLOCK);
    config.equalizer.preset = Some("Polka".to_string());
    assert!(EngineParts::new(&config).is_err());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_setters_while_processing() {
    let EngineParts {
        handle,
        mut processor,
        ..
    } = engine();
    handle.load(program_track(BLOCK * 400, 2, 44100, 0.9)).unwrap();
    handle.play();

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let handle = handle.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let presets: Vec<String> = handle.presets().names().map(String::from).collect();
            let mut step = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let db = (step % 31) as f32 - 15.0;
                handle.set_band_gain(step % BAND_COUNT, db).unwrap();
                handle.set_bass_boost((step % 16) as f32);
                handle.set_treble_boost(((step * 7) % 16) as f32);
                handle.set_booster_active(step % 3 == 0);
                handle.set_preamp((step % 5) as f32 * 0.5);
                handle.set_master_volume((step % 11) as f32 / 10.0);
                if step % 50 == 0 {
                    handle
                        .apply_preset(&presets[step / 50 % presets.len()])
                        .unwrap();
                }
                step += 1;
            }
            step
        })
    };

    let mut out = vec![0.0; BLOCK * 2];
    let mut blocks = 0;
    while handle.is_playing() && blocks < 400 {
        processor.process(&mut out, 2);
        assert!(
            out.iter().all(|y| y.is_finite() && y.abs() <= 1.0),
            "block {blocks} out of range"
        );
        blocks += 1;
    }

    stop.store(true, Ordering::Relaxed);
    let steps = writer.join().unwrap();
    assert!(steps > 0);
    assert_eq!(blocks, 400);
}

/// Mono track whose frame `n` carries the tag `id * 100 + n`
fn tagged_track(id: usize, frames: usize) -> SampleBuffer {
    let samples = (0..frames)
        .map(|frame| (id * 100 + frame) as f32 * 1e-5)
        .collect();
    SampleBuffer::new(samples, 44100, 1).unwrap()
}

/// (track id, frame) of a tagged output sample
fn read_tag(sample: f32) -> (usize, usize) {
    let tag = (f64::from(sample) * 1e5).round() as usize;
    (tag / 100, tag % 100)
}

#[test]
fn test_load_from_another_thread() {
    const TAG_BLOCK: usize = 16;
    const TAG_FRAMES: usize = 64;
    const TRACKS: usize = 600;

    let EngineParts {
        handle,
        mut processor,
        ..
    } = EngineParts::new(&test_config(TAG_BLOCK)).unwrap();
    handle.set_master_volume(1.0);
    handle.load(tagged_track(1, TAG_FRAMES)).unwrap();
    handle.play();

    let loader = {
        let handle = handle.clone();
        thread::spawn(move || {
            for id in 2..=TRACKS {
                loop {
                    match handle.load(tagged_track(id, TAG_FRAMES)) {
                        Ok(()) => break,
                        Err(EngineError::QueueFull(_)) => thread::yield_now(),
                        Err(e) => panic!("load failed: {e}"),
                    }
                }
                handle.play();
            }
        })
    };

    let mut out = vec![0.0; TAG_BLOCK];
    let mut previous: Option<(usize, usize)> = None;
    let mut blocks = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while !loader.is_finished() && Instant::now() < deadline {
        processor.process(&mut out, 1);
        if out[0] == 0.0 {
            // Paused or past the end of the current track
            continue;
        }

        let (id, start) = read_tag(out[0]);
        for (offset, &y) in out.iter().enumerate() {
            assert_eq!(read_tag(y), (id, start + offset), "block mixes tracks");
        }
        if let Some((last_id, last_start)) = previous {
            if id == last_id {
                assert_eq!(
                    start,
                    last_start + TAG_BLOCK,
                    "track {id}: block at frame {last_start} then frame {start}"
                );
            } else {
                assert!(id > last_id, "track {last_id} came back after {id}");
                assert_eq!(start, 0, "track {id} started at frame {start}");
            }
        }
        previous = Some((id, start));
        blocks += 1;
    }
    loader.join().unwrap();
    assert!(blocks > 0);

    processor.process(&mut out, 1);
    assert_eq!(handle.duration_frames(), TAG_FRAMES);
    let bank = processor.filter_bank().unwrap();
    assert_eq!(bank.sample_rate(), SampleRate::Hz44100);
}

// ============================================================================
// SPECTRUM
// ============================================================================

#[test]
fn test_spectrum_worker_thread() {
    let EngineParts {
        handle,
        mut processor,
        spectrum,
    } = engine();
    let worker = spectrum.spawn().unwrap();

    let samples = generate_sine_wave(1000.0, 44100, BLOCK * 8, 2, 0.5);
    handle
        .load(SampleBuffer::new(samples, 44100, 2).unwrap())
        .unwrap();
    handle.play();

    let mut out = vec![0.0; BLOCK * 2];
    for _ in 0..4 {
        processor.process(&mut out, 2);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.spectrum().sequence() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    let snapshot = handle.spectrum().latest();
    assert!(snapshot.sequence >= 1);
    assert_eq!(snapshot.bins(), 60);
    assert!(snapshot.magnitudes.iter().all(|&m| m >= 0.0 && m.is_finite()));
    assert!(snapshot.peak() > 0.0);

    // Dropping the processor closes the tap and ends the worker
    drop(processor);
    worker.join().unwrap();
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_playback_stops_at_last_full_block(
        block in 16usize..256,
        frames in 1usize..3000,
    ) {
        let parts = EngineParts::new(&test_config(block)).unwrap();
        let EngineParts { handle, mut processor, .. } = parts;
        handle.load(program_track(frames, 1, 44100, 0.5)).unwrap();
        handle.play();

        let mut out = vec![0.0; block];
        let mut processed = 0;
        for _ in 0..(frames / block + 2) {
            processor.process(&mut out, 1);
            if !handle.is_playing() {
                break;
            }
            processed += 1;
        }

        prop_assert!(!handle.is_playing());
        prop_assert_eq!(processed, frames / block);
        prop_assert_eq!(handle.position_frames(), frames / block * block);
    }
}
