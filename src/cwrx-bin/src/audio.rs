// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Audio capture for cwrx.
//!
//! Opens the configured input device via cpal on a dedicated thread. The
//! stream callback is the hot path: it downmixes to mono into a reusable
//! buffer, feeds the detector directly for lowest latency, and fans mono
//! chunks out on a broadcast channel for non-realtime consumers (the send
//! never blocks; lagging receivers drop frames).

use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use cwrx_core::{Detector, DynResult};

use crate::config::AudioConfig;

/// Names of the available audio input devices.
pub fn list_input_devices() -> DynResult<Vec<String>> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.input_devices()? {
        names.push(device.name().unwrap_or_else(|_| "unknown".into()));
    }
    Ok(names)
}

/// Spawn the audio capture thread. Runs until the shutdown flag flips.
pub fn spawn_capture(
    cfg: &AudioConfig,
    detector: Arc<Detector>,
    pcm_tx: broadcast::Sender<Vec<f32>>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::thread::JoinHandle<()> {
    let cfg = cfg.clone();
    std::thread::spawn(move || {
        if let Err(e) = run_capture(cfg, detector, pcm_tx, shutdown_rx) {
            tracing::error!("Audio capture thread error: {}", e);
        }
    })
}

fn run_capture(
    cfg: AudioConfig,
    detector: Arc<Detector>,
    pcm_tx: broadcast::Sender<Vec<f32>>,
    shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let host = cpal::default_host();
    let device = if let Some(ref name) = cfg.device {
        host.input_devices()?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| format!("audio input device '{}' not found", name))?
    } else {
        host.default_input_device()
            .ok_or("no default audio input device")?
    };

    info!(
        "Audio capture: using device '{}'",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let channels = cfg.channels as u16;
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(cfg.sample_rate),
        buffer_size: match cfg.buffer_size {
            None => cpal::BufferSize::Default,
            Some(frames) => cpal::BufferSize::Fixed(frames),
        },
    };

    // Reused across callbacks so the hot path does not allocate for the
    // downmix.
    let mut mono_buf: Vec<f32> = Vec::new();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono: &[f32] = if channels > 1 {
                let num_frames = data.len() / channels as usize;
                mono_buf.clear();
                mono_buf.reserve(num_frames);
                for frame in data.chunks_exact(channels as usize) {
                    mono_buf.push(frame[0]);
                }
                &mono_buf
            } else {
                data
            };

            detector.process(mono);

            // Consumers outside the hot path get a copy; no receivers, no copy.
            if pcm_tx.receiver_count() > 0 {
                let _ = pcm_tx.send(mono.to_vec());
            }
        },
        move |err| {
            tracing::error!("Audio input stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    info!(
        "Audio capture: started ({} Hz, {} ch)",
        cfg.sample_rate, cfg.channels
    );

    while !*shutdown_rx.borrow() {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("Audio capture: stopped");
    Ok(())
}

/// Periodically report the input RMS level at debug verbosity so an
/// operator can confirm audio is flowing.
pub async fn run_level_monitor(mut pcm_rx: broadcast::Receiver<Vec<f32>>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut sum_squares = 0.0_f64;
    let mut sample_count = 0_u64;

    loop {
        tokio::select! {
            recv = pcm_rx.recv() => {
                match recv {
                    Ok(frame) => {
                        for &s in &frame {
                            sum_squares += (s as f64) * (s as f64);
                        }
                        sample_count += frame.len() as u64;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("level monitor: dropped {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ticker.tick() => {
                if sample_count > 0 {
                    let rms = (sum_squares / sample_count as f64).sqrt();
                    debug!("audio input level: rms={:.4}", rms);
                    sum_squares = 0.0;
                    sample_count = 0;
                }
            }
        }
    }
}
