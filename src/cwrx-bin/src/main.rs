// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod audio;
mod config;
mod decode_log;
mod logging;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cwrx_core::{
    AdaptiveDecoder, CorrectedOutput, DecodedOutput, Decoder, Detector, DynResult, Goertzel,
};

use config::CwrxConfig;
use decode_log::DecodeLogger;
use logging::init_logging;

const PKG_DESCRIPTION: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " - real-time CW decoder for audio input"
);
const OUTPUT_CHANNEL_BUFFER: usize = 256;
const PCM_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Parser)]
#[command(
    name = "cwrx",
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// List audio input devices and exit
    #[arg(long = "list-devices")]
    list_devices: bool,
    /// Audio input device name (overrides config)
    #[arg(short = 'd', long = "device")]
    device: Option<String>,
    /// CW tone frequency in Hz (overrides config)
    #[arg(short = 'f', long = "frequency")]
    frequency: Option<f64>,
    /// Initial WPM estimate (overrides config)
    #[arg(short = 'w', long = "wpm")]
    wpm: Option<u32>,
    /// Log level: trace, debug, info, warn, error (overrides config)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

/// Messages from the audio-thread callbacks to the async output task.
enum OutputMsg {
    Decoded(DecodedOutput),
    Corrected(CorrectedOutput),
}

fn apply_cli_overrides(cfg: &mut CwrxConfig, cli: &Cli) {
    if cli.device.is_some() {
        cfg.audio.device = cli.device.clone();
    }
    if let Some(frequency) = cli.frequency {
        cfg.detector.tone_frequency_hz = frequency;
    }
    if let Some(wpm) = cli.wpm {
        cfg.decoder.wpm = wpm;
    }
    if cli.log_level.is_some() {
        cfg.general.log_level = cli.log_level.clone();
    }
}

/// Print decoded characters to stdout and append them to the decode log.
async fn run_output_task(
    mut rx: mpsc::Receiver<OutputMsg>,
    decode_logger: Option<Arc<DecodeLogger>>,
) {
    let mut stdout = std::io::stdout();
    while let Some(msg) = rx.recv().await {
        match msg {
            OutputMsg::Decoded(output) => {
                let mut buf = [0_u8; 4];
                let _ = stdout.write_all(output.character.encode_utf8(&mut buf).as_bytes());
                let _ = stdout.flush();
                if let Some(ref logger) = decode_logger {
                    logger.log(&output);
                }
            }
            OutputMsg::Corrected(corrected) => {
                if corrected.timing_adjusted {
                    info!(
                        "pattern '{}' confirmed (confidence {:.2}); inter-char boundary adjusted",
                        corrected.corrected, corrected.confidence
                    );
                } else {
                    debug!(
                        "pattern '{}' matched (confidence {:.2})",
                        corrected.corrected, corrected.confidence
                    );
                }
            }
        }
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", CwrxConfig::example_toml());
        return Ok(());
    }

    if cli.list_devices {
        for name in audio::list_input_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        (CwrxConfig::load_from_file(path)?, Some(path.clone()))
    } else {
        CwrxConfig::load_from_default_paths()?
    };
    apply_cli_overrides(&mut cfg, &cli);
    cfg.validate()?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    // Core pipeline: Goertzel → detector → decoder (→ pattern layer).
    let goertzel = Goertzel::new(cfg.goertzel_config())?;
    let detector = Arc::new(Detector::new(cfg.detector_config(), goertzel)?);
    let decoder = Arc::new(Decoder::new(cfg.decoder_config())?);

    let (output_tx, output_rx) = mpsc::channel::<OutputMsg>(OUTPUT_CHANNEL_BUFFER);

    // Decoded characters leave the audio thread through a try-send; a full
    // queue drops output rather than stalling the callback chain.
    let decoded_tx = output_tx.clone();
    decoder.set_callback(Some(Arc::new(move |output| {
        let _ = decoded_tx.try_send(OutputMsg::Decoded(output));
    })));

    let handler = decoder.clone();
    detector.set_callback(Some(Arc::new(move |event| {
        handler.handle_tone_event(event);
    })));

    let adaptive = if cfg.patterns.enabled {
        let adaptive = Arc::new(AdaptiveDecoder::new(decoder.clone(), cfg.adaptive_config()));
        adaptive.attach();
        let corrected_tx = output_tx.clone();
        adaptive.set_corrected_callback(Some(Arc::new(move |corrected| {
            let _ = corrected_tx.try_send(OutputMsg::Corrected(corrected));
        })));
        Some(adaptive)
    } else {
        None
    };
    drop(output_tx);

    let decode_logger = match DecodeLogger::from_config(&cfg.decode_log) {
        Ok(logger) => logger.map(Arc::new),
        Err(e) => {
            warn!("Decode file logging disabled: {}", e);
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();

    task_handles.push(tokio::spawn(run_output_task(output_rx, decode_logger)));

    let (pcm_tx, _) = broadcast::channel::<Vec<f32>>(PCM_BROADCAST_CAPACITY);
    let monitor_rx = pcm_tx.subscribe();
    let monitor_shutdown_rx = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move {
        tokio::select! {
            _ = audio::run_level_monitor(monitor_rx) => {}
            _ = wait_for_shutdown(monitor_shutdown_rx) => {}
        }
    }));

    let capture_thread =
        audio::spawn_capture(&cfg.audio, detector.clone(), pcm_tx, shutdown_rx.clone());

    info!(
        "cwrx started ({} Hz tone, {} WPM initial, patterns {}); Ctrl+C to stop",
        cfg.detector.tone_frequency_hz,
        cfg.decoder.wpm,
        if adaptive.is_some() { "on" } else { "off" },
    );

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);

    // Give in-flight callbacks and the output queue a moment to drain.
    tokio::time::sleep(Duration::from_millis(300)).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }
    if capture_thread.join().is_err() {
        error!("audio capture thread panicked");
    }

    // Final newline so the shell prompt does not glue to decoded text.
    println!();
    Ok(())
}
