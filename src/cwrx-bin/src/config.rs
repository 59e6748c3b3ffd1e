// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for cwrx.
//!
//! Supports loading configuration from TOML files with the following search
//! order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./cwrx.toml` (current directory)
//! 3. `~/.config/cwrx-rs/cwrx.toml` (XDG config)
//! 4. `/etc/cwrx-rs/cwrx.toml` (system-wide)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cwrx_core::cw::patterns::{
    ADAPTIVE_ADJUSTMENT_RATE, MIN_MATCHES_FOR_ADJUSTMENT, MIN_PATTERN_CONFIDENCE,
};
use cwrx_core::{AdaptiveConfig, DecoderConfig, DetectorConfig, GoertzelConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration structure for `cwrx.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CwrxConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Audio capture settings
    pub audio: AudioConfig,
    /// Tone detection settings
    pub detector: DetectorSection,
    /// CW decoding settings
    pub decoder: DecoderSection,
    /// Pattern-matching adaptation settings
    pub patterns: PatternsConfig,
    /// Decode log file settings
    pub decode_log: DecodeLogConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Audio input device name (None = system default)
    pub device: Option<String>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of audio channels (stereo input is downmixed to mono)
    pub channels: u8,
    /// Requested frames per driver callback (None = driver default)
    pub buffer_size: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48_000,
            channels: 1,
            buffer_size: None,
        }
    }
}

/// Tone detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    /// CW tone frequency in Hz
    pub tone_frequency_hz: f64,
    /// Goertzel block size (samples per detection window)
    pub block_size: usize,
    /// Block overlap percentage (0–99), higher = smoother but more CPU
    pub overlap_pct: u32,
    /// Detection threshold (0.0–1.0) the tone magnitude must exceed
    pub threshold: f64,
    /// Consecutive blocks required to confirm a state change
    pub hysteresis_blocks: u32,
    /// Enable automatic gain control
    pub agc_enabled: bool,
    /// AGC peak decay rate per block (0.99–0.99999)
    pub agc_decay: f64,
    /// AGC attack rate (0.0–1.0), how fast to follow louder signals
    pub agc_attack: f64,
    /// Blocks to process before detection starts, letting AGC calibrate
    pub agc_warmup_blocks: u32,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            tone_frequency_hz: 600.0,
            block_size: 512,
            overlap_pct: 50,
            threshold: 0.4,
            hysteresis_blocks: 5,
            agc_enabled: true,
            agc_decay: 0.9995,
            agc_attack: 0.1,
            agc_warmup_blocks: 10,
        }
    }
}

/// CW decoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderSection {
    /// Initial WPM estimate
    pub wpm: u32,
    /// Adapt to the sender's speed
    pub adaptive_timing: bool,
    /// EMA smoothing factor for timing adaptation (0.0–1.0)
    pub adaptive_smoothing: f64,
    /// Tone/dit duration ratio above which a tone is a dah
    pub dit_dah_boundary: f64,
    /// Gap/dit ratio above which a gap ends the character
    pub inter_char_boundary: f64,
    /// Gap/dit ratio above which a gap ends the word
    pub char_word_boundary: f64,
    /// Farnsworth spacing WPM (0 = same as `wpm`)
    pub farnsworth_wpm: u32,
}

impl Default for DecoderSection {
    fn default() -> Self {
        Self {
            wpm: 15,
            adaptive_timing: true,
            adaptive_smoothing: 0.1,
            dit_dah_boundary: 2.0,
            inter_char_boundary: 1.0,
            char_word_boundary: 5.0,
            farnsworth_wpm: 0,
        }
    }
}

/// Pattern-matching adaptation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    /// Whether the adaptation layer is attached
    pub enabled: bool,
    /// Minimum confidence for a candidate match (0.0–1.0)
    pub min_confidence: f64,
    /// EMA rate for boundary adjustments (0.0–1.0)
    pub adjustment_rate: f64,
    /// Confirmed matches of a pattern required before adjusting
    pub min_matches: u32,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: MIN_PATTERN_CONFIDENCE,
            adjustment_rate: ADAPTIVE_ADJUSTMENT_RATE,
            min_matches: MIN_MATCHES_FOR_ADJUSTMENT,
        }
    }
}

fn default_decode_log_dir() -> String {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir
            .join("cwrx-rs")
            .join("decodes")
            .to_string_lossy()
            .to_string();
    }
    "logs/decodes".to_string()
}

/// Decode log file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeLogConfig {
    /// Whether decode file logging is enabled
    pub enabled: bool,
    /// Base directory for log files
    pub dir: String,
    /// Log filename; `%YYYY%`, `%MM%`, `%DD%` expand to the current date
    pub file: String,
}

impl Default for DecodeLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_decode_log_dir(),
            file: "CWRX-%YYYY%-%MM%-%DD%.log".to_string(),
        }
    }
}

impl CwrxConfig {
    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Load configuration from the default search paths.
    /// Returns default config if no config file is found.
    pub fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in Self::default_search_paths() {
            if path.exists() {
                let config = Self::load_from_file(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Default search paths for config files.
    pub fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("cwrx.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cwrx-rs").join("cwrx.toml"));
        }

        paths.push(PathBuf::from("/etc/cwrx-rs/cwrx.toml"));
        paths
    }

    /// Generate an example configuration as a TOML string.
    pub fn example_toml() -> String {
        let example = CwrxConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            ..Self::default()
        };

        toml::to_string_pretty(&example).unwrap_or_default()
    }

    /// Check that all settings are within acceptable ranges; every violation
    /// is reported in the error message.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let audio = &self.audio;
        if !(8_000..=192_000).contains(&audio.sample_rate) {
            errors.push(format!(
                "audio.sample_rate must be between 8000 and 192000 Hz, got {}",
                audio.sample_rate
            ));
        }
        if !(1..=2).contains(&audio.channels) {
            errors.push(format!(
                "audio.channels must be 1 or 2, got {}",
                audio.channels
            ));
        }
        if let Some(buffer_size) = audio.buffer_size {
            if !(64..=8_192).contains(&buffer_size) {
                errors.push(format!(
                    "audio.buffer_size must be between 64 and 8192, got {buffer_size}"
                ));
            } else if !buffer_size.is_power_of_two() {
                errors.push(format!(
                    "audio.buffer_size should be a power of 2, got {buffer_size}"
                ));
            }
        }

        let detector = &self.detector;
        if !(100.0..=3_000.0).contains(&detector.tone_frequency_hz) {
            errors.push(format!(
                "detector.tone_frequency_hz must be between 100 and 3000 Hz, got {}",
                detector.tone_frequency_hz
            ));
        }
        if detector.tone_frequency_hz >= audio.sample_rate as f64 / 2.0 {
            errors.push(format!(
                "detector.tone_frequency_hz ({} Hz) must be less than the Nyquist frequency ({} Hz)",
                detector.tone_frequency_hz,
                audio.sample_rate as f64 / 2.0
            ));
        }
        if !(32..=4_096).contains(&detector.block_size) {
            errors.push(format!(
                "detector.block_size must be between 32 and 4096, got {}",
                detector.block_size
            ));
        } else if !detector.block_size.is_power_of_two() {
            errors.push(format!(
                "detector.block_size should be a power of 2, got {}",
                detector.block_size
            ));
        }
        if detector.overlap_pct > 99 {
            errors.push(format!(
                "detector.overlap_pct must be between 0 and 99, got {}",
                detector.overlap_pct
            ));
        }
        if !(0.0..=1.0).contains(&detector.threshold) {
            errors.push(format!(
                "detector.threshold must be between 0.0 and 1.0, got {}",
                detector.threshold
            ));
        }
        if !(1..=50).contains(&detector.hysteresis_blocks) {
            errors.push(format!(
                "detector.hysteresis_blocks must be between 1 and 50, got {}",
                detector.hysteresis_blocks
            ));
        }
        if !(0.99..=0.99999).contains(&detector.agc_decay) {
            errors.push(format!(
                "detector.agc_decay must be between 0.99 and 0.99999, got {}",
                detector.agc_decay
            ));
        }
        if !(0.0..=1.0).contains(&detector.agc_attack) {
            errors.push(format!(
                "detector.agc_attack must be between 0.0 and 1.0, got {}",
                detector.agc_attack
            ));
        }

        let decoder = &self.decoder;
        if !(5..=60).contains(&decoder.wpm) {
            errors.push(format!(
                "decoder.wpm must be between 5 and 60, got {}",
                decoder.wpm
            ));
        }
        if decoder.farnsworth_wpm > decoder.wpm {
            errors.push(format!(
                "decoder.farnsworth_wpm must not exceed decoder.wpm, got {} > {}",
                decoder.farnsworth_wpm, decoder.wpm
            ));
        }
        if !(0.0..=1.0).contains(&decoder.adaptive_smoothing) {
            errors.push(format!(
                "decoder.adaptive_smoothing must be between 0.0 and 1.0, got {}",
                decoder.adaptive_smoothing
            ));
        }
        if decoder.dit_dah_boundary <= 1.0 {
            errors.push(format!(
                "decoder.dit_dah_boundary must be greater than 1.0, got {}",
                decoder.dit_dah_boundary
            ));
        }
        if decoder.inter_char_boundary <= 0.0 {
            errors.push(format!(
                "decoder.inter_char_boundary must be positive, got {}",
                decoder.inter_char_boundary
            ));
        }
        if decoder.char_word_boundary <= decoder.dit_dah_boundary {
            errors.push(format!(
                "decoder.char_word_boundary must exceed decoder.dit_dah_boundary, got {} <= {}",
                decoder.char_word_boundary, decoder.dit_dah_boundary
            ));
        }

        let patterns = &self.patterns;
        if !(0.0..=1.0).contains(&patterns.min_confidence) {
            errors.push(format!(
                "patterns.min_confidence must be between 0.0 and 1.0, got {}",
                patterns.min_confidence
            ));
        }
        if !(0.0..=1.0).contains(&patterns.adjustment_rate) {
            errors.push(format!(
                "patterns.adjustment_rate must be between 0.0 and 1.0, got {}",
                patterns.adjustment_rate
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }

    pub fn goertzel_config(&self) -> GoertzelConfig {
        GoertzelConfig {
            target_frequency: self.detector.tone_frequency_hz,
            sample_rate: self.audio.sample_rate as f64,
            block_size: self.detector.block_size,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            threshold: self.detector.threshold,
            hysteresis_blocks: self.detector.hysteresis_blocks,
            overlap_pct: self.detector.overlap_pct,
            agc_enabled: self.detector.agc_enabled,
            agc_decay: self.detector.agc_decay,
            agc_attack: self.detector.agc_attack,
            agc_warmup_blocks: self.detector.agc_warmup_blocks,
        }
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            initial_wpm: self.decoder.wpm,
            adaptive_timing: self.decoder.adaptive_timing,
            adaptive_smoothing: self.decoder.adaptive_smoothing,
            dit_dah_boundary: self.decoder.dit_dah_boundary,
            inter_char_boundary: self.decoder.inter_char_boundary,
            char_word_boundary: self.decoder.char_word_boundary,
            farnsworth_wpm: self.decoder.farnsworth_wpm,
        }
    }

    pub fn adaptive_config(&self) -> AdaptiveConfig {
        AdaptiveConfig {
            min_confidence: self.patterns.min_confidence,
            adjustment_rate: self.patterns.adjustment_rate,
            min_matches_for_adjust: self.patterns.min_matches,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
