// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Goertzel single-bin tone-energy estimator.
//!
//! Computes the magnitude of one DFT bin with a second-order IIR recurrence,
//! which is cheaper than an FFT when only a single frequency matters. For
//! normalized input (−1.0 to 1.0), a full-scale pure sine at the target
//! frequency yields a magnitude of approximately 1.0.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GoertzelError {
    #[error("block size must be positive")]
    InvalidBlockSize,

    #[error("sample rate must be positive")]
    InvalidSampleRate,

    #[error("target frequency must be positive and less than the Nyquist frequency")]
    InvalidFrequency,

    #[error("insufficient samples for the configured block size")]
    InsufficientSamples,
}

/// Configuration for the Goertzel estimator.
#[derive(Debug, Clone, Copy)]
pub struct GoertzelConfig {
    /// Frequency to detect in Hz
    pub target_frequency: f64,
    /// Audio sample rate in Hz
    pub sample_rate: f64,
    /// Number of samples per detection window
    pub block_size: usize,
}

/// Single-frequency magnitude estimator.
///
/// All trigonometric work happens once at construction; per-block evaluation
/// is a multiply-add loop over the samples with O(1) state.
pub struct Goertzel {
    config: GoertzelConfig,
    /// 2 · cos(2π·k / N)
    coefficient: f64,
    /// 2 / N, scales the bin magnitude so a full-scale sine reads ~1.0
    normalizer: f64,
}

impl Goertzel {
    pub fn new(config: GoertzelConfig) -> Result<Self, GoertzelError> {
        if config.block_size == 0 {
            return Err(GoertzelError::InvalidBlockSize);
        }
        if config.sample_rate <= 0.0 {
            return Err(GoertzelError::InvalidSampleRate);
        }
        let nyquist = config.sample_rate / 2.0;
        if config.target_frequency <= 0.0 || config.target_frequency >= nyquist {
            return Err(GoertzelError::InvalidFrequency);
        }

        // Normalized frequency index, deliberately not rounded to a bin.
        let k = (config.target_frequency / config.sample_rate) * config.block_size as f64;
        let omega = (2.0 * std::f64::consts::PI * k) / config.block_size as f64;

        Ok(Self {
            config,
            coefficient: 2.0 * omega.cos(),
            normalizer: 2.0 / config.block_size as f64,
        })
    }

    /// Magnitude of the target frequency over the first `block_size` samples.
    ///
    /// Samples beyond `block_size` are ignored. Returns
    /// [`GoertzelError::InsufficientSamples`] when fewer are supplied.
    pub fn magnitude(&self, samples: &[f32]) -> Result<f64, GoertzelError> {
        if samples.len() < self.config.block_size {
            return Err(GoertzelError::InsufficientSamples);
        }
        Ok(self.compute_magnitude(samples))
    }

    /// Hot-path variant of [`magnitude`](Self::magnitude) without the length
    /// check. The caller must guarantee at least `block_size` samples.
    #[inline]
    pub fn magnitude_unchecked(&self, samples: &[f32]) -> f64 {
        debug_assert!(samples.len() >= self.config.block_size);
        self.compute_magnitude(samples)
    }

    fn compute_magnitude(&self, samples: &[f32]) -> f64 {
        let coeff = self.coefficient;
        let mut s1 = 0.0_f64;
        let mut s2 = 0.0_f64;

        for &sample in &samples[..self.config.block_size] {
            let s0 = sample as f64 + coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }

        // Guard against floating-point drift producing a tiny negative power.
        let power = (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0);

        power.sqrt() * self.normalizer
    }

    pub fn config(&self) -> GoertzelConfig {
        self.config
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
