// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Core signal pipeline for real-time CW (Morse code) decoding.
//!
//! Three stages, driven block-by-block from the audio callback:
//! tone-energy estimation ([`dsp::goertzel`]) → debounced tone-presence
//! detection ([`dsp::detector`]) → adaptive Morse element decoding
//! ([`cw::decoder`]), with an optional pattern-matching adaptation layer
//! ([`cw::patterns`]) that slowly tunes the inter-character gap threshold.

pub mod cw;
pub mod dsp;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use cw::decoder::{DecodedOutput, Decoder, DecoderConfig, Element};
pub use cw::patterns::{AdaptiveConfig, AdaptiveDecoder, CorrectedOutput};
pub use dsp::detector::{Detector, DetectorConfig, ToneEvent};
pub use dsp::goertzel::{Goertzel, GoertzelConfig};
