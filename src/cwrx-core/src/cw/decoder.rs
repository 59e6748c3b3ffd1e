// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! CW element decoder.
//!
//! Translates [`ToneEvent`]s into characters: tone durations classify as
//! dit or dah against an adaptive dit estimate, gap durations classify as
//! intra-character / character / word boundaries, and the dit/dah sequence
//! walks the implicit-heap ITU Morse tree until a boundary emits the
//! character at the current node.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::dsp::detector::ToneEvent;

// ITU timing ratios. Dah = 3 dits, intra-character gap = 1 dit,
// inter-character gap = 3 dits, inter-word gap = 7 dits, and the reference
// word "PARIS" spans 50 dit units.
pub const DAH_DIT_RATIO: f64 = 3.0;
pub const INTRA_CHAR_SPACE_RATIO: f64 = 1.0;
pub const INTER_CHAR_SPACE_RATIO: f64 = 3.0;
pub const WORD_SPACE_RATIO: f64 = 7.0;
pub const MS_PER_MINUTE: f64 = 60_000.0;
pub const DITS_PER_WORD: f64 = 50.0;

/// Binary tree for Morse lookup: root at index 1, dit branch at `2i`, dah
/// branch at `2i + 1`. Unassigned sequences hold `None`.
pub const MORSE_TREE: [Option<char>; 64] = [
    None,      // 0: unused
    None,      // 1: root
    Some('E'), // 2: .
    Some('T'), // 3: -
    Some('I'), // 4: ..
    Some('A'), // 5: .-
    Some('N'), // 6: -.
    Some('M'), // 7: --
    Some('S'), // 8: ...
    Some('U'), // 9: ..-
    Some('R'), // 10: .-.
    Some('W'), // 11: .--
    Some('D'), // 12: -..
    Some('K'), // 13: -.-
    Some('G'), // 14: --.
    Some('O'), // 15: ---
    Some('H'), // 16: ....
    Some('V'), // 17: ...-
    Some('F'), // 18: ..-.
    None,      // 19: ..--
    Some('L'), // 20: .-..
    None,      // 21: .-.-
    Some('P'), // 22: .--.
    Some('J'), // 23: .---
    Some('B'), // 24: -...
    Some('X'), // 25: -..-
    Some('C'), // 26: -.-.
    Some('Y'), // 27: -.--
    Some('Z'), // 28: --..
    Some('Q'), // 29: --.-
    None,      // 30: ---.
    None,      // 31: ----
    Some('5'), // 32: .....
    Some('4'), // 33: ....-
    None,      // 34: ...-.
    Some('3'), // 35: ...--
    None,      // 36: ..-..
    None,      // 37: ..-.-
    None,      // 38: ..--.
    Some('2'), // 39: ..---
    None,      // 40: .-...
    None,      // 41: .-..-
    None,      // 42: .-.-.
    None,      // 43: .-.--
    None,      // 44: .--..
    None,      // 45: .--.-
    None,      // 46: .---.
    Some('1'), // 47: .----
    Some('6'), // 48: -....
    Some('='), // 49: -...-
    Some('/'), // 50: -..-.
    None,      // 51: -..--
    None,      // 52: -.-..
    None,      // 53: -.-.-
    None,      // 54: -.--.
    None,      // 55: -.---
    Some('7'), // 56: --...
    None,      // 57: --..-
    None,      // 58: --.-.
    None,      // 59: --.--
    Some('8'), // 60: ---..
    None,      // 61: ---.-
    Some('9'), // 62: ----.
    Some('0'), // 63: -----
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecoderError {
    #[error("WPM must be positive")]
    InvalidWpm,

    #[error("farnsworth WPM must not exceed the character WPM")]
    InvalidFarnsworthWpm,

    #[error("adaptive smoothing must be between 0.0 and 1.0")]
    InvalidAdaptiveSmoothing,

    #[error("dit/dah boundary ratio must be greater than 1.0")]
    InvalidDitDahBoundary,

    #[error("inter-character boundary ratio must be positive")]
    InvalidInterCharBoundary,

    #[error("char/word boundary ratio must exceed the dit/dah boundary")]
    InvalidCharWordBoundary,
}

/// Configuration for the CW decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    /// Starting words-per-minute estimate
    pub initial_wpm: u32,
    /// Adapt the dit estimate to the sender's observed speed
    pub adaptive_timing: bool,
    /// EMA weight for new timing observations (higher adapts faster)
    pub adaptive_smoothing: f64,
    /// A tone longer than `dit · dit_dah_boundary` is a dah
    pub dit_dah_boundary: f64,
    /// A gap longer than `spacing dit · inter_char_boundary` ends the
    /// character; this is the scalar the pattern layer adjusts at runtime
    pub inter_char_boundary: f64,
    /// A gap longer than `spacing dit · char_word_boundary` also ends a word
    pub char_word_boundary: f64,
    /// Effective WPM for spacing (0 = same as `initial_wpm`); lower values
    /// stretch gaps Farnsworth-style without changing element shape
    pub farnsworth_wpm: u32,
}

/// A decoded character or word boundary.
#[derive(Debug, Clone, Copy)]
pub struct DecodedOutput {
    /// The decoded character; `' '` when this is a word space
    pub character: char,
    pub is_word_space: bool,
    pub timestamp: Instant,
    /// Estimated WPM at decode time
    pub wpm: u32,
}

/// One classified Morse element with its trailing gap, produced for the
/// pattern-matching layer once the following tone confirms the gap length.
#[derive(Debug, Clone, Copy)]
pub struct Element {
    pub is_dah: bool,
    /// Tone duration
    pub duration: Duration,
    /// Silence duration after the tone
    pub gap_after: Duration,
    /// Whether the gap ended the character (under the current threshold)
    pub is_char_end: bool,
    /// Whether the gap ended the word
    pub is_word_end: bool,
    pub timestamp: Instant,
}

/// Invoked with each decoded character / word space; must be fast and
/// non-blocking.
pub type DecodedCallback = Arc<dyn Fn(DecodedOutput) + Send + Sync>;

/// Invoked with each completed [`Element`]; must be fast and non-blocking.
pub type ElementCallback = Arc<dyn Fn(Element) + Send + Sync>;

struct PendingElement {
    is_dah: bool,
    duration: Duration,
}

struct DecoderState {
    /// Current dit duration estimate in milliseconds; always positive
    dit_duration_ms: f64,
    /// Live inter-character boundary ratio (seeded from config, nudged by
    /// the pattern layer)
    inter_char_boundary: f64,
    /// Position in [`MORSE_TREE`]; 1 is the root
    tree_index: usize,
    in_char: bool,
    /// Last classified tone, waiting for its trailing gap
    pending: Option<PendingElement>,
}

/// Decodes CW from tone events into characters and word boundaries.
///
/// All mutable state sits behind a single mutex; the audio path reaches it
/// once per tone event, so contention is negligible. Callbacks are invoked
/// after the state lock is released, which lets the pattern layer adjust
/// [`Decoder::set_inter_char_boundary`] from inside its element callback.
pub struct Decoder {
    config: DecoderConfig,
    state: Mutex<DecoderState>,
    callback: Mutex<Option<DecodedCallback>>,
    element_sink: Mutex<Option<ElementCallback>>,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Result<Self, DecoderError> {
        if config.initial_wpm == 0 {
            return Err(DecoderError::InvalidWpm);
        }
        if config.farnsworth_wpm > config.initial_wpm {
            return Err(DecoderError::InvalidFarnsworthWpm);
        }
        if !(0.0..=1.0).contains(&config.adaptive_smoothing) {
            return Err(DecoderError::InvalidAdaptiveSmoothing);
        }
        if config.dit_dah_boundary <= 1.0 {
            return Err(DecoderError::InvalidDitDahBoundary);
        }
        if config.inter_char_boundary <= 0.0 {
            return Err(DecoderError::InvalidInterCharBoundary);
        }
        if config.char_word_boundary <= config.dit_dah_boundary {
            return Err(DecoderError::InvalidCharWordBoundary);
        }

        Ok(Self {
            config,
            state: Mutex::new(DecoderState {
                dit_duration_ms: dit_ms_for_wpm(config.initial_wpm),
                inter_char_boundary: config.inter_char_boundary,
                tree_index: 1,
                in_char: false,
                pending: None,
            }),
            callback: Mutex::new(None),
            element_sink: Mutex::new(None),
        })
    }

    /// Register the decoded-output callback, replacing any previous one.
    pub fn set_callback(&self, callback: Option<DecodedCallback>) {
        *self.callback.lock().expect("decoder callback mutex poisoned") = callback;
    }

    /// Register the element sink the pattern layer listens on.
    pub fn set_element_sink(&self, sink: Option<ElementCallback>) {
        *self.element_sink.lock().expect("decoder element sink mutex poisoned") = sink;
    }

    /// Main entry point, typically called from the detector's callback.
    pub fn handle_tone_event(&self, event: ToneEvent) {
        // At most one character plus one word space per event.
        let mut decoded: [Option<DecodedOutput>; 2] = [None, None];
        let mut element: Option<Element> = None;

        {
            let mut state = self.state.lock().expect("decoder state mutex poisoned");
            if event.tone_on {
                self.handle_silence_end(&mut state, &event, &mut decoded, &mut element);
            } else {
                self.handle_tone_end(&mut state, &event);
            }
        }

        if decoded.iter().any(Option::is_some) {
            let callback = self
                .callback
                .lock()
                .expect("decoder callback mutex poisoned")
                .clone();
            if let Some(callback) = callback {
                for output in decoded.into_iter().flatten() {
                    callback(output);
                }
            }
        }

        if let Some(element) = element {
            let sink = self
                .element_sink
                .lock()
                .expect("decoder element sink mutex poisoned")
                .clone();
            if let Some(sink) = sink {
                sink(element);
            }
        }
    }

    /// Tone just ended: classify its duration and walk the tree.
    fn handle_tone_end(&self, state: &mut DecoderState, event: &ToneEvent) {
        let duration_ms = event.duration.as_secs_f64() * 1_000.0;
        let is_dah = duration_ms > state.dit_duration_ms * self.config.dit_dah_boundary;

        if self.config.adaptive_timing {
            // EMA toward the dit-equivalent of the observation.
            let observed_dit = if is_dah {
                duration_ms / DAH_DIT_RATIO
            } else {
                duration_ms
            };
            let smoothing = self.config.adaptive_smoothing;
            state.dit_duration_ms =
                (1.0 - smoothing) * state.dit_duration_ms + smoothing * observed_dit;
        }

        if !state.in_char {
            state.tree_index = 1;
            state.in_char = true;
        }

        state.tree_index = state.tree_index * 2 + usize::from(is_dah);

        if state.tree_index >= MORSE_TREE.len() {
            // Sequence overflows the tree: drop it silently.
            state.tree_index = 1;
            state.in_char = false;
            state.pending = None;
        } else {
            state.pending = Some(PendingElement {
                is_dah,
                duration: event.duration,
            });
        }
    }

    /// Tone just started, so the preceding silence ended: check whether the
    /// gap closed a character or word, then complete the pending element.
    fn handle_silence_end(
        &self,
        state: &mut DecoderState,
        event: &ToneEvent,
        decoded: &mut [Option<DecodedOutput>; 2],
        element: &mut Option<Element>,
    ) {
        if !state.in_char {
            return;
        }

        let gap_ms = event.duration.as_secs_f64() * 1_000.0;
        let spacing_dit_ms = self.spacing_dit_ms(state);

        let is_word_gap = gap_ms > spacing_dit_ms * self.config.char_word_boundary;
        let is_char_gap = gap_ms > spacing_dit_ms * state.inter_char_boundary;
        let is_char_end = is_char_gap || is_word_gap;

        if is_char_end {
            let wpm = current_wpm(state.dit_duration_ms, self.config.initial_wpm);
            if state.tree_index > 0 && state.tree_index < MORSE_TREE.len() {
                if let Some(character) = MORSE_TREE[state.tree_index] {
                    decoded[0] = Some(DecodedOutput {
                        character,
                        is_word_space: false,
                        timestamp: event.timestamp,
                        wpm,
                    });
                }
            }
            if is_word_gap {
                decoded[1] = Some(DecodedOutput {
                    character: ' ',
                    is_word_space: true,
                    timestamp: event.timestamp,
                    wpm,
                });
            }

            state.tree_index = 1;
            state.in_char = false;
        }

        if let Some(pending) = state.pending.take() {
            *element = Some(Element {
                is_dah: pending.is_dah,
                duration: pending.duration,
                gap_after: event.duration,
                is_char_end,
                is_word_end: is_word_gap,
                timestamp: event.timestamp,
            });
        }
    }

    /// Dit duration used for gap classification; Farnsworth stretches it.
    fn spacing_dit_ms(&self, state: &DecoderState) -> f64 {
        if self.config.farnsworth_wpm > 0 && self.config.farnsworth_wpm < self.config.initial_wpm {
            dit_ms_for_wpm(self.config.farnsworth_wpm)
        } else {
            state.dit_duration_ms
        }
    }

    /// Current estimated WPM.
    pub fn current_wpm(&self) -> u32 {
        let state = self.state.lock().expect("decoder state mutex poisoned");
        current_wpm(state.dit_duration_ms, self.config.initial_wpm)
    }

    /// Current dit duration estimate in milliseconds.
    pub fn dit_duration_ms(&self) -> f64 {
        self.state.lock().expect("decoder state mutex poisoned").dit_duration_ms
    }

    /// Live inter-character boundary ratio.
    pub fn inter_char_boundary(&self) -> f64 {
        self.state.lock().expect("decoder state mutex poisoned").inter_char_boundary
    }

    /// Back-channel for the pattern layer: replace the inter-character
    /// boundary ratio. Non-finite or non-positive values are ignored.
    pub fn set_inter_char_boundary(&self, boundary: f64) {
        if boundary.is_finite() && boundary > 0.0 {
            self.state.lock().expect("decoder state mutex poisoned").inter_char_boundary = boundary;
        }
    }

    pub fn config(&self) -> DecoderConfig {
        self.config
    }

    /// Reseed timing from `initial_wpm` and drop any partial character.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("decoder state mutex poisoned");
        state.dit_duration_ms = dit_ms_for_wpm(self.config.initial_wpm);
        state.inter_char_boundary = self.config.inter_char_boundary;
        state.tree_index = 1;
        state.in_char = false;
        state.pending = None;
    }
}

/// Dit duration in milliseconds for a PARIS-standard WPM.
pub fn dit_ms_for_wpm(wpm: u32) -> f64 {
    MS_PER_MINUTE / (wpm as f64 * DITS_PER_WORD)
}

fn current_wpm(dit_duration_ms: f64, initial_wpm: u32) -> u32 {
    if dit_duration_ms <= 0.0 {
        return initial_wpm;
    }
    (MS_PER_MINUTE / (dit_duration_ms * DITS_PER_WORD)).round() as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
