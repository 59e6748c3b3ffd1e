// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Pattern-matching adaptation layer.
//!
//! Observes the decoder's classified elements, matches the most recent word
//! against a small dictionary of common CW exchanges (CQ, DE, 73, Q-codes,
//! …), and when the same pattern keeps appearing, nudges the decoder's
//! inter-character gap threshold toward the value that separates the
//! observed intra- and inter-character gaps most cleanly. The dictionary
//! biases the operating point; it never takes over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::cw::decoder::{Decoder, Element, MORSE_TREE};

/// Maximum number of elements kept for pattern matching.
pub const MAX_ELEMENT_BUFFER: usize = 50;
/// Default minimum match confidence before a candidate is considered.
pub const MIN_PATTERN_CONFIDENCE: f64 = 0.7;
/// Default number of confirmed matches before timing is adjusted.
pub const MIN_MATCHES_FOR_ADJUSTMENT: u32 = 3;
/// Default EMA rate for boundary adjustments.
pub const ADAPTIVE_ADJUSTMENT_RATE: f64 = 0.1;
/// Character breaks must align at least this well for a match.
const BREAK_CONFIDENCE_FLOOR: f64 = 0.8;
/// Boundary changes smaller than this are ignored to avoid jitter.
const ADJUSTMENT_DEAD_BAND: f64 = 0.05;

/// A known Morse sequence: element vector (false = dit, true = dah), the
/// indices of the last element of each non-final character, and a priority
/// for tie-breaking.
pub struct MorsePattern {
    pub text: &'static str,
    pub elements: &'static [bool],
    pub breaks: &'static [usize],
    pub priority: u32,
}

/// Common CW exchanges. Break indices mark the element that closes a
/// character, e.g. `CQ` = `-.-. --.-` breaks after element 3 (the last
/// element of `C`).
pub static COMMON_PATTERNS: &[MorsePattern] = &[
    MorsePattern {
        text: "CQ",
        elements: &[true, false, true, false, true, true, false, true],
        breaks: &[3],
        priority: 10,
    },
    MorsePattern {
        text: "DE",
        elements: &[true, false, false, false],
        breaks: &[2],
        priority: 10,
    },
    MorsePattern {
        text: "73",
        elements: &[true, true, false, false, false, false, false, false, true, true],
        breaks: &[4],
        priority: 9,
    },
    MorsePattern {
        text: "5NN",
        elements: &[false, false, false, false, false, true, false, true, false],
        breaks: &[4, 6],
        priority: 9,
    },
    MorsePattern {
        text: "599",
        elements: &[
            false, false, false, false, false, true, true, true, true, false, true, true, true,
            true, false,
        ],
        breaks: &[4, 9],
        priority: 8,
    },
    MorsePattern {
        text: "QTH",
        elements: &[true, true, false, true, true, false, false, false, false],
        breaks: &[3, 4],
        priority: 7,
    },
    MorsePattern {
        text: "QRZ",
        elements: &[true, true, false, true, false, true, false, true, true, false, false],
        breaks: &[3, 6],
        priority: 7,
    },
    MorsePattern {
        text: "QSO",
        elements: &[true, true, false, true, false, false, false, true, true, true],
        breaks: &[3, 6],
        priority: 7,
    },
    MorsePattern {
        text: "QSL",
        elements: &[true, true, false, true, false, false, false, false, true, false, false],
        breaks: &[3, 6],
        priority: 7,
    },
    MorsePattern {
        text: "TU",
        elements: &[true, false, false, true],
        breaks: &[0],
        priority: 8,
    },
    MorsePattern {
        text: "GM",
        elements: &[true, true, false, true, true],
        breaks: &[2],
        priority: 7,
    },
    MorsePattern {
        text: "GA",
        elements: &[true, true, false, false, true],
        breaks: &[2],
        priority: 7,
    },
    MorsePattern {
        text: "GE",
        elements: &[true, true, false, false],
        breaks: &[2],
        priority: 7,
    },
    MorsePattern {
        text: "UR",
        elements: &[false, false, true, false, true, false],
        breaks: &[2],
        priority: 6,
    },
    MorsePattern {
        text: "FB",
        elements: &[false, false, true, false, true, false, false, false],
        breaks: &[3],
        priority: 6,
    },
    MorsePattern {
        text: "ES",
        elements: &[false, false, false, false],
        breaks: &[0],
        priority: 6,
    },
    MorsePattern {
        text: "HR",
        elements: &[false, false, false, false, false, true, false],
        breaks: &[3],
        priority: 5,
    },
];

/// Configuration for the adaptation layer. Non-positive values fall back to
/// the documented defaults.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    /// Minimum confidence for a candidate match
    pub min_confidence: f64,
    /// EMA rate applied to boundary suggestions
    pub adjustment_rate: f64,
    /// Confirmed matches of a pattern required before adjusting
    pub min_matches_for_adjust: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            min_confidence: MIN_PATTERN_CONFIDENCE,
            adjustment_rate: ADAPTIVE_ADJUSTMENT_RATE,
            min_matches_for_adjust: MIN_MATCHES_FOR_ADJUSTMENT,
        }
    }
}

/// Report of one confirmed pattern match.
#[derive(Debug, Clone)]
pub struct CorrectedOutput {
    /// What the decoder's current thresholds would have produced
    pub original: String,
    /// The matched dictionary text
    pub corrected: String,
    pub confidence: f64,
    /// Whether this match moved the inter-character boundary
    pub timing_adjusted: bool,
}

pub type CorrectedCallback = Arc<dyn Fn(CorrectedOutput) + Send + Sync>;

struct Candidate {
    pattern: &'static MorsePattern,
    confidence: f64,
    suggested_boundary: Option<f64>,
}

struct AdaptiveState {
    elements: Vec<Element>,
    match_counts: HashMap<&'static str, u32>,
}

/// Wraps a [`Decoder`] with dictionary-based timing adaptation.
///
/// The layer is a passive observer: its only side effect on the decoder is
/// the inter-character boundary scalar, applied through
/// [`Decoder::set_inter_char_boundary`].
pub struct AdaptiveDecoder {
    decoder: Arc<Decoder>,
    config: AdaptiveConfig,
    state: Mutex<AdaptiveState>,
    corrected_callback: Mutex<Option<CorrectedCallback>>,
}

impl AdaptiveDecoder {
    pub fn new(decoder: Arc<Decoder>, config: AdaptiveConfig) -> Self {
        let defaults = AdaptiveConfig::default();
        let config = AdaptiveConfig {
            min_confidence: if config.min_confidence > 0.0 {
                config.min_confidence
            } else {
                defaults.min_confidence
            },
            adjustment_rate: if config.adjustment_rate > 0.0 {
                config.adjustment_rate
            } else {
                defaults.adjustment_rate
            },
            min_matches_for_adjust: if config.min_matches_for_adjust > 0 {
                config.min_matches_for_adjust
            } else {
                defaults.min_matches_for_adjust
            },
        };

        Self {
            decoder,
            config,
            state: Mutex::new(AdaptiveState {
                elements: Vec::with_capacity(MAX_ELEMENT_BUFFER),
                match_counts: HashMap::new(),
            }),
            corrected_callback: Mutex::new(None),
        }
    }

    /// Register this layer as the decoder's element sink. The sink holds a
    /// weak reference, so dropping the `AdaptiveDecoder` detaches it.
    pub fn attach(self: &Arc<Self>) {
        let this = Arc::downgrade(self);
        self.decoder.set_element_sink(Some(Arc::new(move |element| {
            if let Some(this) = Weak::upgrade(&this) {
                this.record_element(element);
            }
        })));
    }

    /// Register the corrected-output callback.
    pub fn set_corrected_callback(&self, callback: Option<CorrectedCallback>) {
        *self
            .corrected_callback
            .lock()
            .expect("adaptive callback mutex poisoned") = callback;
    }

    /// Record one classified element; on character and word boundaries, run
    /// pattern matching over the current word.
    pub fn record_element(&self, element: Element) {
        let output = {
            let mut state = self.state.lock().expect("adaptive state mutex poisoned");

            state.elements.push(element);
            if state.elements.len() > MAX_ELEMENT_BUFFER {
                let excess = state.elements.len() - MAX_ELEMENT_BUFFER;
                state.elements.drain(..excess);
            }

            if element.is_char_end || element.is_word_end {
                self.check_patterns(&mut state)
            } else {
                None
            }
        };

        if let Some(output) = output {
            let callback = self
                .corrected_callback
                .lock()
                .expect("adaptive callback mutex poisoned")
                .clone();
            if let Some(callback) = callback {
                callback(output);
            }
        }
    }

    /// Match the slice since the last word boundary against the dictionary.
    fn check_patterns(&self, state: &mut AdaptiveState) -> Option<CorrectedOutput> {
        if state.elements.len() < 2 {
            return None;
        }

        // Start of the current word: after the most recent word-end,
        // excluding the element just recorded.
        let mut start = 0;
        for i in (0..state.elements.len() - 1).rev() {
            if state.elements[i].is_word_end {
                start = i + 1;
                break;
            }
        }

        let word = &state.elements[start..];
        if word.len() < 2 {
            return None;
        }

        let candidate = self.find_best_match(word)?;
        if candidate.confidence < self.config.min_confidence {
            return None;
        }

        let count = state
            .match_counts
            .entry(candidate.pattern.text)
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let count = *count;

        let original = decode_elements(&word[..candidate.pattern.elements.len()]);

        let mut timing_adjusted = false;
        if count >= self.config.min_matches_for_adjust {
            if let Some(suggested) = candidate.suggested_boundary {
                let current = self.decoder.inter_char_boundary();
                let adjusted = current * (1.0 - self.config.adjustment_rate)
                    + suggested * self.config.adjustment_rate;
                if (adjusted - current).abs() > ADJUSTMENT_DEAD_BAND {
                    self.decoder.set_inter_char_boundary(adjusted);
                    timing_adjusted = true;
                }
            }
        }

        Some(CorrectedOutput {
            original,
            corrected: candidate.pattern.text.to_string(),
            confidence: candidate.confidence,
            timing_adjusted,
        })
    }

    fn find_best_match(&self, word: &[Element]) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;

        for pattern in COMMON_PATTERNS {
            let Some(candidate) = self.match_pattern(pattern, word) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(current) => {
                    candidate.confidence > current.confidence
                        || (candidate.confidence == current.confidence
                            && pattern.priority > current.pattern.priority)
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        best
    }

    /// Exact dit/dah match plus break alignment scoring.
    fn match_pattern(
        &self,
        pattern: &'static MorsePattern,
        word: &[Element],
    ) -> Option<Candidate> {
        if word.len() != pattern.elements.len() {
            return None;
        }
        for (element, &is_dah) in word.iter().zip(pattern.elements) {
            if element.is_dah != is_dah {
                return None;
            }
        }

        let confidence = break_confidence(pattern, word);
        if confidence < BREAK_CONFIDENCE_FLOOR {
            return None;
        }

        Some(Candidate {
            pattern,
            confidence,
            suggested_boundary: self.suggest_boundary(pattern, word),
        })
    }

    /// Partition observed gaps into intra- and inter-character sets (as
    /// ratios of the current dit) and suggest the midpoint between the
    /// largest intra gap and the smallest inter gap. No suggestion when the
    /// sets overlap or either is empty.
    fn suggest_boundary(&self, pattern: &MorsePattern, word: &[Element]) -> Option<f64> {
        if pattern.breaks.is_empty() || word.len() < 2 {
            return None;
        }

        let dit_ms = self.decoder.dit_duration_ms();
        if dit_ms <= 0.0 {
            return None;
        }

        let mut max_intra: Option<f64> = None;
        let mut min_inter: Option<f64> = None;

        for (i, element) in word.iter().enumerate().take(pattern.elements.len() - 1) {
            let ratio = element.gap_after.as_secs_f64() * 1_000.0 / dit_ms;
            if pattern.breaks.contains(&i) {
                min_inter = Some(min_inter.map_or(ratio, |m: f64| m.min(ratio)));
            } else {
                max_intra = Some(max_intra.map_or(ratio, |m: f64| m.max(ratio)));
            }
        }

        match (max_intra, min_inter) {
            (Some(intra), Some(inter)) if inter > intra => Some((intra + inter) / 2.0),
            _ => None,
        }
    }

    /// Per-pattern confirmed match counts.
    pub fn pattern_match_counts(&self) -> HashMap<&'static str, u32> {
        self.state
            .lock()
            .expect("adaptive state mutex poisoned")
            .match_counts
            .clone()
    }

    pub fn decoder(&self) -> &Arc<Decoder> {
        &self.decoder
    }

    pub fn config(&self) -> AdaptiveConfig {
        self.config
    }

    /// Clear the element buffer and match counters.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("adaptive state mutex poisoned");
        state.elements.clear();
        state.match_counts.clear();
    }
}

/// Fraction of the pattern's breaks that line up with an observed
/// character end. Patterns without breaks trivially score 1.0.
fn break_confidence(pattern: &MorsePattern, word: &[Element]) -> f64 {
    if pattern.breaks.is_empty() {
        return 1.0;
    }
    let correct = pattern
        .breaks
        .iter()
        .filter(|&&idx| idx < word.len() && word[idx].is_char_end)
        .count();
    correct as f64 / pattern.breaks.len() as f64
}

/// Decode a slice of elements with the tree, honoring their recorded
/// character ends. Mirrors what the decoder would have produced.
fn decode_elements(elements: &[Element]) -> String {
    let mut result = String::new();
    let mut index = 1_usize;

    for element in elements {
        index = index * 2 + usize::from(element.is_dah);

        if index >= MORSE_TREE.len() {
            index = 1;
            continue;
        }

        if element.is_char_end {
            if let Some(character) = MORSE_TREE[index] {
                result.push(character);
            }
            index = 1;
        }
    }

    // Trailing partial character.
    if index > 1 {
        if let Some(character) = MORSE_TREE[index] {
            result.push(character);
        }
    }

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
