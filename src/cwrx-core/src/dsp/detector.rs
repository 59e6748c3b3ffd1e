// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Tone-presence detector.
//!
//! Converts a stream of Goertzel magnitudes into confirmed ON/OFF tone
//! transitions: callers push arbitrary-length sample slices, a carry-over
//! buffer assembles fixed-size (optionally overlapping) blocks, AGC
//! normalizes each block's magnitude, and hysteresis debounces the
//! thresholded decision before a [`ToneEvent`] is emitted.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::dsp::goertzel::Goertzel;

/// Minimum AGC peak, prevents division collapse on silent input.
pub const AGC_PEAK_FLOOR: f64 = 0.001;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("threshold must be between 0.0 and 1.0")]
    InvalidThreshold,

    #[error("overlap percentage must be between 0 and 99")]
    InvalidOverlap,

    #[error("agc decay must be between 0.0 and 1.0")]
    InvalidAgcDecay,

    #[error("agc attack must be between 0.0 and 1.0")]
    InvalidAgcAttack,
}

/// A confirmed tone state transition.
#[derive(Debug, Clone, Copy)]
pub struct ToneEvent {
    /// `true` when the tone starts, `false` when it ends
    pub tone_on: bool,
    /// When the transition was confirmed
    pub timestamp: Instant,
    /// Wall-clock length of the preceding state (zero for the first transition)
    pub duration: Duration,
    /// Magnitude at the confirming block (0.0–1.0 after AGC)
    pub magnitude: f64,
}

/// Invoked synchronously from [`Detector::process`]; must be fast,
/// non-blocking, and must not call back into the detector.
pub type ToneCallback = Arc<dyn Fn(ToneEvent) + Send + Sync>;

/// Configuration for the tone detector.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Detection threshold (0.0–1.0) the normalized magnitude must exceed
    pub threshold: f64,
    /// Consecutive disagreeing blocks required to confirm a state change
    pub hysteresis_blocks: u32,
    /// Block overlap percentage (0–99); higher is smoother but costs CPU
    pub overlap_pct: u32,
    /// Enable automatic gain control
    pub agc_enabled: bool,
    /// AGC peak decay factor per block (very close to 1.0)
    pub agc_decay: f64,
    /// AGC attack weight for rising signals (0.0–1.0)
    pub agc_attack: f64,
    /// Blocks to process before detection starts, letting AGC calibrate
    pub agc_warmup_blocks: u32,
}

struct DetectorState {
    /// Carry-over buffer absorbing caller chunk sizes
    carry: Vec<f32>,
    agc_peak: f64,
    warmup_count: u32,

    /// Confirmed tone state
    tone_state: bool,
    pending_state: bool,
    hysteresis_count: u32,

    last_transition: Option<Instant>,
}

/// Detects CW tones in audio samples and emits debounced on/off events.
///
/// `process` is designed to be called from a single (audio) thread; the
/// internal mutexes exist so a supervisor thread can register callbacks or
/// reset the detector without racing it.
pub struct Detector {
    config: DetectorConfig,
    goertzel: Goertzel,
    block_size: usize,
    /// Samples to advance between blocks: `block_size − overlap`
    hop_size: usize,
    state: Mutex<DetectorState>,
    callback: Mutex<Option<ToneCallback>>,
}

impl Detector {
    pub fn new(config: DetectorConfig, goertzel: Goertzel) -> Result<Self, DetectorError> {
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(DetectorError::InvalidThreshold);
        }
        if config.overlap_pct >= 100 {
            return Err(DetectorError::InvalidOverlap);
        }
        if !(0.0..=1.0).contains(&config.agc_decay) {
            return Err(DetectorError::InvalidAgcDecay);
        }
        if !(0.0..=1.0).contains(&config.agc_attack) {
            return Err(DetectorError::InvalidAgcAttack);
        }

        let block_size = goertzel.block_size();
        let overlap = block_size * config.overlap_pct as usize / 100;

        Ok(Self {
            config,
            goertzel,
            block_size,
            hop_size: block_size - overlap,
            state: Mutex::new(DetectorState {
                carry: Vec::with_capacity(block_size * 2),
                // Seed high so nothing triggers until warmup has calibrated.
                agc_peak: 1.0,
                warmup_count: 0,
                tone_state: false,
                pending_state: false,
                hysteresis_count: 0,
                last_transition: None,
            }),
            callback: Mutex::new(None),
        })
    }

    /// Register the tone-event callback, replacing any previous one.
    /// `None` clears the slot.
    pub fn set_callback(&self, callback: Option<ToneCallback>) {
        *self.callback.lock().expect("detector callback mutex poisoned") = callback;
    }

    /// Feed audio samples (mono, −1.0 to 1.0). Accumulates until at least one
    /// full block is available, then processes blocks and slides the carry
    /// buffer by the hop size so consecutive blocks overlap as configured.
    pub fn process(&self, samples: &[f32]) {
        let mut state = self.state.lock().expect("detector state mutex poisoned");
        state.carry.extend_from_slice(samples);

        while state.carry.len() >= self.block_size {
            self.process_block(&mut state);

            if self.hop_size > 0 && self.hop_size < state.carry.len() {
                state.carry.drain(..self.hop_size);
            } else {
                state.carry.clear();
            }
        }
    }

    fn process_block(&self, state: &mut DetectorState) {
        let magnitude = self.goertzel.magnitude_unchecked(&state.carry[..self.block_size]);

        // Warmup: calibrate the AGC peak to the observed level, emit nothing.
        if state.warmup_count < self.config.agc_warmup_blocks {
            state.warmup_count += 1;
            if self.config.agc_enabled
                && magnitude > AGC_PEAK_FLOOR
                && (magnitude > state.agc_peak || state.warmup_count == 1)
            {
                state.agc_peak = magnitude;
            }
            return;
        }

        let magnitude = if self.config.agc_enabled {
            self.apply_agc(state, magnitude)
        } else {
            magnitude
        };

        let tone_present = magnitude > self.config.threshold;
        self.update_hysteresis(state, tone_present, magnitude);
    }

    /// Asymmetric peak tracker: fast attack toward louder signals, slow
    /// multiplicative decay when the signal falls. Returns the magnitude
    /// normalized by the peak, clamped to 1.0.
    fn apply_agc(&self, state: &mut DetectorState, magnitude: f64) -> f64 {
        if magnitude > state.agc_peak {
            state.agc_peak += self.config.agc_attack * (magnitude - state.agc_peak);
        } else {
            state.agc_peak *= self.config.agc_decay;
        }

        if state.agc_peak < AGC_PEAK_FLOOR {
            state.agc_peak = AGC_PEAK_FLOOR;
        }

        (magnitude / state.agc_peak).min(1.0)
    }

    fn update_hysteresis(&self, state: &mut DetectorState, tone_present: bool, magnitude: f64) {
        if tone_present == state.tone_state {
            state.pending_state = state.tone_state;
            state.hysteresis_count = 0;
            return;
        }

        if tone_present == state.pending_state {
            state.hysteresis_count += 1;
        } else {
            state.pending_state = tone_present;
            state.hysteresis_count = 1;
        }

        if state.hysteresis_count >= self.config.hysteresis_blocks {
            let now = Instant::now();
            let duration = state
                .last_transition
                .map(|prev| now.duration_since(prev))
                .unwrap_or(Duration::ZERO);

            state.tone_state = state.pending_state;
            state.last_transition = Some(now);
            state.hysteresis_count = 0;

            self.emit_event(ToneEvent {
                tone_on: state.tone_state,
                timestamp: now,
                duration,
                magnitude,
            });
        }
    }

    fn emit_event(&self, event: ToneEvent) {
        let callback = self
            .callback
            .lock()
            .expect("detector callback mutex poisoned")
            .clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    /// Current confirmed tone state.
    pub fn tone_state(&self) -> bool {
        self.state.lock().expect("detector state mutex poisoned").tone_state
    }

    /// Current AGC peak (for monitoring).
    pub fn agc_peak(&self) -> f64 {
        self.state.lock().expect("detector state mutex poisoned").agc_peak
    }

    pub fn config(&self) -> DetectorConfig {
        self.config
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Clear all runtime state; configuration is preserved. The AGC peak
    /// drops to the floor and warmup suppression re-applies.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("detector state mutex poisoned");
        state.carry.clear();
        state.agc_peak = AGC_PEAK_FLOOR;
        state.warmup_count = 0;
        state.tone_state = false;
        state.pending_state = false;
        state.hysteresis_count = 0;
        state.last_transition = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::goertzel::GoertzelConfig;

    const SAMPLE_RATE: f64 = 48_000.0;
    const TONE_FREQUENCY: f64 = 600.0;
    const BLOCK_SIZE: usize = 512;

    fn sine(frequency: f64, num_samples: usize, amplitude: f32) -> Vec<f32> {
        (0..num_samples)
            .map(|i| {
                let t = i as f64 / SAMPLE_RATE;
                amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
            })
            .collect()
    }

    fn silence(num_samples: usize) -> Vec<f32> {
        vec![0.0; num_samples]
    }

    fn test_goertzel() -> Goertzel {
        Goertzel::new(GoertzelConfig {
            target_frequency: TONE_FREQUENCY,
            sample_rate: SAMPLE_RATE,
            block_size: BLOCK_SIZE,
        })
        .unwrap()
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            threshold: 0.4,
            hysteresis_blocks: 5,
            overlap_pct: 50,
            agc_enabled: true,
            agc_decay: 0.9995,
            agc_attack: 0.1,
            agc_warmup_blocks: 0,
        }
    }

    /// Detector plus a shared event log fed by its callback.
    fn detector_with_events(config: DetectorConfig) -> (Detector, Arc<Mutex<Vec<ToneEvent>>>) {
        let detector = Detector::new(config, test_goertzel()).unwrap();
        let events: Arc<Mutex<Vec<ToneEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        detector.set_callback(Some(Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        })));
        (detector, events)
    }

    #[test]
    fn valid_config() {
        let detector = Detector::new(test_config(), test_goertzel()).unwrap();
        assert_eq!(detector.block_size(), BLOCK_SIZE);
        assert!(!detector.tone_state());
    }

    #[test]
    fn rejects_invalid_threshold() {
        for threshold in [-0.1, 1.1] {
            let config = DetectorConfig {
                threshold,
                ..test_config()
            };
            let result = Detector::new(config, test_goertzel());
            assert_eq!(result.err(), Some(DetectorError::InvalidThreshold));
        }
    }

    #[test]
    fn rejects_invalid_overlap() {
        let config = DetectorConfig {
            overlap_pct: 100,
            ..test_config()
        };
        let result = Detector::new(config, test_goertzel());
        assert_eq!(result.err(), Some(DetectorError::InvalidOverlap));
    }

    #[test]
    fn rejects_invalid_agc_decay() {
        for agc_decay in [-0.1, 1.5] {
            let config = DetectorConfig {
                agc_decay,
                ..test_config()
            };
            let result = Detector::new(config, test_goertzel());
            assert_eq!(result.err(), Some(DetectorError::InvalidAgcDecay));
        }
    }

    #[test]
    fn rejects_invalid_agc_attack() {
        for agc_attack in [-0.1, 1.5] {
            let config = DetectorConfig {
                agc_attack,
                ..test_config()
            };
            let result = Detector::new(config, test_goertzel());
            assert_eq!(result.err(), Some(DetectorError::InvalidAgcAttack));
        }
    }

    #[test]
    fn boundary_values_accepted() {
        let config = DetectorConfig {
            threshold: 0.0,
            hysteresis_blocks: 0,
            overlap_pct: 0,
            agc_enabled: true,
            agc_decay: 1.0,
            agc_attack: 1.0,
            agc_warmup_blocks: 0,
        };
        assert!(Detector::new(config, test_goertzel()).is_ok());

        let config = DetectorConfig {
            threshold: 1.0,
            overlap_pct: 99,
            agc_decay: 0.0,
            agc_attack: 0.0,
            ..test_config()
        };
        assert!(Detector::new(config, test_goertzel()).is_ok());
    }

    #[test]
    fn detects_on_target_tone() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));

        assert!(detector.tone_state());
        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        assert!(events[0].tone_on);
        assert_eq!(events[0].duration, Duration::ZERO);
    }

    #[test]
    fn silence_produces_no_events() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&silence(BLOCK_SIZE * 10));

        assert!(!detector.tone_state());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn off_frequency_not_detected() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            agc_enabled: false,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&sine(TONE_FREQUENCY + 500.0, BLOCK_SIZE * 10, 1.0));

        assert!(!detector.tone_state());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn hysteresis_requires_consecutive_blocks() {
        let hysteresis = 5;
        let config = DetectorConfig {
            hysteresis_blocks: hysteresis,
            overlap_pct: 0,
            agc_enabled: false,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        // One block fewer than the hysteresis requirement: no transition.
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * (hysteresis as usize - 1), 1.0));
        assert!(!detector.tone_state());
        assert!(events.lock().unwrap().is_empty());

        // A disagreeing block resets the pending count.
        detector.process(&silence(BLOCK_SIZE));
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * (hysteresis as usize - 1), 1.0));
        assert!(!detector.tone_state());

        // Enough consecutive tone blocks confirm the transition.
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 2, 1.0));
        assert!(detector.tone_state());
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn zero_hysteresis_promotes_immediately() {
        let config = DetectorConfig {
            hysteresis_blocks: 0,
            overlap_pct: 0,
            agc_enabled: false,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE, 1.0));

        assert!(detector.tone_state());
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn warmup_suppresses_detection() {
        let warmup = 10;
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            agc_warmup_blocks: warmup,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        // Strong tone throughout warmup: no events allowed.
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * warmup as usize, 1.0));
        assert!(events.lock().unwrap().is_empty());
        assert!(!detector.tone_state());

        // After warmup detection proceeds normally.
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 3, 1.0));
        assert!(detector.tone_state());
    }

    #[test]
    fn warmup_calibrates_agc_peak() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            agc_warmup_blocks: 5,
            ..test_config()
        };
        let detector = Detector::new(config, test_goertzel()).unwrap();

        // A weak signal during warmup pulls the peak down from its 1.0 seed
        // to the observed level.
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 0.2));
        let peak = detector.agc_peak();
        assert!(peak < 0.5, "peak should track the weak signal, got {peak}");
        assert!(peak > AGC_PEAK_FLOOR);
    }

    #[test]
    fn agc_normalizes_quiet_signal() {
        // Aggressive decay so the peak relaxes within a reasonable number of
        // blocks; a 0.1-amplitude tone then exceeds the threshold.
        let config = DetectorConfig {
            threshold: 0.4,
            hysteresis_blocks: 1,
            overlap_pct: 0,
            agc_enabled: true,
            agc_decay: 0.99,
            agc_attack: 0.1,
            agc_warmup_blocks: 0,
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 200, 0.1));

        assert!(detector.tone_state(), "AGC should normalize the quiet tone up");
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| e.tone_on));
    }

    #[test]
    fn agc_peak_tracks_signal() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            ..test_config()
        };
        let detector = Detector::new(config, test_goertzel()).unwrap();

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 20, 0.5));
        let peak = detector.agc_peak();
        assert!(peak < 1.0, "peak should decay toward the signal, got {peak}");
        assert!(peak > AGC_PEAK_FLOOR);
    }

    #[test]
    fn agc_disabled_uses_raw_magnitude() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            agc_enabled: false,
            ..test_config()
        };
        let (detector, _) = detector_with_events(config);

        // 0.1 amplitude stays below the 0.4 threshold without AGC.
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 50, 0.1));
        assert!(!detector.tone_state());

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));
        assert!(detector.tone_state());
    }

    #[test]
    fn clearing_callback_stops_events() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.set_callback(None);
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));

        // The state machine still runs, only the event delivery is gone.
        assert!(detector.tone_state());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn event_durations_are_positive_after_first() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));
        std::thread::sleep(Duration::from_millis(10));
        detector.process(&silence(BLOCK_SIZE * 5));

        let events = events.lock().unwrap();
        assert!(events.len() >= 2);
        assert_eq!(events[0].duration, Duration::ZERO);
        for event in &events[1..] {
            assert!(event.duration > Duration::ZERO);
        }
    }

    #[test]
    fn event_timestamps_are_bracketed() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        let before = Instant::now();
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));
        let after = Instant::now();

        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        for event in events.iter() {
            assert!(event.timestamp >= before && event.timestamp <= after);
        }
    }

    #[test]
    fn dit_dah_pattern_produces_transitions() {
        let config = DetectorConfig {
            hysteresis_blocks: 2,
            overlap_pct: 0,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));
        detector.process(&silence(BLOCK_SIZE * 5));
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 15, 1.0));
        detector.process(&silence(BLOCK_SIZE * 5));

        let events = events.lock().unwrap();
        assert!(events.len() >= 4, "expected on/off/on/off, got {}", events.len());
        // Transitions must alternate starting with ON.
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.tone_on, i % 2 == 0);
        }
    }

    #[test]
    fn small_chunks_accumulate() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        let block = sine(TONE_FREQUENCY, BLOCK_SIZE, 1.0);
        let mut chunks = block.chunks(BLOCK_SIZE / 4);
        for _ in 0..3 {
            detector.process(chunks.next().unwrap());
            assert!(events.lock().unwrap().is_empty());
        }
        detector.process(chunks.next().unwrap());
        assert!(detector.tone_state());
    }

    #[test]
    fn reset_clears_state() {
        let config = DetectorConfig {
            hysteresis_blocks: 1,
            overlap_pct: 0,
            ..test_config()
        };
        let (detector, events) = detector_with_events(config);

        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));
        assert!(detector.tone_state());

        detector.reset();
        assert!(!detector.tone_state());
        assert_eq!(detector.agc_peak(), AGC_PEAK_FLOOR);

        // Reset is idempotent.
        detector.reset();
        assert!(!detector.tone_state());
        assert_eq!(detector.agc_peak(), AGC_PEAK_FLOOR);

        // First event after reset carries a zero duration again.
        events.lock().unwrap().clear();
        detector.process(&sine(TONE_FREQUENCY, BLOCK_SIZE * 5, 1.0));
        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        assert_eq!(events[0].duration, Duration::ZERO);
    }
}
