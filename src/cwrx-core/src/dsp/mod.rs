// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Tone-detection DSP: the Goertzel single-bin estimator and the debounced
//! tone-presence detector built on top of it.

pub mod detector;
pub mod goertzel;
