// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! CW (Morse code) decoding: tone-event interpretation over the ITU Morse
//! tree and the optional pattern-matching adaptation layer.

pub mod decoder;
pub mod patterns;
