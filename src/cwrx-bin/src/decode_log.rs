// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Decode log files: JSON-Lines records of decoded output with automatic
//! daily file-name rotation.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde_json::json;
use tracing::warn;

use cwrx_core::DecodedOutput;

use crate::config::DecodeLogConfig;

pub struct DecodeLogger {
    base_dir: PathBuf,
    file_template: String,
    state: Mutex<LoggerState>,
}

struct LoggerState {
    current_file_name: String,
    writer: BufWriter<File>,
}

impl DecodeLogger {
    /// Create the logger from config, or `None` when logging is disabled.
    pub fn from_config(cfg: &DecodeLogConfig) -> Result<Option<Self>, String> {
        if !cfg.enabled {
            return Ok(None);
        }

        let base_dir = PathBuf::from(cfg.dir.trim());
        create_dir_all(&base_dir)
            .map_err(|e| format!("create decode log dir '{}': {}", base_dir.display(), e))?;

        let file_name = resolve_file_name(&cfg.file);
        let path = base_dir.join(&file_name);
        let writer = open_writer(&path)?;

        Ok(Some(Self {
            base_dir,
            file_template: cfg.file.clone(),
            state: Mutex::new(LoggerState {
                current_file_name: file_name,
                writer,
            }),
        }))
    }

    /// Append one decoded output. Reopens the file when the date-expanded
    /// name changes (daily rotation); failures are logged and swallowed.
    pub fn log(&self, output: &DecodedOutput) {
        let ts_ms = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as u64,
            Err(_) => 0,
        };
        let line = json!({
            "ts_ms": ts_ms,
            "char": output.character.to_string(),
            "word_space": output.is_word_space,
            "wpm": output.wpm,
        });

        let Ok(mut state) = self.state.lock() else {
            warn!("decode log mutex poisoned");
            return;
        };

        let next_file_name = resolve_file_name(&self.file_template);
        if next_file_name != state.current_file_name {
            let next_path = self.base_dir.join(&next_file_name);
            match open_writer(&next_path) {
                Ok(next_writer) => {
                    state.current_file_name = next_file_name;
                    state.writer = next_writer;
                }
                Err(e) => {
                    warn!("decode log reopen failed: {}", e);
                    return;
                }
            }
        }

        if serde_json::to_writer(&mut state.writer, &line).is_err() {
            warn!("decode log serialization failed");
            return;
        }
        if state.writer.write_all(b"\n").is_err() {
            warn!("decode log write failed");
            return;
        }
        let _ = state.writer.flush();
    }
}

fn resolve_file_name(template: &str) -> String {
    let now = Utc::now();
    template
        .replace("%YYYY%", &now.format("%Y").to_string())
        .replace("%MM%", &now.format("%m").to_string())
        .replace("%DD%", &now.format("%d").to_string())
}

fn open_writer(path: &Path) -> Result<BufWriter<File>, String> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .map_err(|e| format!("create decode log dir '{}': {}", parent.display(), e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("open decode log '{}': {}", path.display(), e))?;
    Ok(BufWriter::new(file))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
