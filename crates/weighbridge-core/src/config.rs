// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeighbridgeError};

/// What the push loop hands to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushFormat {
    /// The JSON reading wire shape.
    #[default]
    Reading,
    /// The raw text of the latest accepted frame.
    Raw,
}

/// Service settings, read from a JSON file at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial device name (`COM3`, `/dev/ttyUSB0`).
    pub serial_port: String,
    /// Device baud rate. Framing is always 8N1.
    pub baud_rate: u32,
    /// TCP port for the HTTP/WebSocket front end.
    pub websocket_port: u16,
    /// Printer used when a submission does not name one. Empty = system default.
    pub printer_name: String,
    /// External program invoked as `<exe> <file> ["<printer>"]`.
    pub printer_executable: PathBuf,
    /// Archive of every submitted document.
    pub history_dir: PathBuf,
    /// Scratch space for documents handed to the print executable.
    pub temp_dir: PathBuf,
    /// Backoff base; the n-th consecutive failure waits `n * retry_interval`.
    pub retry_interval_ms: u64,
    /// Backoff ceiling.
    pub max_retry_delay_ms: u64,
    /// Push loop tick.
    pub push_interval_ms: u64,
    /// Suppress pushes whose reading has not moved.
    pub debounce: bool,
    /// Weight tolerance used by `debounce`.
    pub debounce_epsilon: f64,
    pub push_format: PushFormat,
    /// Outbound queue bound per subscriber; a full queue evicts the subscriber.
    pub subscriber_queue_capacity: usize,
    /// Replace the serial device with a synthetic frame source.
    pub simulate: bool,
    pub simulate_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial_port: default_serial_port().into(),
            baud_rate: 9600,
            websocket_port: 8080,
            printer_name: String::new(),
            printer_executable: PathBuf::from("assets").join("PDFtoPrinter.exe"),
            history_dir: PathBuf::from("history"),
            temp_dir: std::env::temp_dir().join("weighbridge"),
            retry_interval_ms: 5_000,
            max_retry_delay_ms: 30_000,
            push_interval_ms: 100,
            debounce: true,
            debounce_epsilon: 0.05,
            push_format: PushFormat::Reading,
            subscriber_queue_capacity: 10,
            simulate: false,
            simulate_interval_ms: 500,
        }
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(windows) { "COM1" } else { "/dev/ttyUSB0" }
}

impl AppConfig {
    /// Load settings from `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist so the caller can fall
    /// back to defaults; a file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WeighbridgeError::Config(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| WeighbridgeError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(WeighbridgeError::Config("baud_rate must be positive".into()));
        }
        for (name, value) in [
            ("push_interval_ms", self.push_interval_ms),
            ("retry_interval_ms", self.retry_interval_ms),
            ("simulate_interval_ms", self.simulate_interval_ms),
        ] {
            if value == 0 {
                return Err(WeighbridgeError::Config(format!("{name} must be positive")));
            }
        }
        if self.max_retry_delay_ms < self.retry_interval_ms {
            return Err(WeighbridgeError::Config(
                "max_retry_delay_ms must not be below retry_interval_ms".into(),
            ));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(WeighbridgeError::Config(
                "subscriber_queue_capacity must be positive".into(),
            ));
        }
        if !self.debounce_epsilon.is_finite() || self.debounce_epsilon < 0.0 {
            return Err(WeighbridgeError::Config(
                "debounce_epsilon must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Resolve relative paths against `base` (normally the executable's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.printer_executable,
            &mut self.history_dir,
            &mut self.temp_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    pub fn simulate_interval(&self) -> Duration {
        Duration::from_millis(self.simulate_interval_ms)
    }
}
