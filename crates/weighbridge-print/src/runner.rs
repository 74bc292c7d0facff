// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print execution.
//
// Printing is delegated to an external program invoked as
//
//   <executable> <document-path> ["<printer-name>"]
//
// Exit status 0 is success.  Anything else, including failure to start the
// program, fails the job.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use weighbridge_core::error::{Result, WeighbridgeError};

/// Longest slice of the executable's stderr kept in a job error.
const MAX_STDERR_CHARS: usize = 512;

/// Something that can print a document file.
#[async_trait]
pub trait PrintRunner: Send + Sync + 'static {
    /// Print `document` on `printer` (empty = system default) and wait for
    /// completion.
    async fn print(&self, document: &Path, printer: &str) -> Result<()>;
}

/// Runs the configured print executable.
#[derive(Debug, Clone)]
pub struct ExternalCommandRunner {
    executable: PathBuf,
}

impl ExternalCommandRunner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl PrintRunner for ExternalCommandRunner {
    async fn print(&self, document: &Path, printer: &str) -> Result<()> {
        let mut command = Command::new(&self.executable);
        command
            .arg(document)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if !printer.is_empty() {
            push_printer_arg(&mut command, printer);
        }
        debug!(executable = %self.executable.display(), document = %document.display(), printer, "running print executable");

        let output = command.output().await.map_err(|e| {
            WeighbridgeError::PrintSpawn(format!("{}: {e}", self.executable.display()))
        })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
        let mut message = format!("{} exited with {}", self.executable.display(), output.status);
        if !stderr.is_empty() {
            message.push_str(": ");
            message.push_str(&stderr);
        }
        Err(WeighbridgeError::PrintFailed(message))
    }
}

/// Windows programs parse their own command line, so the printer name is
/// appended verbatim inside double quotes.  Elsewhere argv already keeps a
/// name with spaces in one piece.
#[cfg(windows)]
fn push_printer_arg(command: &mut Command, printer: &str) {
    command.raw_arg(format!("\"{printer}\""));
}

#[cfg(not(windows))]
fn push_printer_arg(command: &mut Command, printer: &str) {
    command.arg(printer);
}
