// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Install-relative directory resolution.

use std::path::{Path, PathBuf};

use tracing::info;

use weighbridge_core::error::{Result, WeighbridgeError};

/// Directory relative config paths are resolved against: the directory the
/// executable lives in, falling back to the working directory.
pub fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Create `dir` (and parents) if needed.  Failure is fatal to startup.
pub fn ensure_dir(dir: &Path, purpose: &str) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| {
        WeighbridgeError::Config(format!("cannot create {purpose} directory {}: {e}", dir.display()))
    })?;
    info!(path = %dir.display(), purpose, "created directory");
    Ok(())
}
