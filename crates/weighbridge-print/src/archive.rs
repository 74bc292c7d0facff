// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// On-disk files for a print job.
//
// Every document is written twice: a scratch copy in the temp directory that
// the print executable reads and that is deleted afterwards, and an
// immutable copy in the history directory.  History never overwrites; a
// second `report.pdf` becomes `report(1).pdf`, then `report(2).pdf`, ...

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use weighbridge_core::error::{Result, WeighbridgeError};

/// Extension given to documents submitted without one.
pub const DEFAULT_EXTENSION: &str = "pdf";

/// Name used when a submission carries no usable file name.
const FALLBACK_STEM: &str = "document";

/// Not allowed in Windows file names (`:` would also open an NTFS stream).
const RESERVED_CHARS: [char; 7] = [':', '*', '?', '"', '<', '>', '|'];

/// Give up after this many numbered copies of one name.
const MAX_COPIES: u32 = 100_000;

/// Reduce a client-supplied file name to a bare, safe file name with an
/// extension.
///
/// Directory components (either separator) are dropped, control characters
/// removed, characters Windows reserves in file names replaced by `_`,
/// trailing dots and spaces trimmed, and a missing extension becomes `.pdf`.
pub fn sanitize_document_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches(['.', ' ']);

    let cleaned = match cleaned {
        "" => FALLBACK_STEM,
        other => other,
    };
    if Path::new(cleaned).extension().is_some() {
        cleaned.to_owned()
    } else {
        format!("{cleaned}.{DEFAULT_EXTENSION}")
    }
}

/// `("report", ".pdf")` for `report.pdf`; the extension keeps its dot.
fn split_extension(name: &str) -> (&str, &str) {
    match Path::new(name).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => name.split_at(name.len() - ext.len() - 1),
        None => (name, ""),
    }
}

/// Candidate history file name for the `n`-th collision (0 = no suffix).
pub fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_owned();
    }
    let (stem, ext) = split_extension(name);
    format!("{stem}({n}){ext}")
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Append-only store of submitted documents.
#[derive(Debug, Clone)]
pub struct HistoryArchive {
    dir: PathBuf,
}

impl HistoryArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` under the first free name derived from
    /// `document_name` and return the path used.
    ///
    /// Names are claimed with `create_new`, so two writers can never end up
    /// sharing a file.
    pub async fn store(&self, document_name: &str, content: &[u8]) -> Result<PathBuf> {
        let name = sanitize_document_name(document_name);

        for n in 0..MAX_COPIES {
            let path = self.dir.join(numbered_name(&name, n));
            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(WeighbridgeError::History(format!("{}: {e}", path.display())));
                }
            };

            let written = async {
                file.write_all(content).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %cleanup, "could not remove partial history file");
                }
                return Err(WeighbridgeError::History(format!("{}: {e}", path.display())));
            }

            debug!(path = %path.display(), bytes = content.len(), "document archived");
            return Ok(path);
        }

        Err(WeighbridgeError::History(format!(
            "no free name for {name} in {}",
            self.dir.display()
        )))
    }
}

// ---------------------------------------------------------------------------
// Scratch copy
// ---------------------------------------------------------------------------

/// The copy handed to the print executable.  Call [`TempArtifact::remove`]
/// once printing has finished, whatever the outcome.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    /// Write `content` to `<dir>/<unix-nanos>_<name>`.
    pub async fn create(dir: &Path, document_name: &str, content: &[u8]) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = dir.join(format!("{nanos}_{}", sanitize_document_name(document_name)));

        fs::write(&path, content)
            .await
            .map_err(|e| WeighbridgeError::TempArtifact(format!("{}: {e}", path.display())))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "could not remove temporary document");
        }
    }
}
