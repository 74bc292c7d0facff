// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Weighbridge service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Stability classification reported by the scale in the frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Stable,
    Unstable,
    Overload,
    Zero,
    /// Recognised frame layout with an unrecognised stability code.
    Unknown,
}

impl ReadingStatus {
    /// Wire keyword for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Unstable => "unstable",
            Self::Overload => "overload",
            Self::Zero => "zero",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed, classified frame from the measurement device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub status: ReadingStatus,
    /// Signed weight. Negative values are passed through unchanged.
    pub weight: f64,
    /// Unit suffix as sent by the device (may be empty).
    pub unit: String,
}

impl Reading {
    pub fn new(status: ReadingStatus, weight: f64, unit: impl Into<String>) -> Self {
        Self {
            status,
            weight,
            unit: unit.into(),
        }
    }

    /// Render the push wire shape: `{"status":"stable","weight":12.30,"unit":"kg"}`.
    ///
    /// The weight is always written with exactly two decimal places, which
    /// `serde_json` cannot express for `f64`, so the object is assembled here.
    pub fn to_message(&self) -> String {
        let unit = serde_json::Value::String(self.unit.clone());
        format!(
            r#"{{"status":"{}","weight":{:.2},"unit":{}}}"#,
            self.status.as_str(),
            self.weight,
            unit
        )
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Lifecycle of the single device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    Reading,
    /// Waiting out backoff after the n-th consecutive failed open.
    Retrying(u32),
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// Identifier handed out by the distribution hub for each subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery state of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriberState {
    Active,
    /// Delivery has stopped; the subscriber is being torn down.
    Closing,
}

// ---------------------------------------------------------------------------
// Print jobs
// ---------------------------------------------------------------------------

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the textual form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, waiting for the worker.
    Pending,
    /// Currently being printed. At most one job is ever in this state.
    Running,
    /// The print executable exited successfully.
    Completed,
    /// Printing failed; see the job error field.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A print request and its lifecycle record.
///
/// The document bytes themselves travel with the queued work item and are
/// not retained here; the record keeps their size and digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    pub status: JobStatus,
    /// Original file name of the submitted document.
    pub document_name: String,
    /// Target printer; empty means the system default.
    pub printer_name: String,
    pub size_bytes: u64,
    /// SHA-256 of the document bytes (lowercase hex).
    pub sha256: String,
    /// Where the immutable copy was archived, once it has been.
    pub history_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock time spent in the print executable.
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl PrintJob {
    pub fn new(
        document_name: String,
        printer_name: String,
        size_bytes: u64,
        sha256: String,
    ) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            document_name,
            printer_name,
            size_bytes,
            sha256,
            history_path: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
        }
    }
}

/// Aggregate job counts for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Whether the worker task is alive.
    pub worker_running: bool,
}
