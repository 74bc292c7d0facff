// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Weighbridge Print — the print side of the service.  Documents are queued
// in memory, printed strictly one after another by an external executable,
// and archived to a history directory that is never overwritten.

pub mod archive;
pub mod digest;
pub mod queue;
pub mod runner;

pub use archive::HistoryArchive;
pub use queue::{JobQueue, QueueConfig};
pub use runner::{ExternalCommandRunner, PrintRunner};
