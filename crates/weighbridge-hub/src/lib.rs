// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Weighbridge Hub — subscriber registry and non-blocking broadcast.

pub mod hub;
pub mod sink;

pub use hub::{DEFAULT_QUEUE_CAPACITY, Hub};
pub use sink::MessageSink;
